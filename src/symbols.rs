use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Guest instruction address to symbol name, as read from a kernel `System.map`.
#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    entries: HashMap<u64, String>,
}

impl SymbolMap {
    pub fn new() -> Self {
        SymbolMap::default()
    }

    /// Reads `address type name` lines until the input ends or a line does not
    /// parse. Whatever was read up to that point is kept.
    pub fn parse<R: BufRead>(reader: R) -> Self {
        let mut entries = HashMap::new();

        for line in reader.lines() {
            let Ok(line) = line else { break };
            let mut fields = line.split_whitespace();
            let Some(addr) = fields.next() else { continue };
            let (Some(_kind), Some(name)) = (fields.next(), fields.next()) else {
                break;
            };
            let digits = addr
                .strip_prefix("0x")
                .or_else(|| addr.strip_prefix("0X"))
                .unwrap_or(addr);
            let Ok(addr) = u64::from_str_radix(digits, 16) else {
                break;
            };
            entries.insert(addr, name.to_string());
        }

        SymbolMap { entries }
    }

    /// Loads a symbol file. A missing or unreadable file yields an empty map.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match File::open(path) {
            Ok(file) => {
                let map = SymbolMap::parse(BufReader::new(file));
                tracing::info!(path = %path.display(), symbols = map.len(), "loaded symbol map");
                map
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "symbol map unavailable; continuing without symbols");
                SymbolMap::new()
            }
        }
    }

    pub fn lookup(&self, addr: u64) -> Option<&str> {
        self.entries.get(&addr).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(u64, S)> for SymbolMap {
    fn from_iter<I: IntoIterator<Item = (u64, S)>>(iter: I) -> Self {
        SymbolMap {
            entries: iter.into_iter().map(|(a, s)| (a, s.into())).collect(),
        }
    }
}
