use iced_x86::{Decoder, DecoderOptions, Formatter, NasmFormatter};

/// Upper bound on instructions decoded from one byte buffer.
const MAX_DECODED: usize = 15;

/// Outcome of decoding the raw bytes of one retired instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Number of instructions found in the buffer; exactly one for a clean decode.
    pub count: usize,
    pub mnemonic: String,
    pub operands: String,
}

impl Decoded {
    pub fn is_clean(&self) -> bool {
        self.count == 1
    }
}

pub trait InstructionDecoder {
    fn decode(&mut self, bytes: &[u8]) -> Decoded;
}

/// x86 decoder with NASM-style text.
pub struct IcedDecoder {
    bitness: u32,
    formatter: NasmFormatter,
}

impl IcedDecoder {
    pub fn new(bitness: u32) -> Self {
        IcedDecoder {
            bitness,
            formatter: NasmFormatter::new(),
        }
    }
}

impl InstructionDecoder for IcedDecoder {
    fn decode(&mut self, bytes: &[u8]) -> Decoded {
        let Ok(mut decoder) = Decoder::try_new(self.bitness, bytes, DecoderOptions::NONE) else {
            return Decoded::default();
        };

        let mut decoded = Decoded::default();
        while decoder.can_decode() && decoded.count < MAX_DECODED {
            let instruction = decoder.decode();
            if instruction.is_invalid() {
                return Decoded::default();
            }
            if decoded.count == 0 {
                self.formatter
                    .format_mnemonic(&instruction, &mut decoded.mnemonic);
                self.formatter
                    .format_all_operands(&instruction, &mut decoded.operands);
            }
            decoded.count += 1;
        }
        decoded
    }
}
