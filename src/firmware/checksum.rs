/// Computes the byte that makes `bytes` sum to zero modulo 256.
///
/// The byte at `checksum_offset` is excluded from the sum since it is the slot the
/// result will be written to. Every other byte is summed as a signed 8-bit value and
/// the two's-complement negation is truncated to 8 bits.
pub fn compute(bytes: &[u8], checksum_offset: usize) -> u8 {
    let sum = bytes
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != checksum_offset)
        .fold(0i32, |acc, (_, &b)| acc + i32::from(b as i8));

    (sum.wrapping_neg() & 0xff) as u8
}

/// Unmasked 8-bit sum of a region; zero for a correctly checksummed table.
pub fn sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}
