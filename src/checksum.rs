//! Checksum computation utilities.
//!
//! ZIP archives verify entry payloads with CRC-32 using the IEEE 802.3
//! polynomial. This module wraps the hardware-accelerated `crc32fast`
//! implementation in a small incremental calculator.

use std::io::{self, Read};

use crate::READ_BUFFER_SIZE;

/// Incremental CRC-32 calculator.
///
/// # Example
///
/// ```rust
/// use zipedit::checksum::Crc32;
///
/// let mut crc = Crc32::new();
/// crc.update(b"Hello, ");
/// crc.update(b"World!");
/// assert_eq!(crc.finalize(), 0xEC4AC3D0);
///
/// assert_eq!(Crc32::compute(b"Hello, World!"), 0xEC4AC3D0);
/// ```
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    /// Creates a new calculator with an empty running value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds more data into the running checksum.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Returns the checksum of everything fed so far.
    pub fn finalize(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Resets the calculator to its initial state.
    pub fn reset(&mut self) {
        self.hasher.reset();
    }

    /// Computes the checksum of a single slice in one call.
    pub fn compute(data: &[u8]) -> u32 {
        let mut crc = Self::new();
        crc.update(data);
        crc.finalize()
    }

    /// Computes the checksum of everything a reader produces.
    pub fn compute_reader<R: Read>(reader: &mut R) -> io::Result<u32> {
        let mut crc = Self::new();
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            crc.update(&buffer[..n]);
        }
        Ok(crc.finalize())
    }
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32")
            .field("current", &self.finalize())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(Crc32::compute(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn empty_input() {
        assert_eq!(Crc32::compute(b""), 0);
    }

    #[test]
    fn incremental_matches_oneshot() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let mut crc = Crc32::new();
        for chunk in data.chunks(7) {
            crc.update(chunk);
        }
        assert_eq!(crc.finalize(), Crc32::compute(data));
    }

    #[test]
    fn reset_clears_state() {
        let mut crc = Crc32::new();
        crc.update(b"garbage");
        crc.reset();
        crc.update(b"123456789");
        assert_eq!(crc.finalize(), 0xCBF43926);
    }

    #[test]
    fn reader_matches_slice() {
        let data = vec![0xA5u8; 100_000];
        let from_reader = Crc32::compute_reader(&mut &data[..]).unwrap();
        assert_eq!(from_reader, Crc32::compute(&data));
    }
}
