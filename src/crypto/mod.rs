//! Traditional PKWARE stream encryption.
//!
//! The legacy ZIP cipher runs three rolling 32-bit keys over the data
//! stream; every plaintext byte mutates the keys, so encryption and
//! decryption are strictly sequential. Each encrypted payload is preceded
//! by a 12-byte header of random bytes whose last byte doubles as a cheap
//! password check.
//!
//! This cipher is obsolete as cryptography and is supported for
//! interoperability with existing archives only.

use std::fmt;
use std::io;

use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Byte length of the encryption header preceding each encrypted payload.
pub(crate) const CRYPT_HEADER_SIZE: usize = 12;

/// A password for the traditional stream cipher.
///
/// The backing string is zeroed on drop and never printed by `Debug`.
#[derive(Clone)]
pub struct Password {
    inner: Zeroizing<String>,
}

impl Password {
    /// Wraps a password string.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            inner: Zeroizing::new(password.into()),
        }
    }

    /// The password's UTF-8 bytes, as fed to the key schedule.
    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }
}

impl From<&str> for Password {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Password {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// The CRC-32 table used by the key schedule.
///
/// The cipher predates `crc32fast` convenience APIs and needs single-byte
/// table steps, so the table is built here at compile time.
const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 {
                0xEDB8_8320 ^ (c >> 1)
            } else {
                c >> 1
            };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

const fn crc32_step(value: u32, byte: u8) -> u32 {
    CRC_TABLE[((value ^ byte as u32) & 0xFF) as usize] ^ (value >> 8)
}

/// The three rolling key registers of the traditional cipher.
#[derive(Clone)]
pub(crate) struct ZipCryptoKeys {
    key0: u32,
    key1: u32,
    key2: u32,
}

impl ZipCryptoKeys {
    /// Initializes the keys from a password.
    pub(crate) fn new(password: &Password) -> Self {
        let mut keys = Self {
            key0: 0x1234_5678,
            key1: 0x2345_6789,
            key2: 0x3456_7890,
        };
        for &b in password.as_bytes() {
            keys.update(b);
        }
        keys
    }

    /// Folds one plaintext byte into the key registers.
    fn update(&mut self, byte: u8) {
        self.key0 = crc32_step(self.key0, byte);
        self.key1 = self
            .key1
            .wrapping_add(self.key0 & 0xFF)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.key2 = crc32_step(self.key2, (self.key1 >> 24) as u8);
    }

    /// The current keystream byte. Does not advance the keys.
    fn crypt_byte(&self) -> u8 {
        let t = (self.key2 | 2) as u16;
        ((t.wrapping_mul(t ^ 1)) >> 8) as u8
    }

    /// Encrypts one plaintext byte and advances the keys.
    pub(crate) fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.crypt_byte();
        self.update(plain);
        cipher
    }

    /// Decrypts one ciphertext byte and advances the keys.
    pub(crate) fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.crypt_byte();
        self.update(plain);
        plain
    }

    /// Encrypts a buffer in place.
    pub(crate) fn encrypt(&mut self, data: &mut [u8]) {
        for b in data {
            *b = self.encrypt_byte(*b);
        }
    }

    /// Decrypts a buffer in place.
    pub(crate) fn decrypt(&mut self, data: &mut [u8]) {
        for b in data {
            *b = self.decrypt_byte(*b);
        }
    }
}

impl fmt::Debug for ZipCryptoKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ZipCryptoKeys(***)")
    }
}

/// Builds the encrypted 12-byte header for an entry.
///
/// Eleven random bytes plus a check byte, encrypted with freshly
/// initialized keys; the caller continues encrypting the payload with the
/// returned keys. `check_byte` is the value a decryptor will compare
/// against (see [`check_byte_for`]).
pub(crate) fn make_crypt_header(
    password: &Password,
    check_byte: u8,
) -> Result<([u8; CRYPT_HEADER_SIZE], ZipCryptoKeys)> {
    let mut header = [0u8; CRYPT_HEADER_SIZE];
    getrandom::getrandom(&mut header[..CRYPT_HEADER_SIZE - 1])
        .map_err(|e| Error::Io(io::Error::other(e)))?;
    header[CRYPT_HEADER_SIZE - 1] = check_byte;

    let mut keys = ZipCryptoKeys::new(password);
    keys.encrypt(&mut header);
    Ok((header, keys))
}

/// Decrypts a 12-byte header and verifies its check byte.
///
/// On success returns the keys positioned to decrypt the payload. A
/// mismatch means a wrong password with probability 255/256.
pub(crate) fn verify_crypt_header(
    password: &Password,
    header: &[u8; CRYPT_HEADER_SIZE],
    expected_check: u8,
    entry_name: &str,
) -> Result<ZipCryptoKeys> {
    let mut keys = ZipCryptoKeys::new(password);
    let mut plain = *header;
    keys.decrypt(&mut plain);
    if plain[CRYPT_HEADER_SIZE - 1] != expected_check {
        return Err(Error::WrongPassword {
            entry_name: Some(entry_name.to_string()),
        });
    }
    Ok(keys)
}

/// The check byte a decryptor expects for an entry.
///
/// When the CRC was known at header-writing time the check byte is the
/// CRC's high byte; entries with a deferred descriptor use the second
/// byte of the DOS timestamp instead, since the CRC was not yet known.
pub(crate) fn check_byte_for(crc: Option<u32>, dos_time: u32, has_descriptor: bool) -> u8 {
    match crc {
        Some(crc) if !has_descriptor => (crc >> 24) as u8,
        _ => ((dos_time >> 8) & 0xFF) as u8,
    }
}
