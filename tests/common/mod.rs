//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use zipedit::{CompressionMethod, ZipEntry, ZipWriter};

/// Deterministic test payload: a repeating byte pattern that compresses
/// but is not trivially constant.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + i / 251) % 256) as u8).collect()
}

/// Incompressible-ish payload derived from a seed, without pulling in an
/// RNG: a xorshift stream.
pub fn noise(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 32) as u8
        })
        .collect()
}

/// Builds a seekable archive from `(name, data)` pairs with default
/// settings.
pub fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    build_archive_with(entries, |_| {})
}

/// Builds a seekable archive, letting the caller configure the writer
/// before any entries are added.
pub fn build_archive_with<F>(entries: &[(&str, &[u8])], configure: F) -> Vec<u8>
where
    F: FnOnce(&mut ZipWriter<zipedit::SeekSink<Cursor<Vec<u8>>>>),
{
    let mut writer = ZipWriter::new(Cursor::new(Vec::new())).unwrap();
    configure(&mut writer);
    for (name, data) in entries {
        writer
            .put_next_entry(ZipEntry::new(*name).unwrap())
            .unwrap();
        writer.write_all(data).unwrap();
        writer.close_entry().unwrap();
    }
    writer.into_inner().unwrap().into_inner()
}

/// Builds an archive through a forward-only sink, exercising the
/// descriptor path.
pub fn build_streamed_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new_streaming(Vec::new());
    for (name, data) in entries {
        writer
            .put_next_entry(ZipEntry::new(*name).unwrap())
            .unwrap();
        writer.write_all(data).unwrap();
        writer.close_entry().unwrap();
    }
    writer.into_inner().unwrap()
}

/// An entry configured for stored (uncompressed) writing with its sizes
/// declared up front.
pub fn stored_entry(name: &str, data: &[u8]) -> ZipEntry {
    let mut entry = ZipEntry::new(name).unwrap();
    entry.set_method(CompressionMethod::Stored);
    entry.set_size(data.len() as u64);
    entry.set_crc(zipedit::checksum::Crc32::compute(data));
    entry
}
