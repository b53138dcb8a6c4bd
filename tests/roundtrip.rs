//! Write-then-read round trips across methods, levels, sizes, and sink
//! kinds.

mod common;

use std::io::{Cursor, Read, Write};

use common::{build_archive, build_streamed_archive, noise, pattern, stored_entry};
use zipedit::{
    CompressionMethod, ZipArchive, ZipEntry, ZipReader, ZipWriter,
};

fn read_all_sequential(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut reader = ZipReader::new(bytes);
    let mut out = Vec::new();
    while let Some(entry) = reader.get_next_entry().unwrap() {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        out.push((entry.name().to_string(), data));
    }
    out
}

#[test]
fn deflated_entries_round_trip_both_readers() {
    let payloads: Vec<(String, Vec<u8>)> = vec![
        ("tiny.txt".into(), b"x".to_vec()),
        ("pattern.bin".into(), pattern(10 * 1024)),
        ("noise.bin".into(), noise(42, 5000)),
    ];
    let refs: Vec<(&str, &[u8])> = payloads
        .iter()
        .map(|(n, d)| (n.as_str(), d.as_slice()))
        .collect();
    let bytes = build_archive(&refs);

    // Sequential.
    let seen = read_all_sequential(&bytes);
    assert_eq!(seen.len(), payloads.len());
    for ((name, data), (seen_name, seen_data)) in payloads.iter().zip(&seen) {
        assert_eq!(name, seen_name);
        assert_eq!(data, seen_data);
    }

    // Random access.
    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    for (name, data) in &payloads {
        assert_eq!(&archive.read_entry(name).unwrap(), data);
    }
    assert!(archive.test_archive(true));
}

#[test]
fn stored_entries_round_trip() {
    let data = pattern(2048);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.put_next_entry(stored_entry("stored.bin", &data)).unwrap();
    writer.write_all(&data).unwrap();
    writer.close_entry().unwrap();
    let bytes = writer.into_inner().unwrap().into_inner();

    // Stored payload must appear verbatim in the archive.
    assert!(bytes.windows(data.len()).any(|w| w == &data[..]));

    let seen = read_all_sequential(&bytes);
    assert_eq!(seen[0].1, data);

    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.read_entry("stored.bin").unwrap(), data);
    let entry = archive.find_entry("stored.bin").unwrap();
    assert_eq!(entry.method(), CompressionMethod::Stored);
    assert_eq!(entry.compressed_size(), Some(data.len() as u64));
}

#[test]
fn ten_stored_entries_of_a_fixed_pattern_extract_completely() {
    let data = pattern(1024);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new())).unwrap();
    for i in 0..10 {
        writer.put_next_entry(stored_entry(&format!("part{i}.bin"), &data)).unwrap();
        writer.write_all(&data).unwrap();
        writer.close_entry().unwrap();
    }
    let bytes = writer.into_inner().unwrap().into_inner();

    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 10);
    let mut total = 0;
    for i in 0..10 {
        let extracted = archive.read_entry(&format!("part{i}.bin")).unwrap();
        assert_eq!(extracted, data);
        total += extracted.len();
    }
    assert_eq!(total, 10 * 1024);
}

#[test]
fn stored_without_declared_sizes_is_patched_on_seekable_output() {
    let data = pattern(600);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new())).unwrap();
    let mut entry = ZipEntry::new("stored2.bin").unwrap();
    entry.set_method(CompressionMethod::Stored);
    writer.put_next_entry(entry).unwrap();
    writer.write_all(&data).unwrap();
    writer.close_entry().unwrap();
    let bytes = writer.into_inner().unwrap().into_inner();

    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    let entry = archive.find_entry("stored2.bin").unwrap();
    assert_eq!(entry.method(), CompressionMethod::Stored);
    assert_eq!(archive.read_entry("stored2.bin").unwrap(), data);
}

#[test]
fn every_compression_level_round_trips() {
    let data = pattern(4096);
    for level in 0..=9 {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.set_level(level).unwrap();
        writer.put_next_entry(ZipEntry::new("l.bin").unwrap()).unwrap();
        writer.write_all(&data).unwrap();
        writer.close_entry().unwrap();
        let bytes = writer.into_inner().unwrap().into_inner();

        let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.read_entry("l.bin").unwrap(), data, "level {level}");
    }
}

#[test]
fn streamed_archives_round_trip() {
    let big = pattern(50_000);
    let bytes = build_streamed_archive(&[("a", b"alpha"), ("big.bin", &big), ("z", b"")]);

    let seen = read_all_sequential(&bytes);
    assert_eq!(seen[0].1, b"alpha");
    assert_eq!(seen[1].1, big);
    assert!(seen[2].1.is_empty());

    // Streamed output is also a valid archive for the random-access view.
    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 3);
    assert!(archive.test_archive(true));
    assert_eq!(archive.read_entry("big.bin").unwrap(), big);
}

#[test]
fn many_small_entries() {
    let names: Vec<String> = (0..200).map(|i| format!("dir/file{i:03}.txt")).collect();
    let mut writer = ZipWriter::new(Cursor::new(Vec::new())).unwrap();
    for (i, name) in names.iter().enumerate() {
        writer.put_next_entry(ZipEntry::new(name.clone()).unwrap()).unwrap();
        writer.write_all(format!("content {i}").as_bytes()).unwrap();
        writer.close_entry().unwrap();
    }
    let bytes = writer.into_inner().unwrap().into_inner();

    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 200);
    assert_eq!(archive.read_entry("dir/file150.txt").unwrap(), b"content 150");
    assert_eq!(archive.read_entry("dir/file000.txt").unwrap(), b"content 0");
}

#[test]
fn empty_archive_round_trips() {
    let bytes = build_archive(&[]);
    let archive = ZipArchive::open(Cursor::new(bytes.clone())).unwrap();
    assert!(archive.is_empty());
    assert!(ZipReader::new(&bytes[..]).get_next_entry().unwrap().is_none());
}

#[test]
fn empty_entries_round_trip() {
    let bytes = build_archive(&[("empty1", b""), ("empty2", b"")]);
    let seen = read_all_sequential(&bytes);
    assert!(seen.iter().all(|(_, d)| d.is_empty()));

    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert!(archive.read_entry("empty2").unwrap().is_empty());
    let entry = archive.find_entry("empty1").unwrap();
    assert_eq!(entry.size(), Some(0));
    assert_eq!(entry.crc(), Some(0));
}

#[test]
fn archive_comment_round_trips() {
    let bytes = build_archive_comment("remembered across the round trip");
    let archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.comment(), b"remembered across the round trip");
}

fn build_archive_comment(comment: &str) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.set_comment(comment).unwrap();
    writer.put_next_entry(ZipEntry::new("x").unwrap()).unwrap();
    writer.write_all(b"data").unwrap();
    writer.close_entry().unwrap();
    writer.into_inner().unwrap().into_inner()
}

#[test]
fn max_length_comment_round_trips() {
    let comment = vec![b'c'; u16::MAX as usize];
    let mut writer = ZipWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.set_comment(comment.clone()).unwrap();
    let bytes = writer.into_inner().unwrap().into_inner();

    let archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.comment(), &comment[..]);
}

#[test]
fn unicode_names_round_trip() {
    let bytes = build_archive(&[("docs/résumé.txt", b"accents"), ("数据.bin", b"cjk")]);
    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.read_entry("docs/résumé.txt").unwrap(), b"accents");
    assert_eq!(archive.read_entry("数据.bin").unwrap(), b"cjk");
}

#[test]
fn declared_sizes_allow_streaming_stored_entries() {
    let data = noise(7, 3000);
    let mut writer = ZipWriter::new_streaming(Vec::new());
    writer.put_next_entry(stored_entry("declared.bin", &data)).unwrap();
    writer.write_all(&data).unwrap();
    writer.close_entry().unwrap();
    let bytes = writer.into_inner().unwrap();

    let mut reader = ZipReader::new(&bytes[..]);
    let entry = reader.get_next_entry().unwrap().unwrap();
    assert_eq!(entry.method(), CompressionMethod::Stored);
    assert!(!entry.has_descriptor());
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn timestamps_survive_the_round_trip() {
    // 2020-05-17 10:30:44 UTC
    let secs = 1_589_711_444;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new())).unwrap();
    let mut entry = ZipEntry::new("dated.txt").unwrap();
    entry.set_time_unix(secs);
    writer.put_next_entry(entry).unwrap();
    writer.write_all(b"d").unwrap();
    writer.close_entry().unwrap();
    let bytes = writer.into_inner().unwrap().into_inner();

    let archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    let entry = archive.find_entry("dated.txt").unwrap();
    assert_eq!(zipedit::dostime::to_unix(entry.dos_time()), secs);
}

#[test]
fn configured_writer_still_round_trips() {
    let bytes = common::build_archive_with(&[("p", b"q")], |w| {
        w.set_level(1).unwrap();
    });
    let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.read_entry("p").unwrap(), b"q");
}
