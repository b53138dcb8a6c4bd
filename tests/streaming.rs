//! Producer/consumer streaming through the bounded pipe, and
//! forward-only writer behavior.

mod common;

use std::io::{Read, Write};
use std::thread;

use common::{noise, pattern};
use zipedit::{BoundedPipe, CompressionMethod, ZipEntry, ZipReader, ZipWriter};

#[test]
fn archive_streams_through_a_small_pipe() {
    // The pipe holds far less than the archive; both sides make progress
    // only because reads unblock writes.
    let payload_a = pattern(64 * 1024);
    let payload_b = noise(5, 32 * 1024);
    let expected = vec![
        ("a.bin".to_string(), payload_a.clone()),
        ("b.bin".to_string(), payload_b.clone()),
    ];

    let pipe = BoundedPipe::with_capacity(1024);
    let write_side = pipe.clone();

    let producer = thread::spawn(move || {
        let mut writer = ZipWriter::new_streaming(write_side);
        writer.put_next_entry(ZipEntry::new("a.bin").unwrap()).unwrap();
        writer.write_all(&payload_a).unwrap();
        writer.close_entry().unwrap();
        writer.put_next_entry(ZipEntry::new("b.bin").unwrap()).unwrap();
        writer.write_all(&payload_b).unwrap();
        writer.close_entry().unwrap();
        let pipe = writer.into_inner().unwrap();
        pipe.close();
    });

    let mut reader = ZipReader::new(pipe);
    let mut seen = Vec::new();
    while let Some(entry) = reader.get_next_entry().unwrap() {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        seen.push((entry.name().to_string(), data));
    }
    producer.join().unwrap();
    assert_eq!(seen, expected);
}

#[test]
fn descriptor_entries_work_across_the_pipe() {
    // Unknown sizes on a pipe mean trailing descriptors; the consumer
    // must find entry boundaries without seeking.
    let pipe = BoundedPipe::with_capacity(256);
    let write_side = pipe.clone();
    let data = pattern(10_000);
    let data_for_writer = data.clone();

    let producer = thread::spawn(move || {
        let mut writer = ZipWriter::new_streaming(write_side);
        writer.put_next_entry(ZipEntry::new("d.bin").unwrap()).unwrap();
        writer.write_all(&data_for_writer).unwrap();
        writer.close_entry().unwrap();
        writer.into_inner().unwrap().close();
    });

    let mut reader = ZipReader::new(pipe);
    let entry = reader.get_next_entry().unwrap().unwrap();
    assert!(entry.has_descriptor());
    // Sizes are unknown until the descriptor arrives.
    assert!(entry.size().is_none());
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
    assert!(reader.get_next_entry().unwrap().is_none());
    producer.join().unwrap();
}

#[test]
fn consumer_can_skip_entries_mid_stream() {
    let pipe = BoundedPipe::with_capacity(512);
    let write_side = pipe.clone();

    let producer = thread::spawn(move || {
        let mut writer = ZipWriter::new_streaming(write_side);
        for i in 0..5 {
            writer
                .put_next_entry(ZipEntry::new(format!("entry{i}")).unwrap())
                .unwrap();
            writer.write_all(&pattern(2000 + i * 100)).unwrap();
            writer.close_entry().unwrap();
        }
        writer.into_inner().unwrap().close();
    });

    let mut reader = ZipReader::new(pipe);
    let mut names = Vec::new();
    // Never read any payload; every advance skips.
    while let Some(entry) = reader.get_next_entry().unwrap() {
        names.push(entry.name().to_string());
    }
    producer.join().unwrap();
    assert_eq!(names, ["entry0", "entry1", "entry2", "entry3", "entry4"]);
}

#[test]
fn stored_conversion_is_observable_through_level() {
    let mut writer = ZipWriter::new_streaming(Vec::new());
    writer.set_level(7).unwrap();
    assert_eq!(writer.level(), 7);

    let mut entry = ZipEntry::new("converted.bin").unwrap();
    entry.set_method(CompressionMethod::Stored);
    writer.put_next_entry(entry).unwrap();
    // The conversion to deflate shows up as an effective level of 0.
    assert_eq!(writer.level(), 0);
    writer.write_all(b"data").unwrap();
    writer.close_entry().unwrap();
    assert_eq!(writer.level(), 7);

    let bytes = writer.into_inner().unwrap();
    let mut reader = ZipReader::new(&bytes[..]);
    let entry = reader.get_next_entry().unwrap().unwrap();
    assert_eq!(entry.method(), CompressionMethod::Deflated);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, b"data");
}

#[test]
fn into_inner_returns_the_destination_with_the_archive_complete() {
    let mut writer = ZipWriter::new_streaming(Vec::new());
    writer.put_next_entry(ZipEntry::new("x").unwrap()).unwrap();
    writer.write_all(b"payload").unwrap();
    // Neither close_entry nor finish called explicitly; into_inner
    // completes both.
    let bytes = writer.into_inner().unwrap();

    let mut reader = ZipReader::new(&bytes[..]);
    let entry = reader.get_next_entry().unwrap().unwrap();
    assert_eq!(entry.name(), "x");
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, b"payload");
    assert!(reader.get_next_entry().unwrap().is_none());
}

#[test]
fn reader_into_inner_releases_the_source() {
    let bytes = common::build_streamed_archive(&[("a", b"1"), ("b", b"2")]);
    let mut reader = ZipReader::new(&bytes[..]);
    reader.get_next_entry().unwrap().unwrap();
    // Abandon mid-entry; the source comes back out.
    let rest = reader.into_inner();
    assert!(!rest.is_empty());
}
