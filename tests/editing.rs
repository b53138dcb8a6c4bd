//! Batched editing: staging, committing with both strategies, aborting,
//! and failure atomicity.

mod common;

use std::io::{Cursor, Read, Write};

use common::{build_archive, pattern};
use zipedit::{
    CommitResult, CompressionMethod, Error, Password, StaticDataSource, UpdateStrategy,
    ZipArchive, ZipEditor, ZipEntry, ZipWriter,
};

fn names(editor: &ZipEditor<zipedit::MemoryStorage>) -> Vec<String> {
    editor.entries().iter().map(|e| e.name().to_string()).collect()
}

#[test]
fn add_and_delete_in_one_batch() {
    let bytes = build_archive(&[("keep.txt", b"kept"), ("drop.txt", b"dropped")]);
    let mut editor = ZipEditor::in_memory(bytes).unwrap();

    editor.begin_update().unwrap();
    editor.add("new.txt", b"added data".to_vec()).unwrap();
    editor.delete("drop.txt").unwrap();
    let result = editor.commit_update().unwrap();

    assert_eq!(
        result,
        CommitResult {
            kept: 1,
            added: 1,
            deleted: 1
        }
    );
    assert_eq!(names(&editor), ["keep.txt", "new.txt"]);
    assert_eq!(editor.read_entry("keep.txt").unwrap(), b"kept");
    assert_eq!(editor.read_entry("new.txt").unwrap(), b"added data");
    assert!(editor.test_archive(true).unwrap());
}

#[test]
fn staged_changes_are_invisible_until_commit() {
    let bytes = build_archive(&[("only.txt", b"x")]);
    let mut editor = ZipEditor::in_memory(bytes.clone()).unwrap();

    editor.begin_update().unwrap();
    editor.add("pending.txt", b"y".to_vec()).unwrap();
    assert!(editor.find_entry("pending.txt").is_none());
    assert_eq!(editor.bytes(), bytes);

    editor.commit_update().unwrap();
    assert!(editor.find_entry("pending.txt").is_some());
    assert_ne!(editor.bytes(), bytes);
}

#[test]
fn abort_discards_the_batch() {
    let bytes = build_archive(&[("a.txt", b"1")]);
    let mut editor = ZipEditor::in_memory(bytes.clone()).unwrap();

    editor.begin_update().unwrap();
    editor.add("b.txt", b"2".to_vec()).unwrap();
    editor.delete("a.txt").unwrap();
    editor.abort_update();

    assert_eq!(editor.bytes(), bytes);
    assert_eq!(names(&editor), ["a.txt"]);
    // Operations outside a batch are rejected.
    assert!(matches!(
        editor.add("c.txt", b"3".to_vec()),
        Err(Error::InvalidOperation(_))
    ));
}

#[test]
fn empty_commit_is_a_no_op() {
    let bytes = build_archive(&[("a.txt", b"1")]);
    let mut editor = ZipEditor::in_memory(bytes.clone()).unwrap();
    editor.begin_update().unwrap();
    let result = editor.commit_update().unwrap();
    assert_eq!(result.kept, 1);
    assert_eq!(result.added + result.deleted, 0);
    assert_eq!(editor.bytes(), bytes);
}

#[test]
fn delete_of_missing_entry_fails_at_stage_time() {
    let bytes = build_archive(&[("real.txt", b"1")]);
    let mut editor = ZipEditor::in_memory(bytes).unwrap();
    editor.begin_update().unwrap();
    assert!(matches!(
        editor.delete("imaginary.txt"),
        Err(Error::EntryNotFound { .. })
    ));
    // Double delete of the same name fails too.
    editor.delete("real.txt").unwrap();
    assert!(matches!(
        editor.delete("real.txt"),
        Err(Error::EntryNotFound { .. })
    ));
}

#[test]
fn duplicate_add_fails() {
    let bytes = build_archive(&[("exists.txt", b"1")]);
    let mut editor = ZipEditor::in_memory(bytes).unwrap();
    editor.begin_update().unwrap();
    assert!(matches!(
        editor.add("exists.txt", b"2".to_vec()),
        Err(Error::EntryExists { .. })
    ));
    editor.add("fresh.txt", b"2".to_vec()).unwrap();
    assert!(matches!(
        editor.add("fresh.txt", b"3".to_vec()),
        Err(Error::EntryExists { .. })
    ));
}

#[test]
fn delete_then_add_replaces_content() {
    let bytes = build_archive(&[("config.ini", b"old=1")]);
    let mut editor = ZipEditor::in_memory(bytes).unwrap();
    editor.begin_update().unwrap();
    editor.delete("config.ini").unwrap();
    editor.add("config.ini", b"new=2".to_vec()).unwrap();
    editor.commit_update().unwrap();
    assert_eq!(editor.read_entry("config.ini").unwrap(), b"new=2");
}

#[test]
fn direct_strategy_appends_without_rewriting_entries() {
    let big = pattern(40_000);
    let bytes = build_archive(&[("big.bin", &big), ("small.txt", b"s")]);
    let mut editor = ZipEditor::in_memory(bytes.clone()).unwrap();

    editor.begin_update_with(UpdateStrategy::Direct).unwrap();
    editor.add("appended.txt", b"tail entry".to_vec()).unwrap();
    let result = editor.commit_update().unwrap();
    assert_eq!(result.kept, 2);
    assert_eq!(result.added, 1);

    // Every byte of the original entry area is untouched; the new entry
    // was appended where the old central directory began.
    let updated = editor.bytes();
    let entry_area = eocd_cd_offset(&bytes);
    assert_eq!(&updated[..entry_area], &bytes[..entry_area]);
    assert!(updated.len() > bytes.len());

    assert_eq!(editor.read_entry("big.bin").unwrap(), big);
    assert_eq!(editor.read_entry("appended.txt").unwrap(), b"tail entry");
    assert!(editor.test_archive(true).unwrap());
}

/// Central directory offset from the end-of-directory record of an
/// archive without a trailing comment.
fn eocd_cd_offset(bytes: &[u8]) -> usize {
    let base = bytes.len() - 22;
    assert_eq!(&bytes[base..base + 4], &[0x50, 0x4B, 0x05, 0x06]);
    u32::from_le_bytes([
        bytes[base + 16],
        bytes[base + 17],
        bytes[base + 18],
        bytes[base + 19],
    ]) as usize
}

#[test]
fn direct_and_safe_commits_read_back_identically() {
    let base = build_archive(&[("one.txt", b"first"), ("two.txt", b"second")]);

    let mut safe = ZipEditor::in_memory(base.clone()).unwrap();
    safe.begin_update_with(UpdateStrategy::Safe).unwrap();
    safe.add("three.txt", b"third".to_vec()).unwrap();
    safe.commit_update().unwrap();

    let mut direct = ZipEditor::in_memory(base).unwrap();
    direct.begin_update_with(UpdateStrategy::Direct).unwrap();
    direct.add("three.txt", b"third".to_vec()).unwrap();
    direct.commit_update().unwrap();

    for name in ["one.txt", "two.txt", "three.txt"] {
        assert_eq!(
            safe.read_entry(name).unwrap(),
            direct.read_entry(name).unwrap(),
            "{name}"
        );
    }
    assert!(safe.test_archive(true).unwrap());
    assert!(direct.test_archive(true).unwrap());
}

#[test]
fn direct_hint_with_deletions_falls_back_to_safe() {
    let bytes = build_archive(&[("a.txt", b"1"), ("b.txt", b"2")]);
    let mut editor = ZipEditor::in_memory(bytes).unwrap();
    editor.begin_update_with(UpdateStrategy::Direct).unwrap();
    editor.delete("a.txt").unwrap();
    let result = editor.commit_update().unwrap();
    assert_eq!(result.deleted, 1);
    assert!(editor.find_entry("a.txt").is_none());
    assert_eq!(editor.read_entry("b.txt").unwrap(), b"2");
    assert!(editor.test_archive(true).unwrap());
}

#[test]
fn surviving_encrypted_entries_keep_their_ciphertext() {
    // Build an archive with an encrypted entry, then edit it WITHOUT the
    // password. The rewrite must copy the encrypted span verbatim.
    let secret = pattern(3000);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.set_password(Some(Password::new("locked")));
    writer.put_next_entry(ZipEntry::new("vault.bin").unwrap()).unwrap();
    writer.write_all(&secret).unwrap();
    writer.close_entry().unwrap();
    writer.set_password(None);
    writer.put_next_entry(ZipEntry::new("stale.txt").unwrap()).unwrap();
    writer.write_all(b"remove me").unwrap();
    writer.close_entry().unwrap();
    let bytes = writer.into_inner().unwrap().into_inner();

    let mut editor = ZipEditor::in_memory(bytes).unwrap();
    editor.begin_update().unwrap();
    editor.delete("stale.txt").unwrap();
    editor.commit_update().unwrap();

    // The encrypted entry still decrypts with the original password.
    let mut archive = ZipArchive::open(Cursor::new(editor.bytes())).unwrap();
    assert!(archive.find_entry("vault.bin").unwrap().is_encrypted());
    archive.set_password(Some(Password::new("locked")));
    assert_eq!(archive.read_entry("vault.bin").unwrap(), secret);
}

#[test]
fn editor_adds_encrypted_entries() {
    let bytes = build_archive(&[("plain.txt", b"open")]);
    let mut editor = ZipEditor::in_memory(bytes).unwrap();
    editor.set_password(Some(Password::new("editor-pw")));
    editor.begin_update().unwrap();
    editor.add("secret.txt", b"hidden".to_vec()).unwrap();
    editor.commit_update().unwrap();

    assert!(editor.find_entry("secret.txt").unwrap().is_encrypted());
    assert!(!editor.find_entry("plain.txt").unwrap().is_encrypted());
    assert_eq!(editor.read_entry("secret.txt").unwrap(), b"hidden");
}

#[test]
fn editor_respects_method_setting() {
    let data = pattern(1000);
    let bytes = build_archive(&[]);
    let mut editor = ZipEditor::in_memory(bytes).unwrap();
    editor.set_method(CompressionMethod::Stored);
    editor.begin_update().unwrap();
    editor.add("raw.bin", data.clone()).unwrap();
    editor.add_with_method("packed.bin", CompressionMethod::Deflated, data.clone())
        .unwrap();
    editor.commit_update().unwrap();

    assert_eq!(
        editor.find_entry("raw.bin").unwrap().method(),
        CompressionMethod::Stored
    );
    assert_eq!(
        editor.find_entry("packed.bin").unwrap().method(),
        CompressionMethod::Deflated
    );
    assert_eq!(editor.read_entry("raw.bin").unwrap(), data);
    assert_eq!(editor.read_entry("packed.bin").unwrap(), data);
}

/// A data source whose reader fails partway through.
struct FailingSource;

impl StaticDataSource for FailingSource {
    fn get_source(&self) -> zipedit::Result<Box<dyn Read + '_>> {
        struct FailingReader(usize);
        impl Read for FailingReader {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.0 == 0 {
                    self.0 = 1;
                    let n = buf.len().min(16);
                    buf[..n].fill(0xAA);
                    Ok(n)
                } else {
                    Err(std::io::Error::other("source went away"))
                }
            }
        }
        Ok(Box::new(FailingReader(0)))
    }
}

#[test]
fn failed_rewrite_leaves_the_original_archive_intact() {
    let bytes = build_archive(&[("precious.txt", b"do not lose")]);
    let mut editor = ZipEditor::in_memory(bytes.clone()).unwrap();

    editor.begin_update().unwrap();
    editor.add("doomed.bin", FailingSource).unwrap();
    let err = editor.commit_update().unwrap_err();
    assert!(matches!(err, Error::Io(_)));

    // Original bytes untouched and still a valid archive.
    assert_eq!(editor.bytes(), bytes);
    let mut archive = ZipArchive::open(Cursor::new(editor.bytes())).unwrap();
    assert_eq!(archive.read_entry("precious.txt").unwrap(), b"do not lose");
}

#[test]
fn file_backed_editor_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("work.zip");

    let mut editor = ZipEditor::create_path(&path).unwrap();
    assert!(editor.entries().is_empty());

    editor.begin_update().unwrap();
    editor.add("hello.txt", b"from disk".to_vec()).unwrap();
    editor.commit_update().unwrap();
    drop(editor);

    // Reopen from the file and keep editing.
    let mut editor = ZipEditor::open_path(&path).unwrap();
    assert_eq!(editor.read_entry("hello.txt").unwrap(), b"from disk");
    editor.begin_update().unwrap();
    editor.delete("hello.txt").unwrap();
    editor.commit_update().unwrap();
    assert!(editor.entries().is_empty());

    // No temporary files linger.
    let count = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(count, 1);
}

#[test]
fn file_source_reads_at_commit_time() {
    let dir = tempfile::tempdir().unwrap();
    let archive_path = dir.path().join("a.zip");
    let payload_path = dir.path().join("payload.txt");
    std::fs::write(&payload_path, b"early").unwrap();

    let mut editor = ZipEditor::create_path(&archive_path).unwrap();
    editor.begin_update().unwrap();
    editor.add("late.txt", payload_path.clone()).unwrap();
    // The source is opened at commit, so this rewrite wins.
    std::fs::write(&payload_path, b"late content").unwrap();
    editor.commit_update().unwrap();

    assert_eq!(editor.read_entry("late.txt").unwrap(), b"late content");
}

#[test]
fn archive_comment_survives_editing() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new())).unwrap();
    writer.set_comment("important note").unwrap();
    writer.put_next_entry(ZipEntry::new("e.txt").unwrap()).unwrap();
    writer.write_all(b"x").unwrap();
    writer.close_entry().unwrap();
    let bytes = writer.into_inner().unwrap().into_inner();

    let mut editor = ZipEditor::in_memory(bytes).unwrap();
    editor.begin_update().unwrap();
    editor.add("f.txt", b"y".to_vec()).unwrap();
    editor.commit_update().unwrap();

    let archive = ZipArchive::open(Cursor::new(editor.bytes())).unwrap();
    assert_eq!(archive.comment(), b"important note");
}

#[test]
fn begin_update_twice_fails() {
    let mut editor = ZipEditor::in_memory(build_archive(&[])).unwrap();
    editor.begin_update().unwrap();
    assert!(matches!(
        editor.begin_update(),
        Err(Error::InvalidOperation(_))
    ));
}
