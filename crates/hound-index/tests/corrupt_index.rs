mod common;

use common::build_reader;
use hound_index::store::{MANIFEST_FILE, POSTINGS_FILE, TRIGRAMS_IDX_FILE};
use hound_index::IndexReader;
use std::path::Path;

const CORPUS: &[(&str, &str)] = &[("a.txt", "hello world\n"), ("b.txt", "goodbye world\n")];

fn fresh_generation(root: &Path) -> std::path::PathBuf {
    let dir = root.join("gen");
    build_reader(&dir, CORPUS);
    dir
}

fn expect_corrupt(dir: &Path, what: &str) {
    match IndexReader::open(dir) {
        Err(e) => assert!(e.is_corrupt(), "{}: expected Corrupt, got {}", what, e),
        Ok(_) => panic!("{}: open unexpectedly succeeded", what),
    }
}

fn patch(path: &Path, offset: usize, bytes: &[u8]) {
    let mut buf = std::fs::read(path).unwrap();
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    std::fs::write(path, buf).unwrap();
}

#[test]
fn bad_magic() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fresh_generation(tmp.path());
    patch(&dir.join(MANIFEST_FILE), 0, b"XNDX");
    expect_corrupt(&dir, "bad magic");
}

#[test]
fn wrong_version() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fresh_generation(tmp.path());
    patch(&dir.join(MANIFEST_FILE), 4, &99u32.to_le_bytes());
    expect_corrupt(&dir, "wrong version");
}

#[test]
fn truncated_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fresh_generation(tmp.path());
    let path = dir.join(MANIFEST_FILE);
    let buf = std::fs::read(&path).unwrap();
    std::fs::write(&path, &buf[..10]).unwrap();
    expect_corrupt(&dir, "truncated manifest");
}

#[test]
fn descending_trigram_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fresh_generation(tmp.path());
    let path = dir.join(TRIGRAMS_IDX_FILE);
    let mut buf = std::fs::read(&path).unwrap();
    assert!(buf.len() >= 24, "need at least two directory entries");
    // Swap the first two entries to break strict ascent.
    let (a, b) = buf.split_at_mut(12);
    a.swap_with_slice(&mut b[..12]);
    std::fs::write(&path, buf).unwrap();
    expect_corrupt(&dir, "descending directory");
}

#[test]
fn posting_offset_out_of_bounds() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fresh_generation(tmp.path());
    // Point the first entry's posting offset far past the postings blob.
    patch(
        &dir.join(TRIGRAMS_IDX_FILE),
        4,
        &0xFFFF_0000u32.to_le_bytes(),
    );
    expect_corrupt(&dir, "posting offset out of bounds");
}

#[test]
fn truncated_postings_blob() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fresh_generation(tmp.path());
    let path = dir.join(POSTINGS_FILE);
    let buf = std::fs::read(&path).unwrap();
    std::fs::write(&path, &buf[..buf.len() / 2]).unwrap();
    expect_corrupt(&dir, "truncated postings");
}

#[test]
fn file_count_mismatch() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = fresh_generation(tmp.path());
    // Claim one extra file; files.idx no longer matches.
    patch(&dir.join(MANIFEST_FILE), 12, &3u32.to_le_bytes());
    expect_corrupt(&dir, "file count mismatch");
}
