use std::fs::{self, File};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use memmap2::Mmap;
use parking_lot::Mutex;

use super::{
    read_u32, read_u64, read_var_u32, FileId, Manifest, CONTENT_ENTRY_LEN, CONTENT_FILE,
    CONTENT_IDX_FILE, FILES_FILE, FILES_IDX_FILE, MANIFEST_FILE, POSTINGS_FILE, TRIGRAMS_IDX_FILE,
    TRIGRAM_ENTRY_LEN,
};
use crate::error::{Error, Result};
use crate::trigram::Trigram;

const LINE_CACHE_CAP: usize = 256;

/// Per-file metadata from the file table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: FileId,
    pub path: String,
    pub size: u64,
    pub mtime: u64,
}

#[derive(Debug, Clone, Copy)]
struct ContentSpan {
    offset: u64,
    size: u64,
    mtime: u64,
}

/// A read-only mmap'd section; zero-length sections are held inline because
/// empty files cannot be mapped.
enum Section {
    Mapped(Mmap),
    Empty,
}

impl Section {
    fn bytes(&self) -> &[u8] {
        match self {
            Section::Mapped(m) => &m[..],
            Section::Empty => &[],
        }
    }
}

fn map_section(path: &Path) -> Result<Section> {
    let f = File::open(path)?;
    if f.metadata()?.len() == 0 {
        return Ok(Section::Empty);
    }
    let mmap = unsafe { Mmap::map(&f)? };
    Ok(Section::Mapped(mmap))
}

/// Query-side view of one committed index generation. Immutable; shared by
/// concurrent queries via `Arc`, unmapped when the last clone drops.
pub struct IndexReader {
    dir: PathBuf,
    manifest: Manifest,
    paths: Vec<String>,
    spans: Vec<ContentSpan>,
    trigrams: Section,
    postings: Section,
    content: Section,
    line_cache: Mutex<LruCache<FileId, Arc<Vec<u32>>>>,
}

impl IndexReader {
    /// Open and validate a generation directory. Any structural defect
    /// (missing manifest, bad magic, wrong version, non-monotonic trigram
    /// directory, out-of-bounds offsets) yields `Error::Corrupt`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let manifest_bytes = fs::read(dir.join(MANIFEST_FILE)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Corrupt("manifest missing (uncommitted generation)".into())
            } else {
                Error::Io(e)
            }
        })?;
        let manifest = Manifest::decode(&manifest_bytes)?;

        let files_buf = fs::read(dir.join(FILES_FILE))?;
        let files_idx_buf = fs::read(dir.join(FILES_IDX_FILE))?;
        let paths = decode_paths(&files_buf, &files_idx_buf, manifest.file_count)?;

        let content = map_section(&dir.join(CONTENT_FILE))?;
        let content_idx_buf = fs::read(dir.join(CONTENT_IDX_FILE))?;
        let spans = decode_spans(&content_idx_buf, manifest.file_count, content.bytes().len())?;

        let trigrams = map_section(&dir.join(TRIGRAMS_IDX_FILE))?;
        let postings = map_section(&dir.join(POSTINGS_FILE))?;
        validate_trigram_dir(
            trigrams.bytes(),
            manifest.trigram_count,
            postings.bytes().len(),
        )?;

        Ok(Self {
            dir,
            manifest,
            paths,
            spans,
            trigrams,
            postings,
            content,
            line_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(LINE_CACHE_CAP).expect("nonzero cache capacity"),
            )),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn generation(&self) -> u32 {
        self.manifest.generation
    }

    pub fn created_at(&self) -> u64 {
        self.manifest.created_at
    }

    pub fn file_count(&self) -> u32 {
        self.manifest.file_count
    }

    pub fn trigram_count(&self) -> u32 {
        self.manifest.trigram_count
    }

    pub fn path(&self, id: FileId) -> Option<&str> {
        self.paths.get(id as usize).map(|s| s.as_str())
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn file(&self, id: FileId) -> Option<FileRecord> {
        let path = self.paths.get(id as usize)?;
        let span = self.spans.get(id as usize)?;
        Some(FileRecord {
            id,
            path: path.clone(),
            size: span.size,
            mtime: span.mtime,
        })
    }

    pub fn files(&self) -> impl Iterator<Item = FileRecord> + '_ {
        (0..self.file_count()).filter_map(move |id| self.file(id))
    }

    /// Posting list for a trigram; empty when the trigram does not occur.
    pub fn lookup(&self, tri: Trigram) -> PostingList<'_> {
        let dir = self.trigrams.bytes();
        let count = dir.len() / TRIGRAM_ENTRY_LEN;
        let mut lo = 0usize;
        let mut hi = count;
        while lo < hi {
            let mid = (lo + hi) / 2;
            let entry = mid * TRIGRAM_ENTRY_LEN;
            let t = read_u32(dir, entry);
            match t.cmp(&tri) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => {
                    let off = read_u32(dir, entry + 4) as usize;
                    let len = read_u32(dir, entry + 8) as usize;
                    return PostingList::new(&self.postings.bytes()[off..off + len]);
                }
            }
        }
        PostingList::new(&[])
    }

    /// Raw file bytes from the packed content store.
    pub fn read_file(&self, id: FileId) -> Result<&[u8]> {
        let span = self
            .spans
            .get(id as usize)
            .ok_or(Error::UnknownFileId(id))?;
        let start = span.offset as usize;
        let end = start + span.size as usize;
        Ok(&self.content.bytes()[start..end])
    }

    /// Files the indexer rejected while building this generation, with the
    /// reason for each. Informational; an absent or unreadable record reads
    /// as empty.
    pub fn excluded_files(&self) -> Vec<crate::build::ExcludedFile> {
        std::fs::read(self.dir.join(super::EXCLUDED_FILE))
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    /// Byte offsets of line starts in file `id`, computed on demand and
    /// cached. Offset 0 is always present; a trailing newline does not open
    /// a new line.
    pub fn line_offsets(&self, id: FileId) -> Result<Arc<Vec<u32>>> {
        if let Some(v) = self.line_cache.lock().get(&id) {
            return Ok(v.clone());
        }
        let bytes = self.read_file(id)?;
        let mut starts: Vec<u32> = vec![0];
        for (i, &b) in bytes.iter().enumerate() {
            if b == b'\n' {
                let next = i + 1;
                if next < bytes.len() {
                    starts.push(next as u32);
                }
            }
        }
        let starts = Arc::new(starts);
        self.line_cache.lock().put(id, starts.clone());
        Ok(starts)
    }
}

impl std::fmt::Debug for IndexReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexReader")
            .field("dir", &self.dir)
            .field("generation", &self.manifest.generation)
            .field("files", &self.manifest.file_count)
            .field("trigrams", &self.manifest.trigram_count)
            .finish()
    }
}

/// Lazy varint-delta decoder over one posting list's byte view. The first
/// delta is absolute (against zero).
pub struct PostingList<'a> {
    data: &'a [u8],
    off: usize,
    prev: FileId,
}

impl<'a> PostingList<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            off: 0,
            prev: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Iterator for PostingList<'_> {
    type Item = FileId;

    fn next(&mut self) -> Option<FileId> {
        if self.off >= self.data.len() {
            return None;
        }
        let delta = read_var_u32(self.data, &mut self.off).ok()?;
        let id = self.prev.wrapping_add(delta);
        self.prev = id;
        Some(id)
    }
}

fn decode_paths(files: &[u8], files_idx: &[u8], file_count: u32) -> Result<Vec<String>> {
    if files_idx.len() != file_count as usize * 8 {
        return Err(Error::Corrupt(format!(
            "files.idx length {} does not match file_count {}",
            files_idx.len(),
            file_count
        )));
    }
    let mut paths = Vec::with_capacity(file_count as usize);
    for i in 0..file_count as usize {
        let off = read_u64(files_idx, i * 8) as usize;
        if off % 8 != 0 || off + 4 > files.len() {
            return Err(Error::Corrupt(format!("files offset {} out of bounds", off)));
        }
        let len = read_u32(files, off) as usize;
        let start = off + 4;
        if start + len > files.len() {
            return Err(Error::Corrupt(format!(
                "path at offset {} overruns files table",
                off
            )));
        }
        let s = std::str::from_utf8(&files[start..start + len])
            .map_err(|_| Error::Corrupt(format!("path at offset {} is not UTF-8", off)))?;
        paths.push(s.to_string());
    }
    Ok(paths)
}

fn decode_spans(buf: &[u8], file_count: u32, content_len: usize) -> Result<Vec<ContentSpan>> {
    if buf.len() != file_count as usize * CONTENT_ENTRY_LEN {
        return Err(Error::Corrupt(format!(
            "content.idx length {} does not match file_count {}",
            buf.len(),
            file_count
        )));
    }
    let mut spans = Vec::with_capacity(file_count as usize);
    let mut prev_end = 0u64;
    for i in 0..file_count as usize {
        let base = i * CONTENT_ENTRY_LEN;
        let span = ContentSpan {
            offset: read_u64(buf, base),
            size: read_u64(buf, base + 8),
            mtime: read_u64(buf, base + 16),
        };
        if span.offset < prev_end || span.offset + span.size > content_len as u64 {
            return Err(Error::Corrupt(format!(
                "content span {} out of bounds ({}+{} > {})",
                i, span.offset, span.size, content_len
            )));
        }
        prev_end = span.offset + span.size;
        spans.push(span);
    }
    Ok(spans)
}

fn validate_trigram_dir(dir: &[u8], trigram_count: u32, postings_len: usize) -> Result<()> {
    if dir.len() != trigram_count as usize * TRIGRAM_ENTRY_LEN {
        return Err(Error::Corrupt(format!(
            "trigrams.idx length {} does not match trigram_count {}",
            dir.len(),
            trigram_count
        )));
    }
    let mut prev: Option<u32> = None;
    for i in 0..trigram_count as usize {
        let entry = i * TRIGRAM_ENTRY_LEN;
        let tri = read_u32(dir, entry);
        if tri > 0x00FF_FFFF {
            return Err(Error::Corrupt(format!("trigram {:#x} exceeds 24 bits", tri)));
        }
        if let Some(p) = prev {
            if tri <= p {
                return Err(Error::Corrupt(format!(
                    "trigram directory not strictly ascending at entry {}",
                    i
                )));
            }
        }
        prev = Some(tri);
        let off = read_u32(dir, entry + 4) as usize;
        let len = read_u32(dir, entry + 8) as usize;
        if off + len > postings_len {
            return Err(Error::Corrupt(format!(
                "posting list for entry {} out of bounds ({}+{} > {})",
                i, off, len, postings_len
            )));
        }
    }
    Ok(())
}
