use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rayon::prelude::*;

use super::{
    write_var_u32, FileId, Manifest, CONTENT_FILE, CONTENT_IDX_FILE, FILES_FILE, FILES_IDX_FILE,
    MANIFEST_FILE, POSTINGS_FILE, TRIGRAMS_IDX_FILE, VERSION,
};
use crate::error::{Error, Result};
use crate::trigram::{file_trigram_set, Trigram};

/// Binary-content heuristic: a file is binary when its first 8 KiB contains
/// a NUL byte, more than 30% bytes outside the text set (TAB, LF, printable
/// ASCII, UTF-8 multibyte), or invalid UTF-8 in its high bytes. Carriage
/// returns count as weird bytes; CRLF files stay far below the threshold.
pub fn is_probably_binary(bytes: &[u8]) -> bool {
    let probe = &bytes[..bytes.len().min(8192)];
    if probe.is_empty() {
        return false;
    }
    let mut weird = 0usize;
    let mut high = false;
    for &b in probe {
        match b {
            0 => return true,
            b'\t' | b'\n' | 0x20..=0x7E => {}
            0x80..=0xFF => high = true,
            _ => weird += 1,
        }
    }
    if weird * 10 > probe.len() * 3 {
        return true;
    }
    if high {
        // High bytes must form valid UTF-8 sequences (a truncated final
        // character at the probe boundary is fine).
        return match std::str::from_utf8(probe) {
            Ok(_) => false,
            Err(e) => e.error_len().is_some(),
        };
    }
    false
}

struct ContentSpan {
    offset: u64,
    size: u64,
    mtime: u64,
}

/// Write side of the posting store. Accumulates one generation in a staging
/// directory; `finish` seals it by writing `manifest` last.
pub struct IndexWriter {
    dir: PathBuf,
    generation: u32,
    max_file_size: u64,
    paths: Vec<String>,
    spans: Vec<ContentSpan>,
    content: BufWriter<File>,
    content_len: u64,
    postings: HashMap<Trigram, Vec<FileId>>,
}

impl IndexWriter {
    pub fn begin(dir: impl AsRef<Path>, generation: u32, max_file_size: u64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let content = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join(CONTENT_FILE))?;
        Ok(Self {
            dir,
            generation,
            max_file_size,
            paths: Vec::new(),
            spans: Vec::new(),
            content: BufWriter::new(content),
            content_len: 0,
            postings: HashMap::new(),
        })
    }

    pub fn file_count(&self) -> u32 {
        self.paths.len() as u32
    }

    /// Ingest one file. FileIds are assigned in call order and never reused.
    pub fn add_file(&mut self, rel_path: &str, bytes: &[u8], mtime: u64) -> Result<FileId> {
        if bytes.len() as u64 > self.max_file_size {
            return Err(Error::TooLarge {
                path: rel_path.to_string(),
                size: bytes.len() as u64,
                limit: self.max_file_size,
            });
        }
        if is_probably_binary(bytes) {
            return Err(Error::NotText {
                path: rel_path.to_string(),
            });
        }
        let id = self.paths.len() as FileId;
        self.content.write_all(bytes)?;
        self.spans.push(ContentSpan {
            offset: self.content_len,
            size: bytes.len() as u64,
            mtime,
        });
        self.content_len += bytes.len() as u64;
        self.paths.push(rel_path.to_string());
        for t in file_trigram_set(bytes) {
            // ids arrive in ascending order, so each list stays sorted.
            self.postings.entry(t).or_default().push(id);
        }
        Ok(id)
    }

    /// Seal the generation: emit all sections, `manifest` last, fsync the
    /// files and then the directory. Returns the committed directory path.
    pub fn finish(self) -> Result<PathBuf> {
        let mut content = self
            .content
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        content.flush()?;
        content.sync_all()?;
        drop(content);

        let mut terms: Vec<(Trigram, Vec<FileId>)> = self.postings.into_iter().collect();
        terms.par_sort_unstable_by_key(|(t, _)| *t);

        let mut postings_buf: Vec<u8> = Vec::new();
        let mut trigrams_buf: Vec<u8> = Vec::with_capacity(terms.len() * 12);
        for (tri, ids) in &terms {
            let off = postings_buf.len();
            let mut prev: FileId = 0;
            for id in ids {
                write_var_u32(&mut postings_buf, id - prev);
                prev = *id;
            }
            let len = postings_buf.len() - off;
            trigrams_buf.extend_from_slice(&tri.to_le_bytes());
            trigrams_buf.extend_from_slice(&(off as u32).to_le_bytes());
            trigrams_buf.extend_from_slice(&(len as u32).to_le_bytes());
        }

        let mut files_buf: Vec<u8> = Vec::new();
        let mut files_idx_buf: Vec<u8> = Vec::with_capacity(self.paths.len() * 8);
        for path in &self.paths {
            files_idx_buf.extend_from_slice(&(files_buf.len() as u64).to_le_bytes());
            let b = path.as_bytes();
            files_buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
            files_buf.extend_from_slice(b);
            while files_buf.len() % 8 != 0 {
                files_buf.push(0);
            }
        }

        let mut content_idx_buf: Vec<u8> = Vec::with_capacity(self.spans.len() * 24);
        for span in &self.spans {
            content_idx_buf.extend_from_slice(&span.offset.to_le_bytes());
            content_idx_buf.extend_from_slice(&span.size.to_le_bytes());
            content_idx_buf.extend_from_slice(&span.mtime.to_le_bytes());
        }

        write_section(&self.dir, FILES_FILE, &files_buf)?;
        write_section(&self.dir, FILES_IDX_FILE, &files_idx_buf)?;
        write_section(&self.dir, TRIGRAMS_IDX_FILE, &trigrams_buf)?;
        write_section(&self.dir, POSTINGS_FILE, &postings_buf)?;
        write_section(&self.dir, CONTENT_IDX_FILE, &content_idx_buf)?;

        let manifest = Manifest {
            version: VERSION,
            generation: self.generation,
            file_count: self.paths.len() as u32,
            trigram_count: terms.len() as u32,
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        write_section(&self.dir, MANIFEST_FILE, &manifest.encode())?;

        // Persist the directory entry itself before the caller renames or
        // publishes this generation.
        #[cfg(unix)]
        File::open(&self.dir)?.sync_all()?;

        Ok(self.dir)
    }
}

fn write_section(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let mut f = File::create(dir.join(name))?;
    f.write_all(bytes)?;
    f.sync_all()?;
    Ok(())
}
