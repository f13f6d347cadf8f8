// Copyright 2026 Hound Project
// Derived from hound-search/hound (https://github.com/hound-search/hound)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::error;
use std::fmt::{self, Display};

/// Typed errors returned by index build and read operations.
#[derive(Debug)]
pub enum Error {
    /// The on-disk index failed validation (bad magic, wrong version,
    /// truncated section, non-monotonic directory, offset out of bounds).
    /// The owning searcher treats this as "no current index, rebuild".
    Corrupt(String),
    /// Underlying I/O failure.
    Io(std::io::Error),
    /// File exceeds the configured size cap.
    TooLarge { path: String, size: u64, limit: u64 },
    /// File failed the binary-content heuristic.
    NotText { path: String },
    /// FileId not present in this generation's file table.
    UnknownFileId(u32),
    /// Build canceled cooperatively between file ingests.
    Canceled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Corrupt(s) => write!(f, "corrupt index: {}", s),
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::TooLarge { path, size, limit } => {
                write!(f, "file too large: {} ({} > {} bytes)", path, size, limit)
            }
            Error::NotText { path } => write!(f, "not a text file: {}", path),
            Error::UnknownFileId(id) => write!(f, "unknown file id: {}", id),
            Error::Canceled => write!(f, "canceled"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl Error {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::Corrupt(_))
    }

    /// Rejections the indexer downgrades to a skip-with-log.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::TooLarge { .. } | Error::NotText { .. })
    }
}
