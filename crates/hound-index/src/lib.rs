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

//! Per-repository trigram index engine: on-disk posting store, mmap'd
//! reader, tree-walking indexer, and the regex-to-trigram query pipeline.
//!
//! One committed index generation is a self-contained directory; the
//! `manifest` file inside it is written last and acts as the commit record.

pub mod build;
pub mod error;
pub mod prefilter;
pub mod search;
pub mod store;
pub mod trigram;

pub use crate::build::{build_index, ExcludedFile, IndexOptions};
pub use crate::error::{Error, Result};
pub use crate::prefilter::{lower, TrigramExpr};
pub use crate::search::{FileScan, IndexSearcher, LineMatch, ScanOpts};
pub use crate::store::reader::{FileRecord, IndexReader};
pub use crate::store::writer::IndexWriter;
pub use crate::store::FileId;
