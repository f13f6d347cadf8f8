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

//! Service layer of the hound code-search engine: per-repository index
//! supervisors, the searcher registry, and the fan-out query engine.
//!
//! The HTTP/JSON adapter and UI are external; this crate exposes the types
//! they serialize and the operations they call.

pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod searcher;
pub mod vcs;

pub use crate::config::{Config, RepoConfig, UrlPattern};
pub use crate::engine::{
    CancelToken, FileMatches, QueryEngine, RepoResult, SearchRequest, SearchResponse,
};
pub use crate::error::SearchError;
pub use crate::registry::SearcherRegistry;
pub use crate::searcher::{Searcher, SearcherMetricsSnapshot, SearcherState};
pub use crate::vcs::{GitDriver, VcsDriver, VcsError};
