//! Query execution: compile one request, fan out across searchers in
//! alphabetical order, confirm candidates on a bounded blocking pool, and
//! assemble a bounded, line-annotated response envelope.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::warn;

use hound_index::{lower, IndexReader, IndexSearcher, LineMatch, ScanOpts, TrigramExpr};

use crate::error::SearchError;
use crate::registry::SearcherRegistry;

/// One search request. `max_matches` is clamped to the server's
/// `result-limit`; zero means "use the server limit".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub pattern: String,
    /// Optional regex over file paths.
    #[serde(default)]
    pub files: Option<String>,
    /// Restrict to these repo names; `None` searches all.
    #[serde(default)]
    pub repos: Option<BTreeSet<String>>,
    #[serde(default)]
    pub ignore_case: bool,
    #[serde(default)]
    pub max_matches: usize,
    /// Stop scanning a file after this many matches; 0 is unbounded.
    #[serde(default)]
    pub max_matches_per_file: usize,
    /// Stop scanning a repo after this many matching files; 0 is unbounded.
    #[serde(default)]
    pub max_files_per_repo: usize,
    #[serde(default)]
    pub context_lines: usize,
}

/// Cooperative cancellation, checked between candidate confirmations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMatches {
    pub path: String,
    pub matches: Vec<LineMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoResult {
    pub revision: Option<String>,
    pub files: Vec<FileMatches>,
    /// Per-repo failure (e.g. no index available); the envelope itself
    /// still succeeds.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: BTreeMap<String, RepoResult>,
    /// More matches existed beyond the returned set (limit, deadline, or
    /// cancellation).
    pub truncated: bool,
}

pub struct QueryEngine {
    registry: Arc<SearcherRegistry>,
    result_limit: usize,
    scan_permits: Arc<Semaphore>,
}

impl QueryEngine {
    pub fn new(registry: Arc<SearcherRegistry>, result_limit: usize) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            registry,
            result_limit,
            scan_permits: Arc::new(Semaphore::new(workers)),
        }
    }

    /// Execute one query. Repos are visited in name-ascending order so
    /// truncation is stable; a failing repo contributes a per-repo error
    /// rather than failing the query.
    pub async fn search(
        &self,
        req: &SearchRequest,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<SearchResponse, SearchError> {
        if req.pattern.is_empty() {
            return Err(SearchError::QueryInvalid("empty pattern".into()));
        }
        let content_re = regex::bytes::RegexBuilder::new(&req.pattern)
            .case_insensitive(req.ignore_case)
            .build()
            .map_err(|e| SearchError::QueryInvalid(e.to_string()))?;
        let path_re = match req.files.as_deref() {
            Some(f) if !f.is_empty() => Some(
                regex::RegexBuilder::new(f)
                    .case_insensitive(req.ignore_case)
                    .build()
                    .map_err(|e| SearchError::QueryInvalid(e.to_string()))?,
            ),
            _ => None,
        };
        let max_matches = if req.max_matches == 0 {
            self.result_limit
        } else {
            req.max_matches.min(self.result_limit)
        };
        let expr = lower(&req.pattern, req.ignore_case);

        let mut results: BTreeMap<String, RepoResult> = BTreeMap::new();
        let mut truncated = false;
        let mut remaining = max_matches;
        for (name, searcher) in self.registry.iter() {
            if let Some(filter) = &req.repos {
                if !filter.contains(name) {
                    continue;
                }
            }
            if cancel.is_canceled() || past(deadline) {
                truncated = true;
                break;
            }
            let reader = match searcher.current() {
                Ok(r) => r,
                Err(e) => {
                    results.insert(
                        name.clone(),
                        RepoResult {
                            revision: None,
                            files: Vec::new(),
                            error: Some(e.to_string()),
                        },
                    );
                    continue;
                }
            };
            if remaining == 0 {
                // The budget is spent; the envelope is only truncated if this
                // repo could still contribute. Candidates are a superset of
                // matches, so an empty set proves nothing was dropped.
                let has_candidates = {
                    let searcher = IndexSearcher::new(&reader);
                    !searcher.candidates(&expr, path_re.as_ref()).is_empty()
                };
                if has_candidates {
                    truncated = true;
                    break;
                }
                continue;
            }

            let permit = self
                .scan_permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| SearchError::QueryInvalid("engine shut down".into()))?;
            let scan = {
                let reader = reader.clone();
                let expr = expr.clone();
                let content_re = content_re.clone();
                let path_re = path_re.clone();
                let cancel = cancel.clone();
                let context_lines = req.context_lines;
                let max_matches_per_file = req.max_matches_per_file;
                let max_files_per_repo = req.max_files_per_repo;
                tokio::task::spawn_blocking(move || {
                    scan_repo(
                        &reader,
                        &expr,
                        &content_re,
                        path_re.as_ref(),
                        context_lines,
                        max_matches_per_file,
                        max_files_per_repo,
                        remaining,
                        &cancel,
                        deadline,
                    )
                })
                .await
                .map_err(|e| SearchError::QueryInvalid(format!("scan task failed: {}", e)))?
            };
            drop(permit);

            remaining -= scan.emitted.min(remaining);
            if scan.cut {
                truncated = true;
            }
            results.insert(
                name.clone(),
                RepoResult {
                    revision: searcher.revision(),
                    files: scan.files,
                    error: None,
                },
            );
        }

        Ok(SearchResponse { results, truncated })
    }
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.map(|d| Instant::now() >= d).unwrap_or(false)
}

struct RepoScan {
    files: Vec<FileMatches>,
    emitted: usize,
    cut: bool,
}

/// Candidate selection plus confirmation for one repo, visiting candidates
/// in path-ascending order. Honors cancellation and deadline between file
/// confirmations.
#[allow(clippy::too_many_arguments)]
fn scan_repo(
    reader: &IndexReader,
    expr: &TrigramExpr,
    content_re: &regex::bytes::Regex,
    path_re: Option<&regex::Regex>,
    context_lines: usize,
    max_matches_per_file: usize,
    max_files_per_repo: usize,
    budget: usize,
    cancel: &CancelToken,
    deadline: Option<Instant>,
) -> RepoScan {
    let searcher = IndexSearcher::new(reader);
    let candidates = searcher.candidates(expr, path_re);
    let mut files = Vec::new();
    let mut emitted = 0usize;
    let mut remaining = budget;
    let mut cut = false;
    for id in candidates {
        if remaining == 0 {
            // Unconfirmed candidates remain; report a cut rather than scan
            // past the budget.
            cut = true;
            break;
        }
        if cancel.is_canceled() || past(deadline) {
            cut = true;
            break;
        }
        if max_files_per_repo != 0 && files.len() == max_files_per_repo {
            cut = true;
            break;
        }
        let per_file_cap = match max_matches_per_file {
            0 => remaining,
            n => n.min(remaining),
        };
        let opts = ScanOpts {
            context_lines,
            max_matches_per_file: per_file_cap,
        };
        let scan = match searcher.confirm(id, content_re, &opts) {
            Ok(s) => s,
            Err(e) => {
                warn!(file_id = id, error = %e, "confirmation scan failed");
                continue;
            }
        };
        if scan.truncated {
            cut = true;
        }
        if scan.matches.is_empty() {
            continue;
        }
        emitted += scan.matches.len();
        remaining -= scan.matches.len();
        files.push(FileMatches {
            path: reader.path(id).unwrap_or_default().to_string(),
            matches: scan.matches,
        });
    }
    RepoScan {
        files,
        emitted,
        cut,
    }
}
