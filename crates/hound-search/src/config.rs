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

//! Validated configuration records. Field names and defaults follow the
//! service's JSON configuration surface; the file loader here is a thin
//! serde wrapper and callers may equally construct the records directly.

use std::collections::BTreeMap;
use std::error;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_TITLE: &str = "Hound";
const DEFAULT_HEALTH_CHECK_URI: &str = "/healthz";
const DEFAULT_RESULT_LIMIT: usize = 5000;
const DEFAULT_MAX_CONCURRENT_INDEXERS: usize = 2;
const DEFAULT_MS_BETWEEN_POLL: u64 = 30_000;
const DEFAULT_VCS: &str = "git";
const DEFAULT_BASE_URL: &str = "{url}/blob/{rev}/{path}{anchor}";
const DEFAULT_ANCHOR: &str = "#L{line}";
const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;

#[derive(Debug)]
pub struct ConfigError(pub String);

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid config: {}", self.0)
    }
}

impl error::Error for ConfigError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dbpath: PathBuf,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub repos: BTreeMap<String, RepoConfig>,
    #[serde(rename = "max-concurrent-indexers", default = "default_max_indexers")]
    pub max_concurrent_indexers: usize,
    #[serde(rename = "health-check-uri", default = "default_health_check_uri")]
    pub health_check_uri: String,
    #[serde(rename = "result-limit", default = "default_result_limit")]
    pub result_limit: usize,
    /// Per-VCS defaults merged into each repo's own `vcs-config`. Never
    /// serialized back out; driver settings may carry credentials.
    #[serde(rename = "vcs-config", default, skip_serializing)]
    pub vcs_config: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub url: String,
    #[serde(rename = "display-name", default)]
    pub display_name: Option<String>,
    #[serde(rename = "ms-between-poll", default = "default_ms_between_poll")]
    pub ms_between_poll: u64,
    #[serde(default = "default_vcs")]
    pub vcs: String,
    #[serde(rename = "url-pattern", default)]
    pub url_pattern: UrlPattern,
    #[serde(rename = "exclude-dot-files", default)]
    pub exclude_dot_files: bool,
    #[serde(rename = "enable-poll-updates", default = "default_true")]
    pub enable_poll_updates: bool,
    #[serde(rename = "enable-push-updates", default)]
    pub enable_push_updates: bool,
    #[serde(rename = "auto-generated-files", default)]
    pub auto_generated_files: Vec<String>,
    #[serde(rename = "max-file-size", default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Driver-specific settings, opaque to the core. Never serialized back
    /// out.
    #[serde(rename = "vcs-config", default, skip_serializing)]
    pub vcs_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlPattern {
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_anchor")]
    pub anchor: String,
}

impl Default for UrlPattern {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            anchor: default_anchor(),
        }
    }
}

impl UrlPattern {
    /// Render a source link for a match, expanding the `{url}`, `{rev}`,
    /// `{path}`, `{anchor}` and `{line}` placeholders.
    pub fn render(&self, url: &str, rev: &str, path: &str, line: Option<u32>) -> String {
        let anchor = match line {
            Some(n) => self.anchor.replace("{line}", &n.to_string()),
            None => String::new(),
        };
        self.base_url
            .replace("{url}", url.trim_end_matches(".git"))
            .replace("{rev}", rev)
            .replace("{path}", path)
            .replace("{anchor}", &anchor)
    }
}

impl RepoConfig {
    pub fn display_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.display_name.as_deref().unwrap_or(name)
    }

    pub fn index_options(&self) -> hound_index::IndexOptions {
        hound_index::IndexOptions {
            max_file_size: self.max_file_size,
            exclude_dot_files: self.exclude_dot_files,
            auto_generated_files: self.auto_generated_files.clone(),
        }
    }
}

impl Config {
    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        let bytes = std::fs::read(path.as_ref())?;
        let mut cfg: Config = serde_json::from_slice(&bytes)?;
        cfg.merge_vcs_configs();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Merge the global per-VCS defaults into each repo's own `vcs-config`.
    /// Repo-level keys win over global ones.
    pub fn merge_vcs_configs(&mut self) {
        if self.vcs_config.is_empty() {
            return;
        }
        for repo in self.repos.values_mut() {
            let Some(globals) = self.vcs_config.get(&repo.vcs).and_then(|v| v.as_object())
            else {
                continue;
            };
            let mut merged = match repo.vcs_config.take() {
                Some(serde_json::Value::Object(m)) => m,
                _ => serde_json::Map::new(),
            };
            for (key, value) in globals {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
            repo.vcs_config = Some(serde_json::Value::Object(merged));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dbpath.as_os_str().is_empty() {
            return Err(ConfigError("dbpath is required".into()));
        }
        if self.result_limit == 0 {
            return Err(ConfigError("result-limit must be positive".into()));
        }
        if self.max_concurrent_indexers == 0 {
            return Err(ConfigError(
                "max-concurrent-indexers must be positive".into(),
            ));
        }
        for (name, repo) in &self.repos {
            if repo.url.is_empty() {
                return Err(ConfigError(format!("repo {}: url is required", name)));
            }
            if crate::vcs::driver_for(&repo.vcs, &repo.url).is_none() {
                return Err(ConfigError(format!(
                    "repo {}: unknown vcs {:?}",
                    name, repo.vcs
                )));
            }
        }
        Ok(())
    }
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}
fn default_health_check_uri() -> String {
    DEFAULT_HEALTH_CHECK_URI.to_string()
}
fn default_result_limit() -> usize {
    DEFAULT_RESULT_LIMIT
}
fn default_max_indexers() -> usize {
    DEFAULT_MAX_CONCURRENT_INDEXERS
}
fn default_ms_between_poll() -> u64 {
    DEFAULT_MS_BETWEEN_POLL
}
fn default_vcs() -> String {
    DEFAULT_VCS.to_string()
}
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_anchor() -> String {
    DEFAULT_ANCHOR.to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "dbpath": "/var/lib/hound",
                "repos": {
                    "hound": { "url": "https://github.com/hound-search/hound.git" }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.title, "Hound");
        assert_eq!(cfg.max_concurrent_indexers, 2);
        assert_eq!(cfg.health_check_uri, "/healthz");
        assert_eq!(cfg.result_limit, 5000);

        let repo = &cfg.repos["hound"];
        assert_eq!(repo.ms_between_poll, 30_000);
        assert_eq!(repo.vcs, "git");
        assert!(repo.enable_poll_updates);
        assert!(!repo.enable_push_updates);
        assert!(!repo.exclude_dot_files);
        assert!(repo.auto_generated_files.is_empty());
        assert_eq!(repo.url_pattern.base_url, "{url}/blob/{rev}/{path}{anchor}");
        assert_eq!(repo.url_pattern.anchor, "#L{line}");
        assert_eq!(repo.display_name("hound"), "hound");
        cfg.validate().unwrap();
    }

    #[test]
    fn dashed_overrides_parse() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "dbpath": "/data",
                "max-concurrent-indexers": 4,
                "result-limit": 100,
                "repos": {
                    "x": {
                        "url": "https://example.com/x.git",
                        "display-name": "Project X",
                        "ms-between-poll": 5000,
                        "exclude-dot-files": true,
                        "enable-poll-updates": false,
                        "auto-generated-files": ["*.pb.go"]
                    }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.max_concurrent_indexers, 4);
        assert_eq!(cfg.result_limit, 100);
        let repo = &cfg.repos["x"];
        assert_eq!(repo.display_name("x"), "Project X");
        assert_eq!(repo.ms_between_poll, 5000);
        assert!(repo.exclude_dot_files);
        assert!(!repo.enable_poll_updates);
        assert_eq!(repo.auto_generated_files, vec!["*.pb.go"]);
    }

    #[test]
    fn validation_rejects_bad_configs() {
        let cfg: Config = serde_json::from_str(r#"{ "dbpath": "" }"#).unwrap();
        assert!(cfg.validate().is_err());

        let cfg: Config = serde_json::from_str(
            r#"{
                "dbpath": "/data",
                "repos": { "x": { "url": "https://e.com/x.git", "vcs": "fossil" } }
            }"#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn vcs_config_merges_globals_under_repo_overrides() {
        let mut cfg: Config = serde_json::from_str(
            r#"{
                "dbpath": "/data",
                "vcs-config": {
                    "git": { "ref": "main", "detect-ref": true }
                },
                "repos": {
                    "plain": { "url": "https://e.com/plain.git" },
                    "pinned": {
                        "url": "https://e.com/pinned.git",
                        "vcs-config": { "ref": "release" }
                    }
                }
            }"#,
        )
        .unwrap();
        cfg.merge_vcs_configs();

        let plain = cfg.repos["plain"].vcs_config.as_ref().unwrap();
        assert_eq!(plain["ref"], "main");
        assert_eq!(plain["detect-ref"], true);

        let pinned = cfg.repos["pinned"].vcs_config.as_ref().unwrap();
        assert_eq!(pinned["ref"], "release");
        assert_eq!(pinned["detect-ref"], true);
    }

    #[test]
    fn vcs_config_never_serializes() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "dbpath": "/data",
                "vcs-config": { "git": { "token": "secret" } },
                "repos": {
                    "x": {
                        "url": "https://e.com/x.git",
                        "vcs-config": { "token": "secret" }
                    }
                }
            }"#,
        )
        .unwrap();
        let out = serde_json::to_string(&cfg).unwrap();
        assert!(!out.contains("secret"));
        assert!(!out.contains("vcs-config"));
    }

    #[test]
    fn url_pattern_renders_links() {
        let p = UrlPattern::default();
        assert_eq!(
            p.render(
                "https://github.com/org/repo.git",
                "abc123",
                "src/main.rs",
                Some(42)
            ),
            "https://github.com/org/repo/blob/abc123/src/main.rs#L42"
        );
        assert_eq!(
            p.render("https://github.com/org/repo", "abc123", "README.md", None),
            "https://github.com/org/repo/blob/abc123/README.md"
        );
    }
}
