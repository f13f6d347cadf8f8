//! Name-to-searcher map constructed at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::Config;
use crate::searcher::{Searcher, SearcherState};
use crate::vcs;

pub struct SearcherRegistry {
    searchers: BTreeMap<String, Arc<Searcher>>,
}

impl SearcherRegistry {
    /// Spawn one searcher per configured repo and wait for every initial
    /// build to settle. Initial builds run in parallel, bounded by
    /// `max-concurrent-indexers`.
    ///
    /// Repos whose first build fails stay registered (they keep retrying
    /// with backoff and report as unavailable per query) and are returned
    /// in the error map so startup can log them.
    pub async fn make_all(cfg: &Config) -> anyhow::Result<(Self, BTreeMap<String, String>)> {
        std::fs::create_dir_all(&cfg.dbpath)?;
        let permits = Arc::new(Semaphore::new(cfg.max_concurrent_indexers));
        let mut searchers = BTreeMap::new();
        for (name, repo) in &cfg.repos {
            let driver = vcs::driver_for(&repo.vcs, &repo.url).ok_or_else(|| {
                anyhow::anyhow!("repo {}: unknown vcs {:?}", name, repo.vcs)
            })?;
            let searcher = Searcher::spawn(
                name.clone(),
                repo.clone(),
                &cfg.dbpath,
                Arc::from(driver),
                permits.clone(),
            );
            searchers.insert(name.clone(), searcher);
        }

        let mut errors = BTreeMap::new();
        for (name, searcher) in &searchers {
            let mut state = searcher.subscribe_state();
            // The first build is absorbed into Initializing; the state moves
            // straight to Ready or Failed (or Stopped under early shutdown).
            let settled = state
                .wait_for(|s| {
                    matches!(
                        s,
                        SearcherState::Ready | SearcherState::Failed | SearcherState::Stopped
                    )
                })
                .await
                .map(|s| *s);
            match settled {
                Ok(SearcherState::Failed) => {
                    warn!(repo = %name, "initial index build failed");
                    errors.insert(name.clone(), "initial index build failed".to_string());
                }
                Ok(_) => info!(repo = %name, "searcher ready"),
                Err(_) => {
                    errors.insert(name.clone(), "searcher task exited".to_string());
                }
            }
        }
        Ok((Self { searchers }, errors))
    }

    /// Registry over already-spawned searchers; used by tests and embedders.
    pub fn from_searchers(searchers: BTreeMap<String, Arc<Searcher>>) -> Self {
        Self { searchers }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Searcher>> {
        self.searchers.get(name)
    }

    pub fn len(&self) -> usize {
        self.searchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.searchers.is_empty()
    }

    /// Searchers in name-ascending order; the query engine relies on this
    /// for stable truncation.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<Searcher>)> {
        self.searchers.iter()
    }

    /// Graceful shutdown of every searcher: signal all, then wait for all.
    pub async fn stop_all(&self) {
        for searcher in self.searchers.values() {
            searcher.stop();
        }
        for searcher in self.searchers.values() {
            searcher.wait().await;
        }
    }
}
