use std::path::Path;
use std::sync::Arc;

use tracing::info;

use seekcore_config::{ConfigError, RebuildMode, Settings};
use seekcore_index::{
    reindex, IndexError, RebuildStrategy, ReindexOptions, ReindexProgress, ReindexSummary,
    SqliteStore,
};
use seekcore_query::{FuzzyEngine, RankedHit, SearchOptions, SearchRequest};
use seekcore_shell::{ShellActions, ShellError, ViewerLauncher};

mod search_service;

pub use search_service::{SearchService, SearchSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Shell(#[from] ShellError),
}

/// Owns the store handle and wires settings into indexing, search and viewer launch.
pub struct AppService {
    settings: Settings,
    store: Arc<SqliteStore>,
    launcher: ViewerLauncher,
}

impl AppService {
    pub fn open(settings: Settings) -> Result<Self, ServiceError> {
        let store = SqliteStore::open(&settings.db_path)?;
        info!(db = %settings.db_path.display(), "store opened");
        Ok(Self::with_store(settings, Arc::new(store)))
    }

    pub fn load(config_path: &Path) -> Result<Self, ServiceError> {
        Self::open(Settings::load(config_path)?)
    }

    pub fn with_store(settings: Settings, store: Arc<SqliteStore>) -> Self {
        let launcher = ViewerLauncher::new(settings.viewer.clone());
        Self {
            settings,
            store,
            launcher,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            limit: self.settings.search.result_limit,
            score_threshold: self.settings.search.score_threshold,
            candidate_cap: self.settings.search.candidate_cap,
        }
    }

    pub fn reindex_options(&self) -> ReindexOptions {
        ReindexOptions {
            batch_size: self.settings.index.batch_size,
            strategy: match self.settings.index.strategy {
                RebuildMode::Swap => RebuildStrategy::Swap,
                RebuildMode::TruncateFirst => RebuildStrategy::TruncateFirst,
            },
            cancel: None,
        }
    }

    pub fn reindex<F>(&self, on_progress: F) -> Result<ReindexSummary, ServiceError>
    where
        F: FnMut(ReindexProgress),
    {
        self.reindex_with(&self.reindex_options(), on_progress)
    }

    pub fn reindex_with<F>(
        &self,
        options: &ReindexOptions,
        on_progress: F,
    ) -> Result<ReindexSummary, ServiceError>
    where
        F: FnMut(ReindexProgress),
    {
        Ok(reindex(
            &self.settings.root_dir,
            &self.store,
            options,
            on_progress,
        )?)
    }

    pub fn start_search(&self, query: String, generation: u64) -> SearchRequest {
        SearchRequest {
            generation,
            query,
            options: self.search_options(),
        }
    }

    pub fn search(&self, query: &str) -> Result<Vec<RankedHit>, ServiceError> {
        Ok(seekcore_query::search(
            query,
            self.store.as_ref(),
            &self.search_options(),
        )?)
    }

    pub fn launch_viewer(&self, path: &Path) -> Result<(), ServiceError> {
        Ok(self.launcher.launch_viewer(path)?)
    }

    /// Spawns a latest-wins search worker sharing this service's store.
    /// Must be called from within a tokio runtime.
    pub fn spawn_search_service(&self) -> SearchService {
        let engine = Arc::new(FuzzyEngine::new(Arc::clone(&self.store)));
        SearchService::spawn(engine, self.search_options())
    }
}
