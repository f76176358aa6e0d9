//! Application context shared by every CLI command.

use std::future::Future;
use std::path::PathBuf;

use tokio::runtime::Runtime;

use crate::cancel::CancelToken;
use crate::cli::Cli;
use crate::config::{Config, default_data_dir};
use crate::engine::RetrievalEngine;
use crate::error::Result;

pub struct AppContext {
    pub config: Config,
    pub engine: RetrievalEngine,
    /// Emit JSON envelopes on stdout instead of human output.
    pub json_mode: bool,
    runtime: Runtime,
}

impl AppContext {
    /// Resolve config from CLI flags and open the engine.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
        let config = Config::load(cli.config.as_deref(), &data_dir)?;
        Self::with_config(config, cli.json)
    }

    pub fn with_config(config: Config, json_mode: bool) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let engine = RetrievalEngine::open(config.clone())?;
        Ok(Self {
            config,
            engine,
            json_mode,
            runtime,
        })
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.config.storage.data_dir.clone()
    }

    /// Token that fires on Ctrl-C.
    #[must_use]
    pub fn cancel_on_interrupt(&self) -> CancelToken {
        let token = CancelToken::new();
        let watcher = token.clone();
        self.runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted; cancelling");
                watcher.cancel();
            }
        });
        token
    }

    /// Drive an engine future to completion on the context runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
