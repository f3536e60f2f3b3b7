//! Adapter construction
//!
//! The host hands a [`CreateRequest`] to an [`AdapterFactory`] from a spawned
//! task. Construction checks its epoch token once it has yielded, so a
//! source change made meanwhile turns the result into
//! [`Error::ConstructionCancelled`].

use crate::{
    backend::{DashAdapter, DashEngine, HlsAdapter, HlsEngine, ProgressiveAdapter},
    engine::{CorePlayer, QualityEngine},
    policy::SelectedSource,
    surface::SharedSurface,
    types::{Capabilities, PlayerConfig, SourceKind},
    Error, Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Builds a fresh HLS engine per source
pub type HlsEngineFactory = Arc<dyn Fn() -> Box<dyn HlsEngine> + Send + Sync>;

/// Builds a fresh DASH engine per source
pub type DashEngineFactory = Arc<dyn Fn() -> Box<dyn DashEngine> + Send + Sync>;

/// Everything needed to build one engine
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub selected: SelectedSource,
    pub config: PlayerConfig,
    pub capabilities: Capabilities,
    /// Host generation the result will be tagged with
    pub generation: u64,
}

#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn create(
        &self,
        request: CreateRequest,
        cancel: CancellationToken,
    ) -> Result<Box<dyn CorePlayer>>;
}

/// Builds adapters over one shared surface and optional MSE engines
#[derive(Clone)]
pub struct BackendFactory {
    surface: SharedSurface,
    hls: Option<HlsEngineFactory>,
    dash: Option<DashEngineFactory>,
}

impl BackendFactory {
    /// Without engines only native HLS and progressive sources can play
    pub fn new(surface: SharedSurface) -> Self {
        Self {
            surface,
            hls: None,
            dash: None,
        }
    }

    pub fn with_hls<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn HlsEngine> + Send + Sync + 'static,
    {
        self.hls = Some(Arc::new(factory));
        self
    }

    pub fn with_dash<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn DashEngine> + Send + Sync + 'static,
    {
        self.dash = Some(Arc::new(factory));
        self
    }

    /// Synchronous construction, no epoch check
    pub fn build(&self, request: &CreateRequest) -> Result<Box<dyn CorePlayer>> {
        let capacity = request.config.event_capacity;
        let source = request.selected.source.clone();
        let surface = Arc::clone(&self.surface);

        let core: Box<dyn CorePlayer> = match request.selected.kind {
            SourceKind::Hls => {
                let engine = match (&self.hls, request.capabilities.media_source) {
                    (Some(factory), true) => Some(factory()),
                    _ => None,
                };
                let adapter = HlsAdapter::new(engine, surface, source, &request.config)?;
                Box::new(QualityEngine::new(adapter, capacity))
            }
            SourceKind::Dash => {
                let factory = self.dash.as_ref().ok_or_else(|| {
                    Error::InvalidConfig("no DASH engine available".to_string())
                })?;
                let adapter = DashAdapter::new(factory(), surface, source, &request.config)?;
                Box::new(QualityEngine::new(adapter, capacity))
            }
            SourceKind::Progressive => {
                let adapter =
                    ProgressiveAdapter::new(surface, request.selected.alternatives.clone())?;
                Box::new(QualityEngine::new(adapter, capacity))
            }
        };
        Ok(core)
    }
}

#[async_trait]
impl AdapterFactory for BackendFactory {
    async fn create(
        &self,
        request: CreateRequest,
        cancel: CancellationToken,
    ) -> Result<Box<dyn CorePlayer>> {
        // Let a competing set_source land before committing to this one
        tokio::task::yield_now().await;
        if cancel.is_cancelled() {
            return Err(Error::ConstructionCancelled);
        }

        let core = self.build(&request)?;
        debug!(
            core = %core.name(),
            generation = request.generation,
            "Adapter constructed"
        );
        Ok(core)
    }
}
