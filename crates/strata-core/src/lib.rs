//! Strata Core - quality reconciliation for web-style video playback
//!
//! This crate puts one quality-level model over three playback backends:
//! - HLS through an MSE engine, or natively on the media surface
//! - DASH through a track-based MSE engine
//! - progressive files, one per rendition
//!
//! Hosts see sorted playlists, stable quality IDs, switch events and a
//! single ready signal regardless of the backend underneath.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Strata Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │    Source    │  │   Adapter    │  │    Event     │           │
//! │  │    Policy    │  │   Factory    │  │     Bus      │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │   Player    │                              │
//! │                    │   (host)    │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │                    ┌──────┴──────┐     ┌──────────────┐         │
//! │                    │   Quality   │─────│ Quality ID   │         │
//! │                    │   Engine    │     │    Codec     │         │
//! │                    └──────┬──────┘     └──────────────┘         │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴───────┐  ┌──────────────┐           │
//! │  │     HLS      │  │     DASH     │  │ Progressive  │           │
//! │  │   Adapter    │  │   Adapter    │  │   Adapter    │           │
//! │  └──────────────┘  └──────────────┘  └──────────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod backend;
pub mod engine;
pub mod error;
pub mod events;
pub mod factory;
pub mod host;
pub mod policy;
pub mod quality;
#[cfg(feature = "sim")]
pub mod sim;
pub mod surface;
pub mod types;

pub use adapter::{Adapter, AdapterSignal};
pub use engine::{CorePlayer, QualityEngine};
pub use error::{Error, Result};
pub use events::{EventBus, PlayerEvent};
pub use factory::{AdapterFactory, BackendFactory, CreateRequest};
pub use host::Player;
pub use policy::{DefaultSourcePolicy, SelectedSource, SourcePolicy};
pub use quality::AUTO_QUALITY_ID;
pub use surface::{SharedSurface, Surface, SurfaceEvent};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library
pub fn init() {
    tracing::info!(version = VERSION, "Strata Core initialized");
}
