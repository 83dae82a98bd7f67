//! # Ironsight Engine Library (ironsight-engine)
//!
//! Arrow-impact localization: ingests per-node sensor bundles over UDP,
//! fuses bundles describing one strike, locates the impact from channel
//! energy and arrival-time differences, corrects it with a fitted
//! calibration and scores it into the active session.
//!
//! **Architecture:** listener tasks → correlator task → scoring processor,
//! connected by tokio channels; results fan out through the
//! [`EventBus`](ironsight_common::events::EventBus) to SSE subscribers.

pub mod api;
pub mod calibration;
pub mod config;
pub mod error;
pub mod fusion;
pub mod ingest;
pub mod localization;
pub mod pipeline;
pub mod scoring;
pub mod state;

pub use error::{Error, Result};
pub use pipeline::Pipeline;
pub use state::SharedState;
