//! # Ironsight Common Library
//!
//! Shared code for the Ironsight impact-localization service including:
//! - Event types (IronsightEvent enum) and the EventBus
//! - Scoring, session and calibration payload types
//! - Bootstrap configuration loading
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, IronsightEvent, Mode};
