//! Multi-node bundle fusion
//!
//! [`HitBundle`](crate::ingest::HitBundle)s → [`FusedEvent`]s.

mod correlator;
mod event;
mod task;

pub use correlator::{CorrelationMode, Correlator};
pub use event::{FusedChannel, FusedEvent};
pub use task::{CorrelatorCommand, CorrelatorTask};
