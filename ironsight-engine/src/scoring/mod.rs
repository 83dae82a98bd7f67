//! Scoring & session state machine
//!
//! Corrected position → ring score, end/shot numbering, refractory
//! debounce and the shooting/scoring/calibration modes.

mod processor;
mod rings;
mod scorekeeper;
mod session;

pub use processor::{EngineCommand, EngineHandle, ScoringProcessor};
pub use rings::{RingTable, RING_COUNT};
pub use scorekeeper::{Disposition, Scorekeeper, StateSnapshot};
pub use session::{Session, SessionBook, SessionDetail};
