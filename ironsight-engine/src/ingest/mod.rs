//! Node ingestion
//!
//! UDP datagrams → validated, replay-checked [`HitBundle`]s.

mod bundle;
mod listener;
mod packet;
mod sequence;

pub use bundle::{ChannelLabel, ChannelSet, HitBundle, SensorChannelSample};
pub use listener::NodeListener;
pub use packet::{DropReason, IngestLimits, PacketError, PacketParser};
pub use sequence::SequenceTracker;
