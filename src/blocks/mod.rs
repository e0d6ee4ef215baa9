//! Stateful blocks with temporal or ordering semantics.
//!
//! Except for [`PaceBlock`], which is driven by a timer, and
//! [`AggregatorBlock`], which wraps another block, each of these is a
//! [`Stage`](crate::Stage) meant to run inside a [`Block`](crate::Block).

pub mod aggregate;
pub mod batch;
pub mod chunk;
pub mod group;
pub mod pace;
pub mod reorder;
pub mod window;

pub use aggregate::AggregatorBlock;
pub use batch::BatchStage;
pub use chunk::ChunkStage;
pub use group::GroupStage;
pub use pace::{PaceBlock, MIN_PACE_INTERVAL};
pub use reorder::{Leftovers, ReorderSettings, ReorderStage, SequenceStart};
pub use window::{Accumulator, Window, WindowSettings, WindowStage};
