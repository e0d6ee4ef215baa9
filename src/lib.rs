//! Composable, stateful dataflow blocks for in-process stream processing.
//!
//! A block accepts items on its input side, handles them one at a time in
//! arrival order on a dedicated thread, and pushes results to its output side.
//! Blocks are linked into pipelines, and completion and faults travel forward
//! along links that request propagation.
//!
//! # Features
//!
//! - A small block contract: [`Target`], [`Source`], [`DataflowBlock`]
//! - A one-shot [`Completion`] latch that can be waited on, observed or awaited
//! - Windowed accumulation with gap filling ([`blocks::WindowStage`])
//! - Out-of-order reassembly ([`blocks::ReorderStage`])
//! - Contiguous grouping, fixed-size batching and weight-threshold chunking
//! - Input/result pairing around an inner block ([`blocks::AggregatorBlock`])
//! - Wall-clock pacing ([`blocks::PaceBlock`])
//! - Keyed fan-out into replicated sub-pipelines with joint completion
//!   ([`PartitionBlock`])
//! - Per-block metrics: throughput and latency percentiles
//!
//! # Example
//!
//! ```ignore
//! use stream_blocks::{PipelineBuilder, Source, Target, DataflowBlock};
//!
//! let pipeline = PipelineBuilder::new()?
//!     .map(|i: u64| Ok(i * 2))?
//!     .chunk(10, |i| Ok(*i))?
//!     .build();
//!
//! for i in 1..=5 {
//!     pipeline.submit(i).ok();
//! }
//! pipeline.complete();
//! pipeline.completion().wait()?;
//! let chunks = pipeline.receive_all();
//! ```

pub mod block;
pub mod blocks;
pub mod buffer;
pub mod completion;
pub mod error;
pub mod link;
pub mod metrics;
pub mod partition;
pub mod pipeline;
pub mod stage;
pub mod time;

// Re-exports for convenience
pub use block::{Block, BlockOptions, DataflowBlock, Propagator, Source, Target};
pub use buffer::Capacity;
pub use completion::{Completion, Outcome};
pub use error::{BlockError, BoxError, Result};
pub use link::LinkOptions;
pub use metrics::{BlockMetrics, MetricsSnapshot};
pub use partition::{PartitionBlock, PartitionSelector};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use stage::{ActionStage, Buffer, FilterStage, FlatMapStage, MapStage, Stage, TapStage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
