//! Handler chains, the inclusion graph, and their streaming execution
//!
//! ## Key Components
//!
//! - [`ChainBuilder`] - Derives a file's step list from the extension registry
//! - [`ChainGraph`] - Arena of chains plus the inclusion graph; merges
//!   concatenations into parent chains
//! - [`Executor`] - Runs a merged chain as concurrently progressing stages
//!   joined by bounded pipes
//! - [`OutputSink`] - Where root chains and fork branches are written
//!
//! ## Flow
//!
//! ```text
//! source file -> [stage] -> pipe -> [stage] -> pipe -> ... -> sink
//!                              \-> fork branch -> ... -> sink
//! ```

mod chain;
mod executor;
mod graph;
mod pipe;
mod sink;

pub use chain::{ChainBuilder, ConcatMode, Concatenation, DisplaySteps, Fork, Step, plan_meta};
pub use executor::{DEFAULT_PIPE_CAPACITY, Executor, PipelineError};
pub use graph::{ChainGraph, ChainId, HandlerChain, MergeError};
pub use pipe::{PipeReader, PipeWriter, pipe};
pub use sink::{FsSink, MemorySink, OutputSink, SinkWriter};
