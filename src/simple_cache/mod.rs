mod cache;
mod common;
mod line_store;
mod memory;
mod processor;
mod stats;
pub mod trace;

pub use cache::{CpuSidePort, SimpleCache};
pub use common::*;
pub use line_store::{CacheLine, LineStore};
pub use memory::Memory;
pub use processor::{Completion, ProcLog, ProcState, Processor};
pub use stats::{CacheStats, Histogram};
