//! A blocking, single-request cache timing model built on the `asynchronix`
//! discrete-event simulator.
//!
//! One simulated cycle is one second of simulation time.

pub mod sim;
pub mod simple_cache;

pub use simple_cache::*;
