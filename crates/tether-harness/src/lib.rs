//! Deterministic in-process harness for tether handler trees.
//!
//! Builds both ends of a link inside one process, with seeded entropy and
//! either a queue between them that only moves when the test says so, or
//! synchronous delivery straight into the peer. Scenario tests
//! for the whole stack live in this crate's `tests/` directory.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod logging;
pub mod loopback;
pub mod recorder;
pub mod sim_env;

pub use fixtures::secure_configs;
pub use logging::init_tracing;
pub use loopback::{DirectLink, Interceptor, Link, LinkError, Side, Wiretap};
pub use recorder::{Recorder, RecordingFactory, RecordingHandler};
pub use sim_env::SimEntropy;
