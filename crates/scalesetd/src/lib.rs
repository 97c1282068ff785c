//! scalesetd — assembly of the scale-set subsystems.
//!
//! - **`daemon`** — wires the fleet store, the listener worker, the
//!   controller runtime and the REST API for one configured runner set

pub mod daemon;

pub use daemon::{Daemon, actions_service, ensure_runner_set};
