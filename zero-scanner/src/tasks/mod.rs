//! Task bodies shipped with the scanner.

pub mod heartbeat;

pub use heartbeat::{HeartbeatTask, HEARTBEAT_ENTRYPOINT};
