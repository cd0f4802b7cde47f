//! Test doubles for the database side of the wire.
//!
//! [`FakeDatabase`] holds the server-side state. [`MemoryTransport`] serves it
//! in-process and [`FakeServer`] serves it over TCP with the frame codec.

mod fake;
mod memory;
mod select;
mod tcp_server;

pub use fake::{FakeDatabase, ScanEnd, ScanReply, ScanScript, int32_batch};
pub use memory::{Fault, MemoryTransport};
pub use tcp_server::FakeServer;
