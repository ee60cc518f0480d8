//! Tunnel process management.
//!
//! A tunnel is a local proxy process that exposes locally hosted pages to a
//! cross-browser testing cloud. This crate owns the child-process side of
//! that story: spawning the tunnel binary, waiting for it to come up,
//! stopping it idempotently, and probing the OS process table so the
//! platform monitor can detect tunnels that died behind our back.
//!
//! Downloading and extracting the tunnel binary is the caller's problem;
//! this crate is handed a path and arguments.

mod error;
pub mod process;
mod tunnel;

pub use error::{Error, Result};
pub use tunnel::{Tunnel, TunnelConfig};
