//! TCP transport for the command protocol.

pub mod framing;
pub mod listener;
pub mod session;

pub use listener::{Server, ServerConfig};
