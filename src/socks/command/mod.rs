//! SOCKS5 command module
//!
//! Handles the method negotiation, request parsing and replies.

mod parser;
mod reply;

pub use parser::{handshake, read_target_addr};
pub use reply::{build_reply, send_success};
