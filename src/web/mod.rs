//! Web server for token-based verification callbacks
//!
//! Runs alongside the Discord bot. The external verification site sends the
//! token back here once the user has proven who they are.

mod server;

pub use server::{AppState, WebServer};
