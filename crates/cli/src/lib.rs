//! Binary-side pieces of tabrelay: CLI parsing, logging setup, and the axum server.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod server;
