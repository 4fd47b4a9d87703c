//! # Corvus Script
//! [![Crates.io](https://img.shields.io/crates/v/corvus_script.svg)](https://crates.io/crates/corvus_script)
//! [![Docs](https://docs.rs/corvus_script/badge.svg)](https://docs.rs/corvus_script/)
//!
//! Building blocks for adaptors that drive a batch scheduler purely through its
//! command line tools.
//!
//! - **[`ScriptingConnection`](connection::ScriptingConnection)**: runs commands,
//!   validates job descriptions and polls job status.
//! - **[`RemoteCommandRunner`](runner::RemoteCommandRunner)**: one command as a helper
//!   job, local or over SSH depending on the process factory.
//! - **[`parser`]**: pure parsers for the text the tools print.

pub mod connection;
pub mod parser;
pub mod runner;

pub mod prelude {
    pub use super::connection::ScriptingConnection;
    pub use super::parser::{ParseError, Record};
    pub use super::runner::RemoteCommandRunner;
}
