//! TALLY CLI
//!
//! Argument parsing, backend selection and command execution for the
//! `tally` binary. Exposed as a library so integration tests can drive
//! commands against in-memory backends.

pub mod backends;
pub mod cli;
pub mod commands;
pub mod logging;

pub use backends::{Backends, CollectionRole, LiveBackends, MemoryBackends};
pub use cli::{parse_args, Cli, Command, ReadAs, SchoolsCommand, ValueKind};
pub use commands::run;
pub use logging::init_logging;
