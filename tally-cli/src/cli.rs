//! Command-line argument types.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// TALLY: instrumented key-value cache, cache-through fetcher and document reports
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "tally")]
#[command(version)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// TOML config file; defaults and TALLY_* variables apply without one
    #[arg(short, long, global = true, env = "TALLY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use in-process stores instead of Redis and MongoDB
    #[arg(long, global = true)]
    pub memory: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Store a value under a fresh random key and print the key
    Store {
        value: String,

        /// How to interpret the value
        #[arg(long, value_enum, default_value_t = ValueKind::Text)]
        kind: ValueKind,
    },

    /// Read the value stored at a key
    Get {
        key: String,

        /// Conversion applied to the stored bytes
        #[arg(long = "as", value_enum, default_value_t = ReadAs::Raw)]
        read_as: ReadAs,
    },

    /// Print the recorded call history of an operation
    Replay {
        #[arg(default_value = "Cache.store")]
        operation: String,
    },

    /// Flush the store, store "foo", "bar" and 42, then replay the history
    Demo,

    /// Fetch a page through the cache and print its body
    Fetch {
        url: String,

        /// Cache lifetime in seconds, overriding the configured one
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// School collection operations
    Schools {
        #[command(subcommand)]
        command: SchoolsCommand,
    },

    /// List students by average score, best first
    TopStudents,

    /// Print access-log statistics
    LogStats {
        /// Take the total from collection metadata instead of counting
        #[arg(long)]
        estimated: bool,

        /// Leave out the top-IP section
        #[arg(long)]
        no_ips: bool,
    },
}

/// School subcommands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum SchoolsCommand {
    /// List every school
    List,

    /// Insert a school from field=value pairs
    Insert {
        #[arg(required = true, value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },

    /// Replace the topics of every school with the given name
    UpdateTopics { name: String, topics: Vec<String> },

    /// List schools teaching a topic
    ByTopic { topic: String },
}

/// Interpretation of a value given on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Int,
    Real,
    Bytes,
}

/// Conversion applied on retrieval.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAs {
    Text,
    Int,
    Real,
    Raw,
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((field, value)) if !field.is_empty() => Ok((field.to_string(), value.to_string())),
        _ => Err(format!("expected field=value, got '{}'", s)),
    }
}

/// Parse arguments without touching the process environment's argv.
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_store_defaults_to_text() {
        let cli = parse_args(["tally", "store", "foo"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Store {
                value: "foo".to_string(),
                kind: ValueKind::Text
            }
        );
        assert!(!cli.memory);
    }

    #[test]
    fn test_parse_get_with_conversion() {
        let cli = parse_args(["tally", "--memory", "get", "k", "--as", "int"]).unwrap();
        assert!(cli.memory);
        assert_eq!(
            cli.command,
            Command::Get {
                key: "k".to_string(),
                read_as: ReadAs::Int
            }
        );
    }

    #[test]
    fn test_parse_replay_default_operation() {
        let cli = parse_args(["tally", "replay"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Replay {
                operation: "Cache.store".to_string()
            }
        );
    }

    #[test]
    fn test_parse_school_insert_fields() {
        let cli = parse_args([
            "tally",
            "schools",
            "insert",
            "name=UCSF",
            "address=505 Parnassus Ave",
        ])
        .unwrap();
        match cli.command {
            Command::Schools {
                command: SchoolsCommand::Insert { fields },
            } => {
                assert_eq!(
                    fields,
                    vec![
                        ("name".to_string(), "UCSF".to_string()),
                        ("address".to_string(), "505 Parnassus Ave".to_string()),
                    ]
                );
            }
            other => panic!("Expected schools insert, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_school_insert_rejects_bare_words() {
        assert!(parse_args(["tally", "schools", "insert", "UCSF"]).is_err());
        assert!(parse_args(["tally", "schools", "insert"]).is_err());
    }

    #[test]
    fn test_parse_log_stats_flags() {
        let cli = parse_args(["tally", "log-stats", "--estimated", "--no-ips", "-v"]).unwrap();
        assert_eq!(
            cli.command,
            Command::LogStats {
                estimated: true,
                no_ips: true
            }
        );
        assert!(cli.verbose);
    }

    #[test]
    fn test_parse_update_topics() {
        let cli = parse_args([
            "tally",
            "schools",
            "update-topics",
            "Holberton school",
            "Sys admin",
            "PHP",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Schools {
                command: SchoolsCommand::UpdateTopics {
                    name: "Holberton school".to_string(),
                    topics: vec!["Sys admin".to_string(), "PHP".to_string()],
                }
            }
        );
    }
}
