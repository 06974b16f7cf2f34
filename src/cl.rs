//! Command line interface

use std::{num::NonZeroU32, path::PathBuf};

use clap::Parser;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct Args {
    #[command(subcommand)]
    pub action: Action,
}

/// How records are written to standard output
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum OutputFormat {
    /// Rust debug representation, one record per line
    #[default]
    Debug,
    /// JSON object, one record per line
    Json,
}

#[derive(Debug, clap::Parser)]
pub(crate) struct OutputOptions {
    /// Record output format
    #[arg(short, long, default_value_t, value_enum)]
    pub format: OutputFormat,
}

#[derive(Debug, clap::Subcommand)]
pub(crate) enum Action {
    /// Parse a recorded strace log.
    /// It must have been generated with 'strace -yy -e verbose=all -i -ttt -v -xx'
    Parse {
        /// Log path, standard input if missing or '-'
        path: Option<PathBuf>,
        #[command(flatten)]
        output: OutputOptions,
    },
    /// Run a program under strace and parse its syscalls as they happen
    Run {
        /// The command line to run
        #[arg(num_args = 1.., required = true)]
        command: Vec<String>,
        /// Maximum string size strace captures, longer strings are truncated
        #[arg(short, long, default_value = "1024")]
        string_limit: NonZeroU32,
        /// Log strace output to this file.
        /// Only use for debugging: this will slow down processing, and may generate a huge file.
        #[arg(short = 'l', long, default_value = None)]
        strace_log_path: Option<PathBuf>,
        #[command(flatten)]
        output: OutputOptions,
    },
    /// Generate man pages
    #[cfg(feature = "generate-extra")]
    GenManPages {
        /// Target directory (must exist)
        dir: PathBuf,
    },
    /// Generate shell completion
    #[cfg(feature = "generate-extra")]
    #[group(required = true, multiple = true)]
    GenShellComplete {
        /// Shell to generate for, leave empty for all
        #[arg(short = 's', long, default_value = None)]
        shell: Option<clap_complete::Shell>,
        /// Target directory, leave empty to write to standard output
        dir: Option<PathBuf>,
    },
}
