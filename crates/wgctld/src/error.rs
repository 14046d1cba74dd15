//! Daemon errors with miette diagnostics.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use wgctl_config::ConfigError;
use wgctl_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 3;
    pub const BACKEND: i32 = 4;
    pub const STORE: i32 = 5;
}

#[derive(Debug, Error, Diagnostic)]
pub enum DaemonError {
    #[error("Cannot load configuration from {}", path.display())]
    #[diagnostic(
        code(wgctld::config),
        help(
            "Check the file syntax and the [backend] section.\n\
             Environment variables prefixed WGCTL_ override file values."
        )
    )]
    Config {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error("Backend '{backend}' could not be set up")]
    #[diagnostic(
        code(wgctld::backend),
        help("Verify api_url and the credentials of this backend entry.")
    )]
    Backend {
        backend: String,
        #[source]
        source: CoreError,
    },

    #[error("Cannot load stored state from {}", path.display())]
    #[diagnostic(
        code(wgctld::store),
        help("The state file must be readable JSON; move it aside to start empty.")
    )]
    Store {
        path: PathBuf,
        #[source]
        source: CoreError,
    },

    #[error("Failed to wait for the shutdown signal")]
    #[diagnostic(code(wgctld::signal))]
    Signal(#[source] std::io::Error),
}

impl DaemonError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => exit_code::CONFIG,
            Self::Backend { .. } => exit_code::BACKEND,
            Self::Store { .. } => exit_code::STORE,
            Self::Signal(_) => exit_code::GENERAL,
        }
    }
}
