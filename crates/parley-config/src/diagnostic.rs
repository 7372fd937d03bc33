// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Figment-to-miette error bridge.
//!
//! Converts Figment deserialization errors into miette diagnostics so
//! config mistakes render with codes and help text instead of a bare
//! serde message.

use miette::Diagnostic;
use thiserror::Error;

/// A configuration error with diagnostic metadata.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A TOML/env deserialization failure reported by figment.
    #[error("{message}")]
    #[diagnostic(
        code(parley::config::parse),
        help("check parley.toml (or PARLEY_* environment overrides) for the offending key")
    )]
    Parse {
        /// The figment error, including the dotted key path where available.
        message: String,
    },

    /// A semantic validation failure on an otherwise well-formed config.
    #[error("validation error: {message}")]
    #[diagnostic(code(parley::config::validation))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

/// Convert a figment error (which may aggregate several failures) into
/// one `ConfigError` per underlying failure.
pub fn figment_to_config_errors(err: figment::Error) -> Vec<ConfigError> {
    err.into_iter()
        .map(|e| ConfigError::Parse {
            message: e.to_string(),
        })
        .collect()
}

/// Render collected config errors to stderr with their diagnostic codes
/// and help text.
pub fn render_errors(errors: &[ConfigError]) {
    for err in errors {
        eprintln!("error: {err}");
        if let Some(code) = err.code() {
            eprintln!("  code: {code}");
        }
        if let Some(help) = err.help() {
            eprintln!("  help: {help}");
        }
    }
}
