//! Typed configuration from environment variables.
//!
//! Loads once at startup. Everything has a default; only malformed values
//! fail.

use crate::error::{Error, Result};
use std::path::PathBuf;

/// Where the automation script lives when the job doesn't name one.
pub const DEFAULT_SCRIPT_PATH: &str = "/opt/ftl2/main.py";

/// Chunk width of ANSI-encoded blocks.
pub const DEFAULT_ANSI_WIDTH: usize = 78;

#[derive(Debug, Clone)]
pub struct Config {
    pub script_path: PathBuf,
    pub ansi_width: usize,
    pub job_id: Option<i64>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            script_path: PathBuf::from(DEFAULT_SCRIPT_PATH),
            ansi_width: DEFAULT_ANSI_WIDTH,
            job_id: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            script_path: std::env::var("FTL2_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or(defaults.script_path),
            ansi_width: match optional_var("FTL2_ANSI_WIDTH") {
                Some(raw) => parse_width(&raw)?,
                None => defaults.ansi_width,
            },
            job_id: optional_var("JOB_ID")
                .map(|raw| {
                    raw.parse::<i64>()
                        .map_err(|_| Error::Config(format!("JOB_ID is not an integer: {raw}")))
                })
                .transpose()?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

/// Unset and empty are the same thing here.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_width(raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(width) if width > 0 => Ok(width),
        _ => Err(Error::Config(format!(
            "FTL2_ANSI_WIDTH must be a positive integer, got {raw:?}"
        ))),
    }
}
