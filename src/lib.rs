//! # ftl2-runner
//!
//! Runs an automation job handed over a line-framed worker protocol and
//! streams what happens back as runner-compatible job events.
//!
//! A job arrives as parameters plus a zipped private data dir. The
//! automation's notifications are translated into a run → phase → task →
//! outcome event hierarchy, written to the output stream and an on-disk
//! artifact directory, and summarized per target. A terminal-only mode
//! hides the same events in ANSI escape sequences instead.

pub mod ansi;
pub mod archive;
pub mod artifacts;
pub mod automation;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod stats;
pub mod telemetry;
pub mod translate;
pub mod transport;
