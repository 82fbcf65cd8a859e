//! Per-job artifact directory.
//!
//! ```text
//! artifacts/<ident>/
//!     job_events/<counter>-<uuid>.json
//!     stdout
//!     stderr
//!     rc
//!     status
//!     command
//! ```
//!
//! Everything is owner-only. Nothing here deletes.

use std::collections::BTreeMap;
use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::model::JobStatus;

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// Contents of the `command` artifact.
#[derive(Debug, Clone, Serialize)]
pub struct CommandRecord {
    pub command: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
}

/// Writes one job's artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    /// Writer for `<private_data_dir>/artifacts/<ident>`.
    pub fn new(private_data_dir: &Path, ident: &str) -> Self {
        Self {
            dir: private_data_dir.join("artifacts").join(ident),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn events_dir(&self) -> PathBuf {
        self.dir.join("job_events")
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.dir.join("stdout")
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.dir.join("stderr")
    }

    /// Create the directory tree and empty `stdout`/`stderr` files.
    pub fn setup(&self) -> Result<()> {
        let events = self.events_dir();
        DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(&events)?;
        for dir in [&self.dir, &events] {
            fs::set_permissions(dir, Permissions::from_mode(DIR_MODE))?;
        }
        for path in [self.stdout_path(), self.stderr_path()] {
            open_append(&path)?.set_permissions(Permissions::from_mode(FILE_MODE))?;
        }
        debug!(dir = %self.dir.display(), "artifact directory ready");
        Ok(())
    }

    /// Persist one event as `job_events/<counter>-<uuid>.json`.
    ///
    /// Written to a temp file in the same directory and renamed into place,
    /// so the final name never holds a partial event.
    pub fn write_event(&self, event: &Event) -> Result<PathBuf> {
        let path = self
            .events_dir()
            .join(format!("{}-{}.json", event.counter, event.uuid));
        let mut tmp = NamedTempFile::new_in(self.events_dir())?;
        serde_json::to_writer(&mut tmp, event)?;
        tmp.as_file().sync_data()?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;
        Ok(path)
    }

    /// Append an event's rendered text, newline-terminated.
    pub fn append_stdout(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let mut file = open_append(&self.stdout_path())?;
        file.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        Ok(())
    }

    pub fn append_stderr(&self, bytes: &[u8]) -> Result<()> {
        open_append(&self.stderr_path())?.write_all(bytes)?;
        Ok(())
    }

    pub fn write_rc(&self, rc: i32) -> Result<()> {
        self.write_small("rc", rc.to_string().as_bytes())
    }

    pub fn write_status(&self, status: JobStatus) -> Result<()> {
        self.write_small("status", status.to_string().as_bytes())
    }

    pub fn write_command(&self, command: &CommandRecord) -> Result<()> {
        self.write_small("command", &serde_json::to_vec(command)?)
    }

    fn write_small(&self, name: &str, contents: &[u8]) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(contents)?;
        tmp.persist(self.dir.join(name))
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .mode(FILE_MODE)
        .open(path)
}
