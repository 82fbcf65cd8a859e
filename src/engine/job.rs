//! Job envelope: the private data dir a job runs in, and what is derived
//! from it.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::artifacts::ArtifactWriter;

/// Ident used when neither the job nor its directory name supplies one.
pub const DEFAULT_IDENT: &str = "1";

/// Directory-name prefix stripped to derive an ident.
const IDENT_DIR_PREFIX: &str = "awx_";

/// A job's working context.
#[derive(Debug, Clone)]
pub struct JobEnvelope {
    pub ident: String,
    pub private_data_dir: PathBuf,
    pub kwargs: Map<String, Value>,
}

impl JobEnvelope {
    pub fn new(private_data_dir: impl Into<PathBuf>, kwargs: Map<String, Value>) -> Self {
        let private_data_dir = private_data_dir.into();
        let ident = resolve_ident(&private_data_dir, &kwargs);
        debug!(ident = %ident, dir = %private_data_dir.display(), "job envelope");
        Self {
            ident,
            private_data_dir,
            kwargs,
        }
    }

    pub fn project_dir(&self) -> PathBuf {
        self.private_data_dir.join("project")
    }

    pub fn artifacts(&self) -> ArtifactWriter {
        ArtifactWriter::new(&self.private_data_dir, &self.ident)
    }

    /// The `playbook` kwarg, when it is a string.
    pub fn playbook(&self) -> Option<&str> {
        self.kwargs.get("playbook").and_then(Value::as_str)
    }

    /// Script to run: `project/<playbook>` when the job names one that
    /// exists, otherwise `configured`.
    pub fn resolve_script(&self, configured: &Path) -> PathBuf {
        if let Some(playbook) = self.playbook() {
            let candidate = self.project_dir().join(playbook);
            if candidate.exists() {
                return candidate;
            }
            debug!(playbook, "job playbook not in project dir, using configured script");
        }
        configured.to_path_buf()
    }

    /// `inventory/`, when it is a directory.
    pub fn inventory(&self) -> Option<PathBuf> {
        let dir = self.private_data_dir.join("inventory");
        dir.is_dir().then_some(dir)
    }

    /// JSON object in `env/extravars`. Missing or malformed reads as empty.
    pub fn extravars(&self) -> Map<String, Value> {
        load_extravars(&self.private_data_dir.join("env").join("extravars"))
    }
}

/// `ident` kwarg, else the dir name minus its `awx_` prefix, else `"1"`.
pub fn resolve_ident(private_data_dir: &Path, kwargs: &Map<String, Value>) -> String {
    match kwargs.get("ident") {
        Some(Value::String(ident)) => return ident.clone(),
        Some(Value::Null) | None => {}
        Some(other) => return other.to_string(),
    }
    private_data_dir
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix(IDENT_DIR_PREFIX))
        .filter(|ident| !ident.is_empty())
        .map_or_else(|| DEFAULT_IDENT.to_string(), str::to_string)
}

fn load_extravars(path: &Path) -> Map<String, Value> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return Map::new(),
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(vars)) => vars,
        Ok(_) => {
            warn!(path = %path.display(), "extravars is not a JSON object, ignoring");
            Map::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable extravars, ignoring");
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kwargs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn ident_prefers_kwarg() {
        let k = kwargs(json!({"ident": "abc"}));
        assert_eq!(resolve_ident(Path::new("/tmp/awx_42"), &k), "abc");
        let k = kwargs(json!({"ident": 7}));
        assert_eq!(resolve_ident(Path::new("/tmp/x"), &k), "7");
    }

    #[test]
    fn ident_from_dir_name() {
        assert_eq!(resolve_ident(Path::new("/tmp/awx_42"), &Map::new()), "42");
        assert_eq!(resolve_ident(Path::new("/tmp/job"), &Map::new()), "1");
        assert_eq!(resolve_ident(Path::new("/tmp/awx_"), &Map::new()), "1");
    }
}
