//! Framed transport: newline-delimited JSON records over byte streams.
//!
//! Inbound a job is `{"kwargs":..}`, `{"zipfile":N}` plus payload, then
//! `{"eof":true}`. Outbound every record is written and flushed on its own so
//! the consumer can read incrementally.

use std::io::{BufRead, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::archive;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::model::JobStatus;

/// What a job's input stream carried besides the archive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobRequest {
    pub kwargs: Map<String, Value>,
    /// Whether an archive was extracted into the work dir.
    pub unpacked: bool,
}

impl JobRequest {
    pub fn kwarg_str(&self, key: &str) -> Option<&str> {
        self.kwargs.get(key).and_then(Value::as_str)
    }
}

/// Read records until `{"eof":true}` or end of input.
///
/// The first archive is extracted into `work_dir`; later ones are consumed
/// and dropped. Lines that aren't JSON objects with a known key are skipped.
///
/// # Errors
///
/// Read failures and archive extraction failures. A stream that ends without
/// an eof record is not an error.
pub fn read_job<R: BufRead>(input: &mut R, work_dir: &Path) -> Result<JobRequest> {
    let mut request = JobRequest::default();
    let mut line = Vec::new();

    loop {
        line.clear();
        if input.read_until(b'\n', &mut line)? == 0 {
            debug!("input closed before eof record");
            break;
        }
        let trimmed = line.trim_ascii();
        let record = match serde_json::from_slice::<Value>(trimmed) {
            Ok(Value::Object(record)) => record,
            Ok(_) | Err(_) => {
                if !trimmed.is_empty() {
                    debug!(len = line.len(), "skipping malformed input record");
                }
                continue;
            }
        };

        if let Some(kwargs) = record.get("kwargs") {
            match kwargs {
                Value::Object(map) => request.kwargs = map.clone(),
                _ => debug!("skipping kwargs record that is not an object"),
            }
        } else if let Some(size) = record.get("zipfile") {
            let Some(size) = size.as_u64() else {
                debug!("skipping zipfile record without a byte count");
                continue;
            };
            if request.unpacked {
                let dropped = archive::discard(input, size)?;
                warn!(size = dropped, "ignoring additional archive");
            } else {
                archive::unpack(input, size, work_dir)?;
                request.unpacked = true;
                debug!(size, dir = %work_dir.display(), "archive extracted");
            }
        } else if record.contains_key("eof") {
            break;
        } else {
            debug!("skipping input record with no known key");
        }
    }
    Ok(request)
}

/// Write one translated event.
pub fn write_event<W: Write>(out: &mut W, event: &Event) -> Result<()> {
    write_record(out, event)
}

/// Write `{"status": status, ..extra}`.
pub fn write_status<W: Write>(
    out: &mut W,
    status: JobStatus,
    extra: Map<String, Value>,
) -> Result<()> {
    let mut record = Map::with_capacity(extra.len() + 1);
    record.insert("status".to_string(), json!(status));
    record.extend(extra);
    write_record(out, &record)
}

pub fn write_eof<W: Write>(out: &mut W) -> Result<()> {
    write_record(out, &json!({"eof": true}))
}

/// Pack `dir` and write `{"zipfile": N}` followed by the base64 payload.
///
/// The payload is not newline-terminated; the next record follows directly.
pub fn write_archive<W: Write>(out: &mut W, dir: &Path) -> Result<()> {
    let packed = archive::pack(dir)?;
    write_record(out, &json!({"zipfile": packed.size()}))?;
    packed.write_base64(out).map_err(Error::Transport)?;
    out.flush().map_err(Error::Transport)
}

fn write_record<W: Write, T: Serialize + ?Sized>(out: &mut W, record: &T) -> Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    out.write_all(&line).map_err(Error::Transport)?;
    out.flush().map_err(Error::Transport)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_record_carries_extra_fields() {
        let mut out = Vec::new();
        let mut extra = Map::new();
        extra.insert("result_traceback".to_string(), json!("boom"));
        write_status(&mut out, JobStatus::Error, extra).unwrap();
        assert_eq!(out.last(), Some(&b'\n'));
        let record: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(record, json!({"status": "error", "result_traceback": "boom"}));
    }

    #[test]
    fn eof_record() {
        let mut out = Vec::new();
        write_eof(&mut out).unwrap();
        assert_eq!(out, b"{\"eof\":true}\n");
    }
}
