//! Directory trees as zip-over-base64.
//!
//! Packing stages the zip in an anonymous temp file so its exact size is
//! known before anything is sent. Unpacking pulls exactly the announced
//! number of decoded bytes off a line-framed stream, stages them the same
//! way, then extracts.

use std::fs::{self, File, Permissions};
use std::io::{self, BufRead, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use chrono::{Datelike, Local, TimeZone, Timelike};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

/// Encoded characters decoded per refill. A multiple of 4.
const ENCODED_CHUNK: usize = 256 * 1024;

/// Members at least this large need zip64 headers.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;
const S_IFDIR: u32 = 0o040_000;

/// Accepts padded or unpadded input so a short final group still decodes.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

// ---------------------------------------------------------------------------
// Pack
// ---------------------------------------------------------------------------

/// A finished zip staged on disk.
#[derive(Debug)]
pub struct PackedArchive {
    file: File,
    size: u64,
}

impl PackedArchive {
    /// Size of the zip in bytes (before base64).
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Stream the zip to `out` as base64.
    pub fn write_base64<W: Write>(mut self, out: &mut W) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut encoder = base64::write::EncoderWriter::new(out, &STANDARD);
        io::copy(&mut self.file, &mut encoder)?;
        encoder.finish()?;
        Ok(())
    }
}

/// Zip `source` recursively.
///
/// Symlinks are stored as links, never followed. Pipes, sockets and devices
/// are skipped. A missing `source` packs to an empty archive.
pub fn pack(source: &Path) -> Result<PackedArchive> {
    let mut zip = ZipWriter::new(tempfile::tempfile()?);

    if source.exists() {
        let walker = WalkDir::new(source)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            let path = entry.path();
            let rel = path
                .strip_prefix(source)
                .map_err(|e| Error::Other(format!("walked outside {}: {e}", source.display())))?;
            let name = archive_name(rel);
            let meta = fs::symlink_metadata(path)?;
            let options = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .last_modified_time(zip_time(meta.modified()?));

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                let target = fs::read_link(path)?;
                zip.add_symlink(name, target.to_string_lossy(), options)?;
            } else if file_type.is_dir() {
                zip.add_directory(name, options.unix_permissions(meta.permissions().mode()))?;
            } else if file_type.is_file() {
                let options = options
                    .unix_permissions(meta.permissions().mode())
                    .large_file(meta.len() >= ZIP64_THRESHOLD);
                zip.start_file(name, options)?;
                io::copy(&mut File::open(path)?, &mut zip)?;
            } else {
                debug!(path = %path.display(), "skipping special file");
            }
        }
    }

    let mut file = zip.finish()?;
    let size = file.seek(SeekFrom::End(0))?;
    debug!(source = %source.display(), size, "archive packed");
    Ok(PackedArchive { file, size })
}

/// Forward-slash member name for a relative path.
fn archive_name(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ---------------------------------------------------------------------------
// Unpack
// ---------------------------------------------------------------------------

/// Read `size` decoded bytes of base64 from `input` and extract them into
/// `target`.
///
/// Never consumes input past the payload's last encoded character. Short
/// input stops the read early; the truncated zip then fails to open.
pub fn unpack<R: BufRead>(input: &mut R, size: u64, target: &Path) -> Result<()> {
    let mut staged = tempfile::tempfile()?;
    let received = io::copy(&mut Base64Reader::new(input, size).take(size), &mut staged)?;
    if received < size {
        warn!(expected = size, received, "archive payload truncated");
    }
    staged.seek(SeekFrom::Start(0))?;
    extract(staged, target)
}

/// Consume a payload without extracting it.
pub fn discard<R: BufRead>(input: &mut R, size: u64) -> Result<u64> {
    Ok(io::copy(
        &mut Base64Reader::new(input, size).take(size),
        &mut io::sink(),
    )?)
}

/// Extract a zip into `target`, in archive order.
///
/// An existing path is removed first unless both it and the entry are
/// directories. Directory modes and mtimes are applied after every entry is
/// written, deepest first.
pub fn extract<R: Read + Seek>(reader: R, target: &Path) -> Result<()> {
    fs::create_dir_all(target)?;
    let mut archive = ZipArchive::new(reader)?;
    let mut dirs: Vec<(PathBuf, Option<u32>, Option<SystemTime>)> = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(rel) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!(name = entry.name(), "skipping archive entry with unsafe path");
            continue;
        };
        let out = target.join(&rel);
        let mode = entry.unix_mode();
        let mtime = system_time(entry.last_modified());
        let is_symlink = mode.is_some_and(|m| m & S_IFMT == S_IFLNK);
        let is_dir =
            !is_symlink && (entry.is_dir() || mode.is_some_and(|m| m & S_IFMT == S_IFDIR));

        clear_conflict(&out, is_dir)?;
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }

        if is_dir {
            fs::create_dir_all(&out)?;
            dirs.push((out, mode, mtime));
        } else if is_symlink {
            let mut link = String::new();
            entry.read_to_string(&mut link)?;
            symlink(&link, &out)?;
        } else {
            let mut file = File::create(&out)?;
            io::copy(&mut entry, &mut file)?;
            if let Some(mtime) = mtime {
                file.set_modified(mtime)?;
            }
            if let Some(mode) = mode {
                file.set_permissions(Permissions::from_mode(mode & 0o7777))?;
            }
        }
    }

    for (path, mode, mtime) in dirs.into_iter().rev() {
        if let Some(mtime) = mtime {
            File::open(&path)?.set_modified(mtime)?;
        }
        if let Some(mode) = mode {
            fs::set_permissions(&path, Permissions::from_mode(mode & 0o7777))?;
        }
    }
    Ok(())
}

fn clear_conflict(path: &Path, entry_is_dir: bool) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            if !entry_is_dir {
                fs::remove_dir_all(path)?;
            }
        }
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Base64 section reader
// ---------------------------------------------------------------------------

/// Decodes the base64 payload that follows a `{"zipfile": N}` record.
///
/// Whitespace between encoded characters is skipped. Exactly
/// `4 * ceil(N / 3)` encoded characters are consumed from the underlying
/// reader, so the next record is left in place.
pub struct Base64Reader<'a, R: BufRead> {
    inner: &'a mut R,
    remaining: u64,
    pending: Vec<u8>,
    offset: usize,
}

impl<'a, R: BufRead> Base64Reader<'a, R> {
    pub fn new(inner: &'a mut R, decoded_len: u64) -> Self {
        Self {
            inner,
            remaining: decoded_len.div_ceil(3) * 4,
            pending: Vec::new(),
            offset: 0,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        let want = self.remaining.min(ENCODED_CHUNK as u64) as usize;
        let mut encoded = Vec::with_capacity(want);

        while encoded.len() < want {
            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                break;
            }
            let mut used = 0;
            for &byte in available {
                if encoded.len() == want {
                    break;
                }
                used += 1;
                if !byte.is_ascii_whitespace() {
                    encoded.push(byte);
                }
            }
            self.inner.consume(used);
        }

        if encoded.len() < want {
            // Input ended early.
            self.remaining = 0;
            let whole = encoded.len() - encoded.len() % 4;
            if encoded.len() % 4 == 1 {
                encoded.truncate(whole);
            }
        } else {
            self.remaining -= want as u64;
        }

        self.pending = LENIENT
            .decode(&encoded)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.offset = 0;
        Ok(())
    }
}

impl<R: BufRead> Read for Base64Reader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.offset == self.pending.len() {
            if self.remaining == 0 {
                return Ok(0);
            }
            self.refill()?;
        }
        let n = buf.len().min(self.pending.len() - self.offset);
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Zip timestamps are local wall-clock time with 2-second resolution.
fn zip_time(time: SystemTime) -> zip::DateTime {
    let local: chrono::DateTime<Local> = time.into();
    zip::DateTime::from_date_and_time(
        local.year().clamp(1980, 2107) as u16,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .unwrap_or_default()
}

fn system_time(time: zip::DateTime) -> Option<SystemTime> {
    Local
        .with_ymd_and_hms(
            i32::from(time.year()),
            u32::from(time.month()),
            u32::from(time.day()),
            u32::from(time.hour()),
            u32::from(time.minute()),
            u32::from(time.second()),
        )
        .earliest()
        .map(SystemTime::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reader_stops_at_payload_end() {
        // "hello world" -> aGVsbG8gd29ybGQ=
        let mut input = Cursor::new(b"aGVsbG8g\nd29y bGQ=\n{\"eof\": true}\n".to_vec());
        let mut out = Vec::new();
        Base64Reader::new(&mut input, 11)
            .take(11)
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"hello world");

        let mut rest = String::new();
        input.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "\n{\"eof\": true}\n");
    }

    #[test]
    fn reader_handles_tiny_buffers() {
        let data: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let encoded = STANDARD.encode(&data);
        // A one-byte BufReader forces a refill on every character.
        let mut input = io::BufReader::with_capacity(1, Cursor::new(encoded.into_bytes()));
        let mut out = Vec::new();
        Base64Reader::new(&mut input, data.len() as u64)
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn reader_tolerates_truncated_input() {
        // Only the first 8 of 16 encoded characters arrive.
        let mut input = Cursor::new(b"aGVsbG8g".to_vec());
        let mut out = Vec::new();
        Base64Reader::new(&mut input, 11)
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"hello ");
    }

    #[test]
    fn archive_names_use_forward_slashes() {
        assert_eq!(archive_name(Path::new("a/b/c.txt")), "a/b/c.txt");
        assert_eq!(archive_name(Path::new("./x")), "x");
    }

    #[test]
    fn zip_time_round_trips_to_even_seconds() {
        let now = SystemTime::now();
        let back = system_time(zip_time(now)).unwrap();
        let drift = now.duration_since(back).unwrap_or_default();
        assert!(drift.as_secs() < 2, "drift {drift:?}");
    }
}
