//! Download-to-cache and archive extraction with atomic commit.
//!
//! Both operations write into a sibling temporary path first and only rename
//! onto the final name once the content is complete, so a cache shared by
//! parallel builds never exposes a half-written archive or distribution.
//! Racing writers are not serialized; their outputs are interchangeable
//! because the content is a pure function of the URL.
//!
//! An extracted distribution carries a completion marker recording the
//! sha256 of the archive it came from. A directory without a matching marker
//! is treated as debris from an interrupted run and extracted again.

use crate::error::{display_path, Cause, Error, Result, ResultExt};
use crate::fsutil::{self, atomic_move, delete_recursive};
use crate::sink::Sink;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;
use zip::ZipArchive;

/// Marker file written last into an extracted distribution.
pub const COMPLETION_MARKER: &str = ".kaitai-build-complete";

/// Contents of [`COMPLETION_MARKER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub archive: String,
    pub archive_sha256: String,
    pub files: u64,
    pub extracted_at_unix: u64,
}

/// Fetch `url` into `target` unless `target` already exists.
///
/// `http`/`https` URLs are fetched with a GET; `file` URLs are copied from the
/// local path. The bytes land in `<target>.tmp` first, then get renamed onto
/// `target`. On failure nothing is left at `target`.
pub fn download(url: &Url, target: &Path, sink: &dyn Sink) -> Result<()> {
    if target.exists() {
        return Ok(());
    }

    let temp = with_suffix(target, ".tmp");
    delete_recursive(&temp)?;
    sink.info(&format!("KaiTai distribution: Downloading: {url}"));

    let bytes = match stream_into(url, &temp) {
        Ok(bytes) => bytes,
        Err(cause) => {
            let _ = delete_recursive(&temp);
            return Err(Error::with_cause(
                format!("Fail to download '{url}' into '{}'", display_path(&temp)),
                cause,
            ));
        }
    };
    log::debug!("downloaded {bytes} bytes from {url}");

    atomic_move(&temp, target)
}

fn stream_into(url: &Url, temp: &Path) -> std::result::Result<u64, Cause> {
    let mut out = BufWriter::new(File::create(temp)?);
    let copied = if url.scheme() == "file" {
        let path = url
            .to_file_path()
            .map_err(|()| Cause::Unsupported("file URL without a local path"))?;
        let mut input = File::open(path)?;
        io::copy(&mut input, &mut out)?
    } else {
        let response = ureq::get(url.as_str()).call()?;
        let mut reader = response.into_body().into_reader();
        io::copy(&mut reader, &mut out)?
    };
    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(copied)
}

/// Directory an archive extracts into: its sibling named after the archive
/// with the final extension removed.
pub fn unpack_target(archive: &Path) -> Result<PathBuf> {
    match archive.file_stem() {
        Some(stem) if archive.extension().is_some() => Ok(archive.with_file_name(stem)),
        _ => Err(Error::msg(format!(
            "Archive has no extension to strip: {}",
            display_path(archive)
        ))),
    }
}

/// Extract a ZIP archive next to itself and return the extraction directory.
///
/// Skipped when the directory already holds a completed extraction of this
/// exact archive. Directory entries are ignored; file entries are written
/// relative to the extraction root with leading separators stripped.
pub fn unpack(archive: &Path, sink: &dyn Sink) -> Result<PathBuf> {
    let dir = unpack_target(archive)?;
    let archive_sha256 = sha256_file(archive)?;

    if dir.is_dir() {
        if is_complete(&dir, &archive_sha256) {
            return Ok(dir);
        }
        sink.info(&format!(
            "KaiTai distribution: Discarding incomplete extraction: {}",
            display_path(&dir)
        ));
        delete_recursive(&dir)?;
    }

    sink.info(&format!(
        "KaiTai distribution: Extracting: {}",
        display_path(archive)
    ));
    let temp = with_suffix(&dir, "-tmp");
    delete_recursive(&temp)?;

    let files = match extract_into(archive, &temp) {
        Ok(files) => files,
        Err(cause) => {
            let _ = delete_recursive(&temp);
            return Err(Error::with_cause(
                format!("Fail to extract content of '{}'", display_path(archive)),
                cause,
            ));
        }
    };

    let record = ExtractionRecord {
        archive: archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        archive_sha256,
        files,
        extracted_at_unix: now_unix(),
    };
    write_marker(&temp, &record)?;

    if let Err(err) = atomic_move(&temp, &dir) {
        // Another build finished the same extraction first.
        if is_complete(&dir, &record.archive_sha256) {
            delete_recursive(&temp)?;
            return Ok(dir);
        }
        return Err(err);
    }
    Ok(dir)
}

fn extract_into(archive: &Path, root: &Path) -> std::result::Result<u64, Cause> {
    let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;
    fs::create_dir(root)?;

    let mut files = 0u64;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let current = root.join(entry_relative_path(entry.name())?);
        if let Some(parent) = current.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&current)?;
        io::copy(&mut entry, &mut out)?;
        apply_mode(&current, entry.unix_mode())?;
        files += 1;
    }
    Ok(files)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    match mode {
        Some(mode) => fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

/// Relative path for an archive entry name.
///
/// Leading `/` and `\` are stripped so absolute-looking names stay inside the
/// extraction root; names that climb out with `..` are rejected.
fn entry_relative_path(name: &str) -> io::Result<PathBuf> {
    let trimmed = name.trim_start_matches(['/', '\\']);
    let relative = PathBuf::from(trimmed);
    let escapes = relative.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || trimmed.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("archive entry escapes extraction root: {name}"),
        ));
    }
    Ok(relative)
}

fn is_complete(dir: &Path, archive_sha256: &str) -> bool {
    read_marker(dir)
        .map(|record| record.archive_sha256 == archive_sha256)
        .unwrap_or(false)
}

/// Completion record of an extracted distribution, if present and readable.
pub fn read_marker(dir: &Path) -> Option<ExtractionRecord> {
    let bytes = fs::read(dir.join(COMPLETION_MARKER)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn write_marker(dir: &Path, record: &ExtractionRecord) -> Result<()> {
    let path = dir.join(COMPLETION_MARKER);
    let bytes = serde_json::to_vec_pretty(record)
        .map_err(|e| Error::with_cause("Fail to encode extraction record", io::Error::from(e)))?;
    let mut file =
        File::create(&path).or_fail(|| format!("Fail to write: {}", display_path(&path)))?;
    file.write_all(&bytes)
        .and_then(|()| file.sync_all())
        .or_fail(|| format!("Fail to write: {}", display_path(&path)))
}

/// Hex sha256 of a file's content.
pub fn sha256_file(path: &Path) -> Result<String> {
    let digest = || -> io::Result<String> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    };
    digest().or_fail(|| format!("Fail to read file: {}", display_path(path)))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    fsutil::absolute(&path.with_file_name(name))
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
