//! Compiler distribution resolution: download URL, cache layout and the
//! start script inside an unpacked distribution.

use crate::error::{display_path, Error, Result};
use crate::fetch;
use crate::fsutil::{mkdirs, scan_files};
use crate::platform::Platform;
use crate::sink::Sink;
use std::path::{Path, PathBuf};
use url::Url;

/// Compiler release used when none is configured.
pub const DEFAULT_VERSION: &str = "0.10";

/// Release download location; `{version}` fills the tag and the file name.
pub const URL_TEMPLATE: &str = "https://github.com/kaitai-io/kaitai_struct_compiler/releases/download/{version}/kaitai-struct-compiler-{version}.zip";

/// Name of the start script shipped in every distribution. The unix script
/// shares its base name without the suffix.
pub const START_SCRIPT: &str = "kaitai-struct-compiler.bat";

/// Use `explicit` verbatim when given, otherwise fill [`URL_TEMPLATE`] with
/// `version`.
pub fn resolve_url(explicit: Option<&str>, version: &str) -> Result<Url> {
    match explicit {
        Some(raw) => {
            Url::parse(raw).map_err(|e| Error::with_cause(format!("Invalid URL: {raw}"), e))
        }
        None => {
            let raw = URL_TEMPLATE.replace("{version}", version);
            Url::parse(&raw)
                .map_err(|e| Error::with_cause(format!("Invalid version: {version}"), e))
        }
    }
}

/// Create the cache root if needed and return it normalized.
pub fn prepare_cache(cache: &Path, sink: &dyn Sink) -> Result<PathBuf> {
    sink.debug(&format!(
        "KaiTai distribution: Prepare cache directory: {}",
        display_path(cache)
    ));
    mkdirs(cache)
}

/// Where the archive for `url` lives inside `cache`: named after the last
/// URL path segment.
pub fn cache_entry_path(url: &Url, cache: &Path) -> Result<PathBuf> {
    let name = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::msg(format!("URL does not name a file: {url}")))?;
    Ok(cache.join(name))
}

/// Find the single start script under `dist_root` and return the path that
/// should be invoked on `platform`.
pub fn locate_executable(dist_root: &Path, platform: Platform) -> Result<PathBuf> {
    let scripts = scan_files(dist_root, &[START_SCRIPT], &[] as &[&str])?;
    let [script] = scripts.as_slice() else {
        return Err(Error::msg(format!(
            "Fail to find start script '{}' in Kaitai distribution: {}",
            START_SCRIPT,
            display_path(dist_root)
        )));
    };

    let suffix = platform.capabilities().script_suffix_to_strip;
    let name = script
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(suffix) {
        Some(stripped) if !suffix.is_empty() => Ok(script.with_file_name(stripped)),
        _ => Ok(script.clone()),
    }
}

/// Download (once), unpack (once) and locate the compiler for the current
/// platform.
pub fn download_compiler(url: &Url, cache: &Path, sink: &dyn Sink) -> Result<PathBuf> {
    download_compiler_on(url, cache, Platform::current(), sink)
}

pub(crate) fn download_compiler_on(
    url: &Url,
    cache: &Path,
    platform: Platform,
    sink: &dyn Sink,
) -> Result<PathBuf> {
    let archive = cache_entry_path(url, cache)?;
    fetch::download(url, &archive, sink)?;
    let dist = fetch::unpack(&archive, sink)?;
    locate_executable(&dist, platform)
}
