//! Host-build side of the pipeline: discover sources, fetch the compiler and
//! run one generation from a [`KaitaiConfig`].

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::config::KaitaiConfig;
use crate::distribution::{download_compiler, prepare_cache, resolve_url};
use crate::fsutil::{mkdirs, scan_files};
use crate::generator::GenerationRequest;
use crate::process::timeout_from_millis;
use crate::sink::Sink;

/// Resolve, download and unpack the configured compiler; return its start
/// script.
pub fn fetch(config: &KaitaiConfig, sink: &dyn Sink) -> Result<PathBuf> {
    let url = resolve_url(config.url.as_deref(), &config.version)?;
    let cache = prepare_cache(&config.resolve_cache_dir(), sink)?;
    let compiler = download_compiler(&url, &cache, sink)
        .with_context(|| format!("preparing Kaitai compiler from '{url}'"))?;
    Ok(compiler)
}

/// Generate Java sources for every matching `.ksy` file.
///
/// Returns the directory to register as a source root, or `None` when
/// generation is skipped or there is nothing to compile.
pub fn run(config: &KaitaiConfig, sink: &dyn Sink) -> Result<Option<PathBuf>> {
    if config.skip {
        sink.info("Kaitai: generation skipped");
        return Ok(None);
    }

    let sources = if config.source_dir.exists() {
        scan_files(&config.source_dir, &config.includes, &config.excludes)
            .with_context(|| format!("scanning '{}'", config.source_dir.display()))?
    } else {
        Vec::new()
    };
    if sources.is_empty() {
        sink.warn("Not found any input files: skip generation step");
        return Ok(None);
    }

    if which::which("java").is_err() {
        sink.warn("`java` not found on PATH; the Kaitai compiler start script needs a JVM");
    }

    let compiler = fetch(config, sink)?;
    let output = mkdirs(&config.output)?;

    let request = GenerationRequest::new(&compiler, &output, config.package.as_str())?
        .with_sources(&sources)?
        .overwrite(config.overwrite)
        .exact_output(config.exact_output)
        .execution_timeout(timeout_from_millis(config.execution_timeout_ms))
        .from_file_class(config.from_file_class.as_deref())
        .opaque_types(config.opaque_types)
        .no_version_check(config.no_version_check)
        .no_auto_read(config.no_auto_read);

    let root = request
        .generate(sink)
        .with_context(|| format!("generating Java sources into '{}'", output.display()))?;
    Ok(Some(root))
}
