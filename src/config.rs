//! `kaitai.toml` loading for the command-line adapter.
//!
//! Relative paths are resolved against the directory holding the config file.
//! `KAITAI_CACHE_DIR` and `KAITAI_SKIP` override the file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::distribution::DEFAULT_VERSION;

pub const DEFAULT_CONFIG_FILE: &str = "kaitai.toml";
pub const CACHE_DIR_ENV: &str = "KAITAI_CACHE_DIR";
pub const SKIP_ENV: &str = "KAITAI_SKIP";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct KaitaiToml {
    kaitai: KaitaiConfig,
}

/// Adapter settings, as read from the `[kaitai]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct KaitaiConfig {
    pub version: String,
    pub url: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub source_dir: PathBuf,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub output: PathBuf,
    pub package: String,
    pub skip: bool,
    pub overwrite: bool,
    pub exact_output: bool,
    pub execution_timeout_ms: i64,
    pub from_file_class: Option<String>,
    pub opaque_types: Option<bool>,
    pub no_version_check: bool,
    pub no_auto_read: bool,
}

impl Default for KaitaiConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            url: None,
            cache_dir: None,
            source_dir: PathBuf::from("src/main/resources/kaitai"),
            includes: vec!["*.ksy".to_string()],
            excludes: Vec::new(),
            output: PathBuf::from("target/generated-sources/kaitai"),
            package: String::new(),
            skip: false,
            overwrite: false,
            exact_output: false,
            execution_timeout_ms: 5_000,
            from_file_class: None,
            opaque_types: None,
            no_version_check: false,
            no_auto_read: false,
        }
    }
}

impl KaitaiConfig {
    /// Parse a config document. `package` is mandatory.
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let parsed: KaitaiToml = toml::from_str(text)
            .with_context(|| format!("parsing Kaitai config '{}'", origin.display()))?;
        let config = parsed.kaitai;
        if config.package.trim().is_empty() {
            bail!(
                "invalid Kaitai config '{}': `package` is required",
                origin.display()
            );
        }
        if config.includes.is_empty() {
            bail!(
                "invalid Kaitai config '{}': `includes` must list at least one pattern",
                origin.display()
            );
        }
        Ok(config)
    }

    /// Read `path`, resolve relative paths against its directory and apply
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading Kaitai config '{}'", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut config = Self::parse(&text, path)?.rooted_at(base);
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn rooted_at(mut self, base: &Path) -> Self {
        self.source_dir = base.join(&self.source_dir);
        self.output = base.join(&self.output);
        self.cache_dir = self.cache_dir.map(|dir| base.join(dir));
        self
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(CACHE_DIR_ENV).filter(|d| !d.trim().is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(flag) = lookup(SKIP_ENV) {
            self.skip = matches!(flag.trim(), "1" | "true" | "yes");
        }
    }

    /// Configured cache root, or `kaitai` under the user cache directory.
    pub fn resolve_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("kaitai")
        })
    }
}
