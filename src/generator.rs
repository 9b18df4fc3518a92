//! Compiler invocation: version probe, generation and optional output
//! normalization.
//!
//! A run moves through `Idle -> VersionChecked -> Generated ->
//! (NormalizedOutput) -> Done`. Any failing step aborts the rest.
//!
//! The compiler always writes below `<outdir>/src`. In exact-output mode the
//! compiler targets a staging directory inside the requested output instead,
//! and the generated tree is moved up so the caller gets exactly the directory
//! it asked for.

use crate::error::{display_path, Error, Result, ResultExt};
use crate::fsutil::{
    self, absolute, delete_recursive, move_tree, require_readable_file, require_writable_dir,
    scan_files,
};
use crate::platform::Platform;
use crate::process::{Invocation, DEFAULT_TIMEOUT};
use crate::sink::Sink;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Segment the compiler nests its output under.
pub const GENERATED_SUBDIR: &str = "src";

const TARGET_LANGUAGE: &str = "java";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    VersionChecked,
    Generated,
    NormalizedOutput,
    Done,
}

fn enter(sink: &dyn Sink, from: Stage, to: Stage) -> Stage {
    sink.debug(&format!("Kaitai: {from:?} -> {to:?}"));
    to
}

/// Everything one compiler run needs.
///
/// Built with [`GenerationRequest::new`] and the chained setters, then
/// consumed by [`GenerationRequest::generate`].
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    compiler: PathBuf,
    output: PathBuf,
    package: String,
    sources: Vec<PathBuf>,
    overwrite: bool,
    exact_output: bool,
    execution_timeout: Option<Duration>,
    from_file_class: Option<String>,
    opaque_types: Option<bool>,
    no_version_check: bool,
    no_auto_read: bool,
    platform: Platform,
}

impl GenerationRequest {
    /// Fails if `compiler` cannot be made executable or `output` is not a
    /// writable directory.
    pub fn new(
        compiler: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        package: impl Into<String>,
    ) -> Result<Self> {
        let compiler = compiler.into();
        let output = output.into();
        let package = package.into();

        fsutil::require_executable_file(&compiler)?;
        require_writable_dir(&output)?;
        if package.trim().is_empty() {
            return Err(Error::msg("Java package for generated classes is blank"));
        }

        Ok(Self {
            compiler: absolute(&compiler),
            output: absolute(&output),
            package,
            sources: Vec::new(),
            overwrite: false,
            exact_output: false,
            execution_timeout: Some(DEFAULT_TIMEOUT),
            from_file_class: None,
            opaque_types: None,
            no_version_check: false,
            no_auto_read: false,
            platform: Platform::current(),
        })
    }

    /// Add a `.ksy` source. Repeated paths are kept once, at their first
    /// position.
    pub fn with_source(mut self, source: impl AsRef<Path>) -> Result<Self> {
        let source = source.as_ref();
        require_readable_file(source)?;
        let source = absolute(source);
        if !self.sources.contains(&source) {
            self.sources.push(source);
        }
        Ok(self)
    }

    pub fn with_sources<I, P>(self, sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        sources
            .into_iter()
            .try_fold(self, |request, source| request.with_source(source))
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn exact_output(mut self, exact_output: bool) -> Self {
        self.exact_output = exact_output;
        self
    }

    /// `None` disables the limit.
    pub fn execution_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Class providing a custom `fromFile` stream. Blank means unset.
    pub fn from_file_class(mut self, class: Option<&str>) -> Self {
        self.from_file_class = class
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        self
    }

    pub fn opaque_types(mut self, opaque_types: Option<bool>) -> Self {
        self.opaque_types = opaque_types;
        self
    }

    pub fn no_version_check(mut self, no_version_check: bool) -> Self {
        self.no_version_check = no_version_check;
        self
    }

    pub fn no_auto_read(mut self, no_auto_read: bool) -> Self {
        self.no_auto_read = no_auto_read;
        self
    }

    /// Platform whose compiler flags apply. Defaults to the host.
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn compiler(&self) -> &Path {
        &self.compiler
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn is_overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn is_exact_output(&self) -> bool {
        self.exact_output
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.execution_timeout
    }

    pub fn from_file_class_name(&self) -> Option<&str> {
        self.from_file_class.as_deref()
    }

    pub fn version_args(&self) -> Vec<OsString> {
        vec!["--version".into()]
    }

    /// Arguments of the generation run writing below `outdir`.
    pub fn generate_args(&self, outdir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--target".into(),
            TARGET_LANGUAGE.into(),
            "--outdir".into(),
            absolute(outdir).into(),
            "--java-package".into(),
            self.package.clone().into(),
        ];
        if self.no_auto_read {
            args.push("--no-auto-read".into());
        }
        if let Some(class) = &self.from_file_class {
            args.push("--java-from-file-class".into());
            args.push(class.into());
        }
        if let Some(opaque) = self.opaque_types {
            args.push("--opaque-types".into());
            args.push(opaque.to_string().into());
        }
        if self.no_version_check && self.platform.capabilities().supports_no_version_check {
            args.push("--no-version-check".into());
        }
        args.extend(self.sources.iter().map(|s| s.clone().into_os_string()));
        args
    }

    fn invocation(&self) -> Invocation {
        Invocation::new(&self.compiler).timeout(self.execution_timeout)
    }

    /// Run the compiler and return the directory holding the generated files.
    pub fn generate(&self, sink: &dyn Sink) -> Result<PathBuf> {
        if self.sources.is_empty() {
            return Err(Error::msg(format!(
                "No Kaitai sources to generate into: {}",
                display_path(&self.output)
            )));
        }

        let mut stage = Stage::Idle;
        sink.info("Kaitai: check version");
        self.invocation().args(self.version_args()).run(sink)?;
        stage = enter(sink, stage, Stage::VersionChecked);

        if self.no_version_check && !self.platform.capabilities().supports_no_version_check {
            sink.info(&format!(
                "Option `no_version_check` is ignored on {}",
                self.platform.name()
            ));
        }

        let root = if self.exact_output {
            self.generate_exact(sink, &mut stage)?
        } else {
            self.generate_plain(sink, &mut stage)?
        };

        enter(sink, stage, Stage::Done);
        Ok(root)
    }

    fn run_generation(&self, outdir: &Path, sink: &dyn Sink) -> Result<()> {
        sink.info("Kaitai: generate");
        self.invocation()
            .args(self.generate_args(outdir))
            .run(sink)
            .map(drop)
    }

    fn generate_plain(&self, sink: &dyn Sink, stage: &mut Stage) -> Result<PathBuf> {
        let root = self.output.join(GENERATED_SUBDIR);
        if has_entries(&root) {
            if !self.overwrite {
                return Err(Error::msg(format!(
                    "Output directory already contains generated files, enable `overwrite` to replace them: {}",
                    display_path(&root)
                )));
            }
            sink.debug(&format!("Kaitai: removing stale output {}", display_path(&root)));
            delete_recursive(&root)?;
        }

        self.run_generation(&self.output, sink)?;
        *stage = enter(sink, *stage, Stage::Generated);
        Ok(root)
    }

    fn generate_exact(&self, sink: &dyn Sink, stage: &mut Stage) -> Result<PathBuf> {
        let staging = tempfile::Builder::new()
            .prefix(&format!(".kaitai-{}-", self.package))
            .tempdir_in(&self.output)
            .or_fail(|| {
                format!(
                    "Fail to create temporary directory in: {}",
                    display_path(&self.output)
                )
            })?;

        self.run_generation(staging.path(), sink)?;
        *stage = enter(sink, *stage, Stage::Generated);

        let nested = staging.path().join(GENERATED_SUBDIR);
        let generated = scan_files(&nested, &["*"], &[] as &[&str])?;
        self.check_collisions(&nested, &generated)?;
        move_tree(&nested, &generated, &self.output)?;
        *stage = enter(sink, *stage, Stage::NormalizedOutput);

        let staging_path = staging.path().to_path_buf();
        staging
            .close()
            .or_fail(|| format!("Fail to delete: {}", display_path(&staging_path)))?;
        Ok(self.output.clone())
    }

    fn check_collisions(&self, nested: &Path, generated: &[PathBuf]) -> Result<()> {
        if self.overwrite {
            return Ok(());
        }
        let nested = absolute(nested);
        for file in generated {
            let Ok(relative) = file.strip_prefix(&nested) else {
                continue;
            };
            let target = self.output.join(relative);
            if target.exists() {
                return Err(Error::msg(format!(
                    "Generated file already exists, enable `overwrite` to replace it: {}",
                    display_path(&target)
                )));
            }
        }
        Ok(())
    }
}

fn has_entries(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
