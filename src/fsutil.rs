//! Filesystem preconditions and primitives.
//!
//! Every failure names the normalized absolute path involved. [`atomic_move`]
//! is the only way a finished download or extraction reaches its final name,
//! so concurrent readers see either nothing or the complete artifact.

use crate::error::{display_path, Cause, Error, Result, ResultExt};
use crate::platform::Platform;
use glob::Pattern;
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Lexically normalize `path` and make it absolute against the current directory.
///
/// `.` components are dropped and `..` pops the previous component. Symlinks
/// are not resolved.
pub fn absolute(path: &Path) -> PathBuf {
    let joined;
    let path = if path.is_absolute() {
        path
    } else {
        match std::env::current_dir() {
            Ok(cwd) => {
                joined = cwd.join(path);
                &joined
            }
            Err(_) => path,
        }
    };

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Fail unless `path` is a regular file that can be opened for reading.
pub fn require_readable_file(path: &Path) -> Result<()> {
    if !path.is_file() || File::open(path).is_err() {
        return Err(Error::msg(format!(
            "Fail to read file: {}",
            display_path(path)
        )));
    }
    Ok(())
}

/// Fail unless `path` is a directory whose entries can be listed.
pub fn require_readable_dir(path: &Path) -> Result<()> {
    if !path.is_dir() || fs::read_dir(path).is_err() {
        return Err(Error::msg(format!(
            "Fail to read from directory: {}",
            display_path(path)
        )));
    }
    Ok(())
}

/// Fail unless `path` is a directory the current process can create files in.
pub fn require_writable_dir(path: &Path) -> Result<()> {
    let writable = path.is_dir() && tempfile::tempfile_in(path).is_ok();
    if !writable {
        return Err(Error::msg(format!(
            "Fail to write into directory: {}",
            display_path(path)
        )));
    }
    Ok(())
}

/// Fail unless `path` is a readable file that can be executed.
///
/// On platforms with an execute permission bit, a file without the
/// owner-execute bit gets it added in place first.
pub fn require_executable_file(path: &Path) -> Result<()> {
    require_executable_file_on(path, Platform::current())
}

pub(crate) fn require_executable_file_on(path: &Path, platform: Platform) -> Result<()> {
    require_readable_file(path)?;
    if !platform.capabilities().exec_permission_bit {
        return Ok(());
    }

    if !is_executable(path)? {
        add_owner_execute(path).map_err(|cause| {
            Error::with_cause(
                format!(
                    "Fail to set executable flag to file: {}",
                    display_path(path)
                ),
                cause,
            )
        })?;
    }

    if !is_executable(path)? {
        return Err(Error::msg(format!(
            "Fail to execute file: {}",
            display_path(path)
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let meta =
        fs::metadata(path).or_fail(|| format!("Fail to read file: {}", display_path(path)))?;
    Ok(meta.permissions().mode() & 0o100 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> Result<bool> {
    Ok(false)
}

#[cfg(unix)]
fn add_owner_execute(path: &Path) -> std::result::Result<(), Cause> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o100);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn add_owner_execute(_path: &Path) -> std::result::Result<(), Cause> {
    Err(Cause::Unsupported("posix file permissions"))
}

/// Create `path` and any missing ancestors, then check it is writable.
///
/// Returns the normalized path.
pub fn mkdirs(path: &Path) -> Result<PathBuf> {
    let path = absolute(path);
    if !path.exists() {
        fs::create_dir_all(&path)
            .or_fail(|| format!("Fail to create directory: {}", path.display()))?;
    }
    require_writable_dir(&path)?;
    Ok(path)
}

/// Recursively collect regular files under `root` whose name matches at least
/// one of `includes` and none of `excludes`.
///
/// Patterns are shell wildcards (`*`, `?`, `[...]`) matched against the file
/// name only. Paths are returned normalized and absolute, in depth-first order
/// with siblings sorted by name.
pub fn scan_files<I, E>(root: &Path, includes: &[I], excludes: &[E]) -> Result<Vec<PathBuf>>
where
    I: AsRef<str>,
    E: AsRef<str>,
{
    require_readable_dir(root)?;
    let includes = compile_patterns(includes)?;
    let excludes = compile_patterns(excludes)?;

    let root = absolute(root);
    let mut found = Vec::new();
    for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = entry.or_fail(|| format!("Fail to scan directory: {}", root.display()))?;
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let included = includes.iter().any(|p| p.matches(&name));
        let excluded = excludes.iter().any(|p| p.matches(&name));
        if included && !excluded {
            found.push(absolute(entry.path()));
        }
    }
    Ok(found)
}

fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|raw| {
            let raw = raw.as_ref();
            Pattern::new(raw).or_fail(|| format!("Invalid wildcard pattern: {raw}"))
        })
        .collect()
}

/// Remove a file or a whole directory tree. Missing paths are ignored.
pub fn delete_recursive(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(Error::with_cause(
                format!("Fail to delete: {}", display_path(path)),
                e,
            ))
        }
    };

    if !meta.is_dir() {
        return fs::remove_file(path)
            .or_fail(|| format!("Fail to delete: {}", display_path(path)));
    }

    for entry in WalkDir::new(path).contents_first(true) {
        let entry = entry.or_fail(|| format!("Fail to delete: {}", display_path(path)))?;
        let current = entry.path();
        let removed = if entry.file_type().is_dir() {
            fs::remove_dir(current)
        } else {
            fs::remove_file(current)
        };
        removed.or_fail(|| format!("Fail to delete: {}", display_path(current)))?;
    }
    Ok(())
}

/// Rename `source` onto `target`, replacing an existing target file.
///
/// Both paths must be on the same filesystem; there is no copy fallback.
pub fn atomic_move(source: &Path, target: &Path) -> Result<()> {
    fs::rename(source, target).or_fail(|| {
        format!(
            "Fail to move '{}' into '{}'",
            display_path(source),
            display_path(target)
        )
    })
}

/// Move every path in `items` (all inside `source_root`) to the same relative
/// location under `target_root`.
///
/// Regular files are moved with [`atomic_move`]; directories are recreated.
pub fn move_tree(source_root: &Path, items: &[PathBuf], target_root: &Path) -> Result<()> {
    let source_root = absolute(source_root);
    for source in items {
        let source = absolute(source);
        let relative = source.strip_prefix(&source_root).map_err(|_| {
            Error::msg(format!(
                "Path '{}' is not inside '{}'",
                source.display(),
                source_root.display()
            ))
        })?;
        let target = target_root.join(relative);
        if let Some(parent) = target.parent() {
            mkdirs(parent)?;
        }
        if source.is_file() {
            atomic_move(&source, &target)?;
        } else {
            mkdirs(&target)?;
        }
    }
    Ok(())
}
