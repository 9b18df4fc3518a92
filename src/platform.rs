//! Host platform capabilities.
//!
//! The behavior that differs between platform families is kept in one table
//! and resolved once through [`Platform::current`].

/// Platform family the compiler runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

/// Platform-dependent behavior of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Files carry an owner-execute permission bit that may need to be set.
    pub exec_permission_bit: bool,
    /// Suffix removed from the located start script to get the invocable path.
    pub script_suffix_to_strip: &'static str,
    /// The compiler build for this platform accepts `--no-version-check`.
    pub supports_no_version_check: bool,
}

const UNIX: Capabilities = Capabilities {
    exec_permission_bit: true,
    script_suffix_to_strip: ".bat",
    supports_no_version_check: true,
};

const WINDOWS: Capabilities = Capabilities {
    exec_permission_bit: false,
    script_suffix_to_strip: "",
    supports_no_version_check: false,
};

impl Platform {
    /// Platform this binary was built for.
    pub const fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }

    pub const fn capabilities(self) -> &'static Capabilities {
        match self {
            Platform::Unix => &UNIX,
            Platform::Windows => &WINDOWS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Platform::Unix => "unix",
            Platform::Windows => "windows",
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_keeps_script_suffix_and_skips_version_check_flag() {
        let caps = Platform::Windows.capabilities();
        assert_eq!(caps.script_suffix_to_strip, "");
        assert!(!caps.supports_no_version_check);
        assert!(!caps.exec_permission_bit);
    }

    #[test]
    fn unix_strips_bat_suffix() {
        let caps = Platform::Unix.capabilities();
        assert_eq!(caps.script_suffix_to_strip, ".bat");
        assert!(caps.supports_no_version_check);
    }

    #[cfg(unix)]
    #[test]
    fn current_is_unix_on_unix_hosts() {
        assert_eq!(Platform::current(), Platform::Unix);
    }
}
