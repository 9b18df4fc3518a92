//! Build-time code generation with the Kaitai Struct compiler.
//!
//! The crate fetches a versioned compiler distribution into a shared cache,
//! unpacks it once and runs it over a set of `.ksy` specifications to produce
//! Java sources:
//!
//! - **Filesystem utilities** - Precondition checks, recursive scan/delete, atomic move
//! - **Fetch** - Idempotent download and ZIP extraction with atomic commit
//! - **Distribution** - Release URL, cache layout, start script lookup
//! - **Process** - Subprocess runs with timeout and tee'd output capture
//! - **Generator** - Version probe, generation and exact-output normalization
//! - **Adapter** - `kaitai.toml` driven entry point used by the binary
//!
//! # Architecture
//!
//! ```text
//! adapter ──> distribution ──> fetch ──> fsutil
//!    │
//!    └──────> generator ──> process ──> sink
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use kaitai_build::distribution::{download_compiler, prepare_cache, resolve_url, DEFAULT_VERSION};
//! use kaitai_build::{GenerationRequest, LogSink};
//! use std::path::Path;
//!
//! # fn main() -> kaitai_build::Result<()> {
//! let sink = LogSink;
//! let url = resolve_url(None, DEFAULT_VERSION)?;
//! let cache = prepare_cache(Path::new("/tmp/kaitai-cache"), &sink)?;
//! let compiler = download_compiler(&url, &cache, &sink)?;
//!
//! let generated = GenerationRequest::new(compiler, "target/generated", "com.example.formats")?
//!     .with_source("formats/ico.ksy")?
//!     .exact_output(true)
//!     .generate(&sink)?;
//! println!("{}", generated.display());
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod distribution;
pub mod error;
pub mod fetch;
pub mod fsutil;
pub mod generator;
pub mod platform;
pub mod process;
pub mod sink;

#[cfg(test)]
mod test_support;

pub use error::{Cause, Error, Result};
pub use generator::GenerationRequest;
pub use platform::Platform;
pub use sink::{LogSink, NopSink, Sink};
