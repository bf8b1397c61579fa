//! metast-driver - Compilation pipeline for the metast metalanguage
//!
//! Ties the phases together:
//!
//! ```text
//!   ProgramSpec (JSON) ──┐
//!                        ├──→ CompilationUnit → optimize → lower → Artifact
//!   Builder API ─────────┘                                          ↓
//!                                                        Loader (bytecode)
//! ```
//!
//! A [`Session`] owns the type registry for the programs it loads, caches
//! artifacts by unit fingerprint and compiles batches of units in parallel.

pub mod logging;
pub mod pipeline;
pub mod program;
pub mod session;

pub use logging::init_logging;
pub use pipeline::{compile, Compiled};
pub use program::{parse_input, ProgramSpec};
pub use session::{CacheStats, Session};

use metast_error::{BuildError, CompileError, Diagnostic, RuntimeError};
use std::path::PathBuf;
use thiserror::Error;

/// Everything the driver can fail with
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("cannot access `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<BuildError> for DriverError {
    fn from(err: BuildError) -> Self {
        DriverError::Compile(err.into())
    }
}

impl DriverError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DriverError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        match self {
            DriverError::Compile(e) => e.into(),
            DriverError::Runtime(e) => e.into(),
            DriverError::Io { .. } => Diagnostic::error(self.to_string()),
        }
    }
}
