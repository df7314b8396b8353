//! Error type shared by the scaler kernel and its device backends

use std::path::PathBuf;

/// Errors that can occur while building or driving the scaler
///
/// Initialization failures are fatal: the scaler is never left half-built, and
/// no retry is attempted.
#[derive(Debug, thiserror::Error)]
pub enum ScalerError {
    /// The shader source is not present in any candidate directory
    #[error("shader file `{name}` not found in any of {searched:?}")]
    ResourceNotFound { name: String, searched: Vec<PathBuf> },

    /// A shader source or include file exists but could not be read
    #[error("failed to read `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An `#include` directive names a file missing from the shader directory
    #[error("include `{name}` requested by `{}` not found", from.display())]
    IncludeNotFound { name: String, from: PathBuf },

    /// An include chain refers back to a file that is still being expanded
    #[error("include cycle through `{}`", .0.display())]
    IncludeCycle(PathBuf),

    /// Shader compilation or compute pipeline creation failed
    #[error("shader compilation failed: {0}")]
    Compilation(String),

    /// Texture, sampler or buffer creation failed
    #[error("device resource creation failed: {0}")]
    Device(String),

    /// A coefficient table does not have the expected number of values
    #[error("coefficient table `{table}` has {actual} values, expected {expected}")]
    InvalidCoefficients { table: &'static str, expected: usize, actual: usize },

    /// The requested scaling configuration cannot be expressed
    #[error("invalid scaling configuration: {0}")]
    InvalidConfig(String),

    /// `dispatch` was called before the first successful `configure`
    #[error("scaler dispatched before being configured")]
    NotConfigured,
}

pub type Result<T, E = ScalerError> = std::result::Result<T, E>;
