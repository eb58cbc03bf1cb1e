//! Error types for kernelfx.
//!
//! Only setup failures are reported as errors: a kernel whose parameters cannot
//! produce a valid evaluation context fails before any pixel is processed.
//! Per-pixel problems (out-of-bounds samples, NaN contributions, oversized
//! particle footprints) are resolved locally by skipping or clamping and never
//! abort a pass.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, KernelError>;

/// Errors that can occur while preparing or running a kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    /// A matrix that must be inverted has no inverse.
    #[error("{what} matrix is not invertible")]
    SingularMatrix {
        /// Which matrix failed to invert.
        what: &'static str,
    },

    /// A pixel index fell outside an image's extent.
    #[error("pixel ({x}, {y}) is outside a {width}x{height} image")]
    OutOfBounds {
        /// Requested column.
        x: i32,
        /// Requested row.
        y: i32,
        /// Image width.
        width: u32,
        /// Image height.
        height: u32,
    },

    /// A parameter flag requested an input image that was not bound.
    #[error("input image `{0}` is required by the current parameters but was not provided")]
    MissingInput(&'static str),

    /// A parameter value cannot produce a valid evaluation context.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Parameter field name.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A polyline was given more points than the kernel supports.
    #[error("polyline has {count} points, at most {max} are supported")]
    TooManyPoints {
        /// Points supplied.
        count: usize,
        /// Capacity of the kernel.
        max: usize,
    },

    /// Particle slot indices no longer fit the depth-cell encoding.
    #[error("{count} particle slots exceed the addressable range")]
    TooManyParticles {
        /// Slots supplied.
        count: usize,
    },

    /// Image decoding or encoding failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Reading or writing a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl KernelError {
    /// Shorthand for [`KernelError::InvalidParameter`].
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        KernelError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
