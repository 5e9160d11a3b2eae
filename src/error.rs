//! Error Types
//!
//! The renderer distinguishes failures that abort a whole operation from
//! failures inside a single draw. The latter are logged and the draw is
//! skipped; only the former surface as [`RenderError`] values.

use thiserror::Error;

/// The error type for renderer operations.
#[derive(Error, Debug)]
pub enum RenderError {
    /// No internal format exists for the requested format/type combination.
    #[error("Unsupported texture format: {0}")]
    UnsupportedFormat(String),

    /// A texture dimension exceeds the device limit and cannot be resized.
    #[error("Texture size {requested} exceeds device maximum {max}")]
    SizeExceeded {
        /// Requested dimension in pixels
        requested: u32,
        /// Device limit in pixels
        max: u32,
    },

    /// Shader compilation or program linking failed on the device.
    #[error("Program link failed: {0}")]
    ProgramLinkFailed(String),

    /// The GL context has been lost; the operation cannot proceed.
    #[error("Context lost")]
    ContextLost,

    /// Read region lies outside the render target bounds.
    #[error("readRenderTargetPixels: region {x},{y} {width}x{height} is out of bounds")]
    InvalidReadBounds {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },

    /// A blending mode was configured with factors the device rejects.
    #[error("Invalid blending configuration: {0}")]
    InvalidBlending(String),

    /// A render target or texture was used in a way its descriptor forbids.
    #[error("Invalid resource state: {0}")]
    InvalidResource(String),

    /// An asynchronous task failed while polling the device.
    #[error("Async task failed: {0}")]
    TaskFailed(String),
}

/// Alias for `Result<T, RenderError>`.
pub type Result<T> = std::result::Result<T, RenderError>;
