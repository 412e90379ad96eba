use thiserror::Error;

/// Everything that can go wrong while configuring or running quantization.
///
/// The set is flat and `Copy` so callers can match on it cheaply and
/// bindings can map each variant to a status code.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No palette within the configured color budget can reach the
    /// caller's minimum quality.
    #[error("quantization result is below the minimum acceptable quality")]
    QualityTooLow,

    /// A parameter was outside its documented range, or an operation was
    /// attempted in a state that no longer permits it.
    #[error("value outside the expected range")]
    ValueOutOfRange,

    /// An allocation failed. Not produced by this crate directly; reserved
    /// for bindings that translate allocator failures into a status.
    #[error("out of memory")]
    OutOfMemory,

    /// The abort flag was raised while work was in progress.
    #[error("aborted by the caller")]
    Aborted,

    /// The image no longer has pixel data to operate on.
    #[error("source bitmap is not available")]
    BitmapNotAvailable,

    /// The caller-supplied output buffer cannot hold one byte per pixel.
    #[error("output buffer is too small")]
    BufferTooSmall,

    /// An input reference was invalid. Reserved for bindings; safe Rust
    /// callers cannot trigger it.
    #[error("invalid pointer")]
    InvalidPointer,
}
