use thiserror::Error;

/// Errors from the framed codec (§4.1).
///
/// A `CodecError` on the stream is always fatal to the session (§7); a
/// `CodecError` on a dataframe pack is handled by the caller as a
/// drop-front-of-queue, not a `stop()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("body length {len} exceeds the {max} byte limit")]
    BodyTooLarge { len: u32, max: u32 },
    #[error("header declared {declared} bytes but only {available} were supplied")]
    Truncated { declared: usize, available: usize },
    #[error("malformed payload: {0}")]
    Malformed(String),
}
