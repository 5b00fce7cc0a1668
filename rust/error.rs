use thiserror::Error;

/// Errors reported by the stain normalization pipeline.
#[derive(Debug, Error)]
pub enum StainError {
    #[error("image has {found} channels, expected {expected}")]
    ChannelMismatch { expected: usize, found: usize },

    #[error("cannot build a reference profile from an image with no pixels")]
    EmptyImage,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid reference profile: {0}")]
    InvalidProfile(String),

    #[error(
        "expected {expected} distinguishers with at least 3 channels, got {channels} × {found}"
    )]
    InvalidDistinguishers {
        expected: usize,
        channels: usize,
        found: usize,
    },

    #[error("normalization cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, StainError>;
