//! Error types for image mapping and parsing.

use std::io;

use thiserror::Error;

/// An error produced when mapping or parsing an executable image.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The file could not be opened or mapped.
    #[error("failed to map image file")]
    Io(#[from] io::Error),

    /// The file is not a valid image of the expected format.
    #[error("invalid image format: {0}")]
    Malformed(&'static str),

    /// A header declared a table that extends past the end of the file.
    #[error("unexpected end of file in {0}")]
    Truncated(&'static str),
}
