//! Dataset scanning: walk the root, pair images with annotations, classify
//! splits and produce the ordered sample sequence.

pub mod layout;
pub mod parsers;
pub mod scanner;

pub use layout::SplitManifest;
pub use parsers::{AnnotationParser, CocoIndex, JsonParser, YoloParser};
pub use scanner::{DatasetScanner, ScanFinding, ScanReport};

use std::path::PathBuf;

use thiserror::Error;

/// Fatal scan failures. Per-sample problems are `ScanFinding`s, not errors.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Dataset root does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("Dataset root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("No recognizable images under {0}")]
    NoImages(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid split manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid annotation JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Image dimensions required but unavailable: {0}")]
    DimensionsUnavailable(String),
}
