//! Normalized dataset records shared by the scanner, the cache and the units.

pub mod enums;
pub mod sample;

pub use enums::*;
pub use sample::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid value for {field}: {value}")]
    InvalidEnum { field: String, value: String },
}
