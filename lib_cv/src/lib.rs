pub mod board;
pub mod calibration;
pub mod config;
pub mod detection;
pub mod dictionary;
pub mod error;
pub mod overlay;
pub mod pose;
pub mod record;
pub mod source;
pub mod synthetic;
pub mod verification;

pub use error::{Error, Result};
