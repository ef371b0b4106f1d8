//! Live face detection pipeline and still-image face dataset tooling.

pub mod config;
pub mod error;
pub mod faces;
pub mod live;
pub mod logging;
pub mod pipeline;
pub mod source;
pub mod targetter;

pub use error::{RecallerError, Result};
