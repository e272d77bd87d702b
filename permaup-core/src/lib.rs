pub mod chunk;
pub mod error;
pub mod manifest;
pub mod merkle;
pub mod path_safety;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod transport;
pub mod tx;
pub mod upload;
pub mod wallet;

pub use error::{Error, Result};
