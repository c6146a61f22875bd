pub mod config;
pub mod error;

pub use config::SophiaConfig;
pub use error::{Result, SophiaError};
