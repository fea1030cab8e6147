pub mod config;
pub mod error;
pub mod types;

pub use config::{redact_secret, FurrowConfig};
pub use error::{FurrowError, Result};
pub use types::*;
