pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::AppConfig;
pub use error::{BridgeError, Result};
pub use types::*;
