pub mod config;
pub mod error;
pub mod listing;

pub use config::Config;
pub use error::*;
pub use listing::*;
