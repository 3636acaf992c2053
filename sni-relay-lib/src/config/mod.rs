mod loader;
mod types;

pub use loader::{from_env, load};
pub use types::{Config, LoggingConfig};
