pub mod errors;
pub mod id;
pub mod secret;
pub mod state;

pub use errors::{ConfigError, ShoalError};
pub use id::InstanceId;
pub use secret::mask_secret;
pub use state::ConnectionState;

pub type Result<T> = std::result::Result<T, ShoalError>;
