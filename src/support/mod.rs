pub mod errors;
pub mod shutdown;

pub use errors::{CommandError, ConfigError, TransportError};
pub use shutdown::ShutdownSignal;
