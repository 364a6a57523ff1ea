// Error taxonomy
pub mod error;

// TOML + environment configuration
pub mod config;

// Master key acquisition
pub mod keys;

// Encrypted OAuth outgoing connection store
pub mod credentials;

// Rotating audit trail
pub mod audit;

// Startup wiring
pub mod bootstrap;

pub use bootstrap::{bootstrap, Vault};
pub use error::{ErrorKind, RegistryError};
