//! Configuration, secrets and engine wiring for grounder.

pub mod bootstrap;
pub mod config;
pub mod secret;

pub use bootstrap::Engine;
pub use config::Config;
