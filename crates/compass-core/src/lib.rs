//! Configuration, secret resolution, and service wiring for Compass.

pub mod bootstrap;
pub mod config;
pub mod vault;

pub use bootstrap::AppBuilder;
pub use config::Config;
