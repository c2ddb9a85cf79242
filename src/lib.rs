//! Plughost - plugin runtime and distribution subsystem for extensible hosts

pub mod config;
pub mod defaults;
pub mod error;
pub mod lifecycle;
pub mod loader;
pub mod package;
pub mod repository;

pub use config::{ConfigStore, HostConfig};
pub use error::{HostError, Result};
