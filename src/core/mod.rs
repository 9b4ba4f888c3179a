//! Core types, constants and node registries for the positioning system

pub mod types;
pub mod constants;
pub mod registry;

pub use types::*;
pub use constants::*;
pub use registry::{AnchorRegistry, TagRegistry, RegistryError};
