//! Configuration for the refactoring engine

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::EngineConfig;
