pub mod engine_config;

pub use engine_config::{CONFIG_FILE_NAME, EngineConfig};
