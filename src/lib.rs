//! Meeting Signal central library
//! A Bluetooth LE central that runs GATT operations one at a time across
//! all connected devices and reports their outcomes to listeners.

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod state;
pub mod utils;

pub use error::{BleError, ConfigError};
