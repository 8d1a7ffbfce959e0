//! Data cube generation driver.
//!
//! Reads a generation request ([`config::GenConfig`]), opens the input from a
//! data store, shapes the cube and writes it to the output store while
//! reporting progress to the terminal and, optionally, to a job API.

pub mod config;
pub mod progress;
pub mod storeconfig;
pub mod write;

pub use config::{CallbackConfig, CubeConfig, GenConfig, InputConfig, OutputConfig};
pub use progress::{ApiProgressCallbackObserver, TerminalProgressCallbackObserver};
pub use storeconfig::{StoreConfig, StorePool};
pub use write::{generate_cube, open_cube, write_cube};
