//! Trading logic: trade-event lifecycle, copy-trading engine, configuration.

mod config;
mod copy_engine;
mod lifecycle;

pub use config::DeskConfig;
pub use copy_engine::CopyEngine;
