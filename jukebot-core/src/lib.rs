// src/lib.rs

pub mod config;
pub mod db;
pub mod eventbus;
pub mod playback;
pub mod repositories;
pub mod services;
pub mod tasks;
pub mod test_utils;
pub mod utils;
pub mod voice;

pub use config::EngineConfig;
pub use db::Database;
pub use jukebot_common::error::Error;
