pub mod config;
pub mod redis;
pub mod types;
pub mod wire;
