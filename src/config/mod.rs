pub mod config;
pub mod resolution;
