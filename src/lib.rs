pub mod cli;
pub mod config;
pub mod dump;
pub mod models;
pub mod peer;
pub mod session;
pub mod utils;
pub mod wire;
