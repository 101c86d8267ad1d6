pub mod app;

pub mod config;

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
