pub mod concurrency;
pub mod config;
pub mod connector;
pub mod errors;
pub mod mapping;
pub mod plan;
pub mod progress;
pub mod retry;
pub mod schema;

pub mod database;
pub mod services;

#[cfg(feature = "server")]
pub mod server;
