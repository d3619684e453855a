#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod error;
pub mod request;
pub mod services;
pub mod sources;
pub mod transform;
pub mod utils;
