pub mod address;
pub mod batcher;
pub mod config;
pub mod db;
pub mod decoder;
pub mod engine;
pub mod events;
pub mod history;
pub mod metrics;
pub mod pool;
pub mod price_feed;
pub mod pricing;

pub mod error;
pub mod logger;
pub mod time;
