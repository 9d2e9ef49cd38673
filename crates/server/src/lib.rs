pub mod block;
pub mod config;
pub mod event_bus;
pub mod host;
pub mod metrics;
pub mod persistence;
