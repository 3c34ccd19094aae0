pub mod api;
pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod jobs;
pub mod messages;
pub mod metrics;
pub mod poller;
pub mod runner;
