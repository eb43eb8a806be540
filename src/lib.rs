
pub mod aligner;
pub mod config;
pub mod detector;
pub mod fetcher;
pub mod monitor;
pub mod notifier;
pub mod publisher;
pub mod store;
