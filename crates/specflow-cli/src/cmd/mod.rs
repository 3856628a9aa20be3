pub mod analytics;
pub mod config;
pub mod store;
pub mod sync;
pub mod task;
