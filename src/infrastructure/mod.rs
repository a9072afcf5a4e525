pub mod activity_store;
pub mod config;
pub mod error;
pub mod logging;
