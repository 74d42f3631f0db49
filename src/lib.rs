pub mod config;
pub mod data;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod utils;
