pub mod config;
pub mod execution;
pub mod logging;
pub mod models;
pub mod operations;
pub mod orchestration;
