//! docsift - asynchronous document analysis service.
//!
//! Accepts documents over HTTP, runs a slow blocking analysis tool on them in
//! a bounded worker pool, and lets clients poll for the resulting artifacts.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod server;
pub mod storage;
pub mod tasks;
