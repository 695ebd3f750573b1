//! Core crate for vidgen: job tracking, video records and the HTTP surface.

pub mod config;
pub mod generation;
pub mod jobs;
pub mod logging;
pub mod server;
pub mod store;
pub mod templates;
