//! Content-generation workers: shared wiring plus the pull and push variants.

pub mod app;
pub mod config;
pub mod pull;
pub mod services;
