//! Churn CLI library
//!
//! Exposes the configuration layer for testing and reuse.

pub mod config;
