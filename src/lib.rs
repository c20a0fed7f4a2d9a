//! Shelf product detection service library

pub mod api;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod service;
pub mod utils;

pub use config::Config;
