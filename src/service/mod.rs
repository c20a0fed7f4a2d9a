//! Service layer module

pub mod detection_service;
pub mod types;

pub use detection_service::DetectionService;
pub use types::*;
