//! Service layer types

use serde::{Deserialize, Serialize};

pub const STATUS_HEALTHY: &str = "healthy";
pub const STATUS_MODEL_NOT_LOADED: &str = "model_not_loaded";

/// Health check result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResult {
    pub healthy: bool,
    pub status: String,
    pub model_loaded: bool,
    pub uptime_seconds: u64,
}

/// Class sync result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub class_count: usize,
}
