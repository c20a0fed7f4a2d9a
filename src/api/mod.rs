//! API module - gRPC and REST handlers

use uuid::Uuid;

pub mod dto;
pub mod grpc;
pub mod rest;

pub use grpc::GrpcHandler;
pub use rest::{create_rest_router, AppState};

/// Short id tying together the log lines of one request.
pub fn request_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
