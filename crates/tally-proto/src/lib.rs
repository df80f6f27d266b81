//! Tally gRPC API
//!
//! The protobuf definitions are in `proto/metrics.proto` and code-generated
//! via `tonic-build`.

pub mod tally {
    pub mod v1 {
        tonic::include_proto!("tally.v1");
    }
}

mod convert;

pub use tally::v1::*;

/// Metadata key carrying the caller's origin address
pub const REAL_IP_METADATA: &str = "x-real-ip";
