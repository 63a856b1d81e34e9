#![forbid(unsafe_code)]

//! Generated protobuf and gRPC types for the runlog wire formats. See the
//! `.proto` files under `proto/` for the source of truth.

pub mod v1 {
    tonic::include_proto!("runlog.v1");
}
