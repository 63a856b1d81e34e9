#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

//! The gRPC read surface over a logdir loader: thin projection of
//! accumulator snapshots into `DataProvider` responses, plus the blob-key
//! codec that makes individual blobs addressable.

pub mod blobkey;
pub mod service;

pub use service::DataProviderService;
