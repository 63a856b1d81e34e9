#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

//! Record-level input for event files: the checksummed frame format, a
//! truncation-tolerant frame reader, and the per-file reader task that
//! decodes frames into events and dozes at end-of-file.

pub mod eventfile;
pub mod masked_crc;
pub mod record;

#[cfg(test)]
mod scripted;
