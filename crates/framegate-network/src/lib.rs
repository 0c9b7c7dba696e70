//! # framegate-network
//!
//! 원격 멀티모달 API 어댑터.

pub mod remote_client;

pub use remote_client::HttpRemoteVision;
