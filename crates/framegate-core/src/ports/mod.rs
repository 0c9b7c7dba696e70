//! 포트 정의 — 어댑터 crate가 구현하는 seam.

pub mod frame_source;
pub mod inference;
pub mod remote;
