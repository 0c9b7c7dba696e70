//! # framegate-infer
//!
//! 추론 워커 채널 — 프로세스 워커 라이프사이클, JSON 라인 프로토콜,
//! 워커 측 서빙 루프와 모델 런타임 seam.

pub mod channel;
pub mod protocol;
pub mod runtime;

pub use channel::ProcessWorkerChannel;
