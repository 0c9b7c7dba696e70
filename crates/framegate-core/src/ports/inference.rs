//! 추론 엔진 포트.
//!
//! 구현: `framegate-infer` crate (프로세스 워커 채널)

use async_trait::async_trait;

use crate::config::DetectionConfig;
use crate::error::CoreError;
use crate::models::detection::{InferenceOutcome, SubmitOutcome, WorkerState};
use crate::models::frame::Frame;

/// 엔진이 오케스트레이터로 밀어 올리는 이벤트
#[derive(Debug)]
pub enum EngineEvent {
    /// 모델 로드 완료 — 제출 가능
    Ready,
    /// 제출 1건에 대한 결과 (정확히 1회 발행)
    Result(InferenceOutcome),
    /// 실패 — `CoreError::is_terminal_for_worker()`로 종단 여부 판별
    Failed(CoreError),
}

/// 추론 엔진 — 단일 인플라이트 워커 채널
///
/// 설정 변경은 반드시 `stop()` 후 새 `start()`로 수행한다.
/// 라이브 워커의 설정을 제자리에서 바꾸는 경로는 없다.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// 새 워커 기동 + 모델 로드 요청.
    ///
    /// 스폰/전송 실패는 `Errored` 상태 진입 + `Failed` 이벤트로 보고되며
    /// 자동 재시도하지 않는다.
    async fn start(&self, config: &DetectionConfig) -> Result<(), CoreError>;

    /// 프레임 제출. `Ready`가 아니면 큐잉 없이 `Dropped` 반환.
    async fn submit(&self, frame: Frame) -> SubmitOutcome;

    /// 워커 무조건 종료. 멱등 — 이미 종료된 채널에도 안전.
    async fn stop(&self);

    /// 현재 워커 상태
    fn state(&self) -> WorkerState;
}
