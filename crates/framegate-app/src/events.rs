//! 소비자 이벤트 버스.
//!
//! `tokio::broadcast` 기반. 프레젠테이션 레이어(오버레이/대시보드)가
//! 구독하는 출력 표면 — 검증 틱, 감지 목록, 원격 관찰, 에러.

use framegate_core::models::detection::{Detection, LabelScore};
use framegate_core::models::validation::{QualitySample, ValidationTick};
use tokio::sync::broadcast;
use tracing::debug;

/// 파이프라인 소비자 이벤트
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// 주기 검증 리포트 — 틱 시점의 최신 {모션, 분류} 점수
    ValidationTick(ValidationTick),
    /// 임계값/필터 통과한 감지 목록
    Detections(Vec<Detection>),
    /// 제로샷 분류 점수 목록
    Classification(Vec<LabelScore>),
    /// 원격 멀티모달 관찰 텍스트
    RemoteResponse(String),
    /// 원격 대조 모드 점수 (기본 프롬프트 항목)
    RemoteScore(LabelScore),
    /// 원격 무응답 공지 (1회성 liveness 경고)
    RemoteNotice(String),
    /// 요청형 스크린샷 — 인코딩 데이터 + 품질 샘플
    Screenshot {
        data_base64: String,
        quality: QualitySample,
    },
    /// 에러 보고 (파이프라인은 계속 동작)
    Error(String),
}

/// 소비자 이벤트 버스
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// 새 이벤트 버스 생성
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// 이벤트 발행 — 구독자가 없어도 에러 아님
    pub fn publish(&self, event: PipelineEvent) {
        debug!("이벤트 발행: {:?}", std::mem::discriminant(&event));
        let _ = self.tx.send(event);
    }

    /// 구독자 생성
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}
