//! FRAMEGATE 핵심 에러 타입.
//!
//! 모든 어댑터 crate는 자체 실패를 `CoreError`로 매핑한다.
//! 워커 관련 에러(스폰/로드/추론)와 원격 API 에러를 구분하여
//! 전파 정책(§ 종단/일시/복구 가능)을 타입 수준에서 표현한다.

use thiserror::Error;

/// 코어 레이어 에러.
///
/// 전파 정책:
/// - `SpawnFailure`/`LoadFailure`: 현재 워커 인스턴스에 종단적 — 재설정 필요, 자동 재시도 없음
/// - `InferenceFailure`: 일시적 — 해당 프레임만 유실, 채널은 Ready로 복귀
/// - `RemoteSendFailure`/`RemoteTimeout`: 복구 가능 — 소비자에게 공지 후 루프 재스케줄
/// - `ProtocolViolation`: 로그 후 폐기 — 절대 오케스트레이터를 중단시키지 않음
#[derive(Debug, Error)]
pub enum CoreError {
    /// 워커 프로세스 시작 실패
    #[error("워커 스폰 실패: {0}")]
    SpawnFailure(String),

    /// 모델/프롬프트 로드 거부
    #[error("모델 로드 실패: {0}")]
    LoadFailure(String),

    /// 제출된 프레임이 결과를 내지 못함
    #[error("추론 실패: {0}")]
    InferenceFailure(String),

    /// 원격 API 전송/파싱 실패
    #[error("원격 전송 실패: {0}")]
    RemoteSendFailure(String),

    /// 원격 API 응답 시간 초과
    #[error("원격 응답 타임아웃: {timeout_ms}ms 초과")]
    RemoteTimeout {
        /// 초과된 타임아웃 시간 (밀리초)
        timeout_ms: u64,
    },

    /// 예상치 못한/형식 오류 메시지 수신
    #[error("프로토콜 위반: {0}")]
    ProtocolViolation(String),

    /// JSON 직렬화/역직렬화 실패
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 설정값 오류
    #[error("설정 에러: {0}")]
    Config(String),

    /// 네트워크 에러 (연결 실패 등)
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 프레임 소스 에러 (캡처 실패 등)
    #[error("프레임 소스 에러: {0}")]
    FrameSource(String),

    /// I/O 에러
    #[error("I/O 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 내부 에러 (예상치 못한 상황)
    #[error("내부 에러: {0}")]
    Internal(String),
}

impl CoreError {
    /// 워커 인스턴스에 종단적인 에러인지 여부.
    ///
    /// 종단 에러는 명시적 재설정(stop → start) 없이는 복구되지 않는다.
    pub fn is_terminal_for_worker(&self) -> bool {
        matches!(self, Self::SpawnFailure(_) | Self::LoadFailure(_))
    }

    /// 소비자 공지 후 루프가 계속 진행해도 되는 에러인지 여부.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InferenceFailure(_)
                | Self::RemoteSendFailure(_)
                | Self::RemoteTimeout { .. }
                | Self::ProtocolViolation(_)
        )
    }
}
