//! 통합 테스트 공용 목 구현.
//!
//! 스크립트 엔진(수동 응답 주입 + 호출 계수), 원격 제공자 목.

#![allow(dead_code)]

use async_trait::async_trait;
use framegate_core::config::DetectionConfig;
use framegate_core::error::CoreError;
use framegate_core::models::detection::{InferenceOutcome, LabelScore, SubmitOutcome, WorkerState};
use framegate_core::models::frame::Frame;
use framegate_core::ports::inference::{EngineEvent, InferenceEngine};
use framegate_core::ports::remote::{RemoteAnalysisRequest, RemoteReply, RemoteVisionProvider};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// 스크립트 엔진 — 실제 워커 없이 채널 의미론 재현.
///
/// `start()` 시 즉시 Ready를 방출하고, 제출된 요청은 테스트가
/// `complete()`를 호출할 때까지 Busy로 남는다 (느린 워커 모사).
pub struct ScriptedEngine {
    state: Mutex<WorkerState>,
    event_tx: UnboundedSender<EngineEvent>,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    /// 수락된(드롭되지 않은) 제출 수
    pub accepted_submits: AtomicUsize,
    /// 드롭된 제출 수
    pub dropped_submits: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(event_tx: UnboundedSender<EngineEvent>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(WorkerState::Uninitialized),
            event_tx,
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            accepted_submits: AtomicUsize::new(0),
            dropped_submits: AtomicUsize::new(0),
        })
    }

    /// 진행 중 요청 완료 — Ready 복귀 + 결과 방출
    pub fn complete(&self, outcome: InferenceOutcome) {
        *self.state.lock() = WorkerState::Ready;
        let _ = self.event_tx.send(EngineEvent::Result(outcome));
    }

    /// 임의 이벤트 주입
    pub fn inject(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    async fn start(&self, _config: &DetectionConfig) -> Result<(), CoreError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = WorkerState::Ready;
        let _ = self.event_tx.send(EngineEvent::Ready);
        Ok(())
    }

    async fn submit(&self, _frame: Frame) -> SubmitOutcome {
        let mut state = self.state.lock();
        if *state == WorkerState::Ready {
            *state = WorkerState::Busy;
            self.accepted_submits.fetch_add(1, Ordering::SeqCst);
            SubmitOutcome::Submitted
        } else {
            self.dropped_submits.fetch_add(1, Ordering::SeqCst);
            SubmitOutcome::Dropped
        }
    }

    async fn stop(&self) {
        // 멱등 — 이미 종료면 계수하지 않음
        let mut state = self.state.lock();
        if *state != WorkerState::Terminated {
            *state = WorkerState::Terminated;
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn state(&self) -> WorkerState {
        *self.state.lock()
    }
}

/// 원격 제공자 목 동작
pub enum RemoteBehavior {
    /// 영원히 응답 없음 (타임아웃/중첩 방지 검증)
    NeverReply,
    /// 항상 캡션 텍스트
    Caption(String),
    /// 항상 점수 목록
    Scores(Vec<LabelScore>),
    /// 항상 실패
    AlwaysFail,
    /// 처음 n회 실패 후 캡션 성공
    FailThenCaption(usize, String),
}

/// 원격 제공자 목 — 호출 계수 + 스크립트 동작
pub struct MockRemoteProvider {
    behavior: RemoteBehavior,
    pub calls: AtomicUsize,
}

impl MockRemoteProvider {
    pub fn new(behavior: RemoteBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteVisionProvider for MockRemoteProvider {
    async fn analyze(&self, _request: &RemoteAnalysisRequest) -> Result<RemoteReply, CoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            RemoteBehavior::NeverReply => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            RemoteBehavior::Caption(text) => Ok(RemoteReply {
                text: Some(text.clone()),
                scores: Vec::new(),
            }),
            RemoteBehavior::Scores(scores) => Ok(RemoteReply {
                text: None,
                scores: scores.clone(),
            }),
            RemoteBehavior::AlwaysFail => {
                Err(CoreError::RemoteSendFailure("연결 거부".to_string()))
            }
            RemoteBehavior::FailThenCaption(n, text) => {
                if call < *n {
                    Err(CoreError::RemoteSendFailure("일시 장애".to_string()))
                } else {
                    Ok(RemoteReply {
                        text: Some(text.clone()),
                        scores: Vec::new(),
                    })
                }
            }
        }
    }

    fn provider_name(&self) -> &str {
        "mock-remote"
    }
}
