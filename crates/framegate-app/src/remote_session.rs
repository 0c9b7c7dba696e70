//! 원격 세션 관리자.
//!
//! 캡처 루프와 독립적으로 도는 엄격한 순차 루프: 프레임 1장 캡처 →
//! 다운스케일/인코딩 → 원격 멀티모달 요청 → 응답 발행 → 고정 지연 후
//! 재스케줄. 응답 대기 중에는 절대 다음 요청을 내보내지 않는다.

use framegate_core::config::RemoteConfig;
use framegate_core::error::CoreError;
use framegate_core::models::frame::Frame;
use framegate_core::ports::frame_source::FrameSource;
use framegate_core::ports::remote::{RemoteAnalysisRequest, RemoteReply, RemoteVisionProvider};
use framegate_vision::encoder::{self, WebPQuality};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{EventBus, PipelineEvent};

/// 원격 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSessionState {
    /// 비활성 (생성 전/해체 후)
    Disabled,
    /// 프레임 소스 준비 대기
    Initializing,
    /// 다음 캡처 대기
    Active,
    /// 요청 1건 진행 중
    AwaitingReply,
    /// 연속 실패 한도 초과 — 수동 재개 대기
    Errored,
}

/// 원격 세션 핸들 — 루프 태스크의 소유자
pub struct RemoteSession {
    state: Arc<Mutex<RemoteSessionState>>,
    enabled_tx: watch::Sender<bool>,
    resume: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteSession {
    /// 세션 생성 + 루프 기동
    pub fn spawn(
        config: RemoteConfig,
        source: Arc<dyn FrameSource>,
        provider: Arc<dyn RemoteVisionProvider>,
        bus: Arc<EventBus>,
    ) -> Self {
        let state = Arc::new(Mutex::new(RemoteSessionState::Disabled));
        let (enabled_tx, enabled_rx) = watch::channel(true);
        let resume = Arc::new(Notify::new());

        let task = tokio::spawn(run_loop(
            config,
            source,
            provider,
            bus,
            state.clone(),
            resume.clone(),
            enabled_rx,
        ));

        Self {
            state,
            enabled_tx,
            resume,
            task: Mutex::new(Some(task)),
        }
    }

    /// 현재 상태
    pub fn state(&self) -> RemoteSessionState {
        *self.state.lock()
    }

    /// `Errored` 정지 상태에서 수동 재개
    pub fn resume(&self) {
        self.resume.notify_one();
    }

    /// 비활성화 — 진행 중인 반복이 발행/재스케줄 전에 확인하는 liveness 플래그
    pub fn disable(&self) {
        let _ = self.enabled_tx.send(false);
    }

    /// 완전 해체 — 비활성화 후 태스크 중단
    pub async fn shutdown(&self) {
        self.disable();
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        *self.state.lock() = RemoteSessionState::Disabled;
    }
}

/// 분석 요청 구성 — 다운스케일 + WebP/Base64 인코딩
fn build_request(
    config: &RemoteConfig,
    frame: &Frame,
) -> Result<RemoteAnalysisRequest, CoreError> {
    let scaled = encoder::downscale(frame, config.max_edge)?;
    let image_base64 = encoder::encode_webp_base64(&scaled, WebPQuality::Low)?;
    Ok(RemoteAnalysisRequest {
        image_base64,
        media_type: "image/webp".to_string(),
        prompt: config.prompt.clone(),
        negative_prompt: config.negative_prompt.clone(),
    })
}

/// 응답 발행.
///
/// 대조 모드: 기본 프롬프트에 해당하는 항목 선택, 없으면 빈 결과.
/// 캡션 모드: 관찰 텍스트 그대로.
fn publish_reply(bus: &EventBus, config: &RemoteConfig, reply: RemoteReply) {
    if config.negative_prompt.is_some() {
        match reply.score_for(&config.prompt) {
            Some(entry) => bus.publish(PipelineEvent::RemoteScore(entry.clone())),
            None => debug!("기본 프롬프트 항목 없음 — 빈 결과"),
        }
    } else if let Some(text) = reply.text {
        bus.publish(PipelineEvent::RemoteResponse(text));
    } else {
        debug!("응답 텍스트 없음");
    }
}

/// 지연 대기. 비활성화되면 `false`.
async fn sleep_unless_disabled(
    delay: Duration,
    enabled_rx: &mut watch::Receiver<bool>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        let changed = tokio::select! {
            _ = &mut sleep => return true,
            changed = enabled_rx.changed() => changed,
        };
        if changed.is_err() || !*enabled_rx.borrow() {
            return false;
        }
    }
}

fn set_state(state: &Mutex<RemoteSessionState>, to: RemoteSessionState) {
    let mut current = state.lock();
    if *current != to {
        debug!("원격 세션 상태: {:?} → {:?}", *current, to);
        *current = to;
    }
}

async fn run_loop(
    config: RemoteConfig,
    source: Arc<dyn FrameSource>,
    provider: Arc<dyn RemoteVisionProvider>,
    bus: Arc<EventBus>,
    state: Arc<Mutex<RemoteSessionState>>,
    resume: Arc<Notify>,
    mut enabled_rx: watch::Receiver<bool>,
) {
    set_state(&state, RemoteSessionState::Initializing);

    // 프레임 소스 준비 대기
    loop {
        if !*enabled_rx.borrow() {
            set_state(&state, RemoteSessionState::Disabled);
            return;
        }
        if source.is_ready() {
            break;
        }
        if !sleep_unless_disabled(Duration::from_millis(200), &mut enabled_rx).await {
            set_state(&state, RemoteSessionState::Disabled);
            return;
        }
    }

    let session_id = Uuid::new_v4();
    info!(
        session = %session_id,
        provider = provider.provider_name(),
        delay_ms = config.inter_request_delay().as_millis() as u64,
        "원격 세션 시작"
    );
    set_state(&state, RemoteSessionState::Active);

    let mut received_any = false;
    let mut timeout_notified = false;
    let mut consecutive_failures = 0u32;

    loop {
        if !*enabled_rx.borrow() {
            break;
        }

        let Some(frame) = source.capture_frame() else {
            // 프레임 없음 — 다음 주기에 재시도
            if !sleep_unless_disabled(config.inter_request_delay(), &mut enabled_rx).await {
                break;
            }
            continue;
        };

        match build_request(&config, &frame) {
            Ok(request) => {
                set_state(&state, RemoteSessionState::AwaitingReply);

                // 단일 인플라이트 — 타임아웃/비활성화 외에는 응답까지 대기
                let outcome = tokio::select! {
                    result = tokio::time::timeout(config.reply_timeout(), provider.analyze(&request)) => Some(result),
                    _ = enabled_rx.changed() => None,
                };

                // 해체 후 스테일 발행 방지 — liveness 플래그 재확인
                let Some(result) = outcome else {
                    break;
                };
                if !*enabled_rx.borrow() {
                    break;
                }

                match result {
                    Ok(Ok(reply)) => {
                        received_any = true;
                        consecutive_failures = 0;
                        set_state(&state, RemoteSessionState::Active);
                        publish_reply(&bus, &config, reply);
                    }
                    Ok(Err(e)) => {
                        consecutive_failures += 1;
                        set_state(&state, RemoteSessionState::Active);
                        warn!("원격 요청 실패 ({consecutive_failures}회 연속): {e}");
                        bus.publish(PipelineEvent::Error(e.to_string()));
                    }
                    Err(_elapsed) => {
                        consecutive_failures += 1;
                        set_state(&state, RemoteSessionState::Active);
                        if !received_any {
                            // 한 번도 응답이 없었던 엔드포인트 — 1회성 무응답 공지
                            if !timeout_notified {
                                timeout_notified = true;
                                bus.publish(PipelineEvent::RemoteNotice(format!(
                                    "원격 엔드포인트 무응답 — {}ms 내 응답 없음",
                                    config.timeout_ms
                                )));
                            }
                        } else {
                            let e = CoreError::RemoteTimeout {
                                timeout_ms: config.timeout_ms,
                            };
                            bus.publish(PipelineEvent::Error(e.to_string()));
                        }
                    }
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!("원격 요청 구성 실패: {e}");
                bus.publish(PipelineEvent::Error(e.to_string()));
            }
        }

        // 연속 실패 한도 초과 → 수동 재개 전까지 정지
        if config.max_consecutive_failures > 0
            && consecutive_failures >= config.max_consecutive_failures
        {
            warn!(
                "연속 실패 {}회 — 원격 세션 정지 (resume 대기)",
                consecutive_failures
            );
            set_state(&state, RemoteSessionState::Errored);

            let resumed = tokio::select! {
                _ = resume.notified() => true,
                changed = enabled_rx.changed() => changed.is_ok(),
            };
            if !resumed || !*enabled_rx.borrow() {
                break;
            }

            info!("원격 세션 수동 재개");
            consecutive_failures = 0;
            set_state(&state, RemoteSessionState::Active);
            continue;
        }

        // 전송률 유도 지연 (delay = 1000/rate ms) 후 다음 캡처
        if !sleep_unless_disabled(config.inter_request_delay(), &mut enabled_rx).await {
            break;
        }
    }

    set_state(&state, RemoteSessionState::Disabled);
    info!("원격 세션 종료");
}
