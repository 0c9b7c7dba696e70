//! 오케스트레이터.
//!
//! 설정에 따라 캡처 루프, 엔진 이벤트 펌프, 검증 리포터, 원격 세션을
//! 합성하고 라이프사이클을 소유한다. 모델 설정 변경은 반드시
//! `stop()` 1회 → `start()` 1회 — 이중 워커 상태는 존재하지 않는다.

use framegate_core::config::{AppConfig, DetectionConfig};
use framegate_core::error::CoreError;
use framegate_core::models::detection::{Detection, WorkerState};
use framegate_core::models::validation::{LatestScores, QualitySample};
use framegate_core::ports::frame_source::FrameSource;
use framegate_core::ports::inference::{EngineEvent, InferenceEngine};
use framegate_core::ports::remote::RemoteVisionProvider;
use framegate_vision::encoder::{self, WebPQuality};
use framegate_vision::metrics;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capture_loop::{run_capture_loop, CaptureLoopCtx};
use crate::events::{EventBus, PipelineEvent};
use crate::remote_session::RemoteSession;
use crate::validation::run_validation_reporter;

/// 임계값 + 클래스 필터 적용.
///
/// 필터가 비어 있으면 전체 허용 (fail-open 파싱 결과 포함).
pub(crate) fn filter_detections(
    detections: Vec<Detection>,
    score_threshold: f64,
    class_filter: &[u32],
) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.score >= score_threshold)
        .filter(|d| class_filter.is_empty() || class_filter.contains(&d.class_id))
        .collect()
}

/// 백그라운드 태스크 핸들 묶음
#[derive(Default)]
struct Tasks {
    capture: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

/// 파이프라인 오케스트레이터
pub struct Orchestrator {
    config: AppConfig,
    detection: Arc<RwLock<DetectionConfig>>,
    source: Arc<dyn FrameSource>,
    engine: Arc<dyn InferenceEngine>,
    engine_rx: Mutex<Option<UnboundedReceiver<EngineEvent>>>,
    bus: Arc<EventBus>,
    scores: Arc<LatestScores>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Tasks>,
    /// 검증 리포터 핸들 — 펌프(Ready 시 기동)와 해체 경로가 공유
    reporter: Arc<Mutex<Option<JoinHandle<()>>>>,
    remote_provider: Option<Arc<dyn RemoteVisionProvider>>,
    remote: Mutex<Option<RemoteSession>>,
}

impl Orchestrator {
    /// 새 오케스트레이터 생성. `engine_rx`는 엔진 생성 시 짝지어진
    /// 이벤트 수신자.
    pub fn new(
        config: AppConfig,
        source: Arc<dyn FrameSource>,
        engine: Arc<dyn InferenceEngine>,
        engine_rx: UnboundedReceiver<EngineEvent>,
        remote_provider: Option<Arc<dyn RemoteVisionProvider>>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            detection: Arc::new(RwLock::new(config.detection.clone())),
            config,
            source,
            engine,
            engine_rx: Mutex::new(Some(engine_rx)),
            bus: Arc::new(EventBus::default()),
            scores: Arc::new(LatestScores::new()),
            shutdown_tx,
            tasks: Mutex::new(Tasks::default()),
            reporter: Arc::new(Mutex::new(None)),
            remote_provider,
            remote: Mutex::new(None),
        }
    }

    /// 소비자 이벤트 구독
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.bus.subscribe()
    }

    /// 파이프라인 기동 — 설정된 채널만 합성한다.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.config.detection.enabled {
            let detection = self.detection.read().clone();
            self.engine.start(&detection).await?;

            let shutdown_rx = self.shutdown_tx.subscribe();
            let capture = tokio::spawn(run_capture_loop(
                CaptureLoopCtx {
                    source: self.source.clone(),
                    engine: self.engine.clone(),
                    scores: self.scores.clone(),
                    tick: self.config.capture.tick_interval(),
                },
                shutdown_rx,
            ));

            let engine_rx = self.engine_rx.lock().take().ok_or_else(|| {
                CoreError::Internal("엔진 이벤트 수신자 없음 — start() 중복 호출".to_string())
            })?;
            let pump = tokio::spawn(run_event_pump(PumpCtx {
                rx: engine_rx,
                engine: self.engine.clone(),
                bus: self.bus.clone(),
                scores: self.scores.clone(),
                detection: self.detection.clone(),
                reporter: self.reporter.clone(),
                shutdown_tx: self.shutdown_tx.clone(),
            }));

            let mut tasks = self.tasks.lock();
            tasks.capture = Some(capture);
            tasks.pump = Some(pump);
            info!("감지 파이프라인 기동");
        }

        if self.config.remote.enabled {
            match &self.remote_provider {
                Some(provider) => {
                    let session = RemoteSession::spawn(
                        self.config.remote.clone(),
                        self.source.clone(),
                        provider.clone(),
                        self.bus.clone(),
                    );
                    *self.remote.lock() = Some(session);
                    info!("원격 세션 기동");
                }
                None => {
                    warn!("원격 활성화됐으나 제공자 없음 — 원격 세션 생략");
                }
            }
        }

        Ok(())
    }

    /// 모델 설정 변경 — 정확히 `stop()` 1회 후 `start()` 1회.
    pub async fn reconfigure(&self, new: DetectionConfig) -> Result<(), CoreError> {
        info!(model = %new.model_identifier, "모델 재설정");

        // 감지 비활성 구간 — 리포터 중단, 새 Ready에서 재기동
        if let Some(reporter) = self.reporter.lock().take() {
            reporter.abort();
        }

        self.engine.stop().await;
        *self.detection.write() = new.clone();

        // 비활성 설정으로의 변경은 중단까지만 — 새 워커를 띄우지 않는다
        if !new.enabled {
            info!("감지 비활성 설정 — 워커 재기동 없음");
            return Ok(());
        }
        self.engine.start(&new).await
    }

    /// 요청형 스크린샷 — 현재 프레임 캡처 + 품질 샘플.
    ///
    /// 결과는 반환과 동시에 `Screenshot` 이벤트로도 발행된다.
    pub fn capture_still(&self) -> Result<(String, QualitySample), CoreError> {
        let frame = self
            .source
            .capture_frame()
            .ok_or_else(|| CoreError::FrameSource("프레임 소스 준비 안 됨".to_string()))?;

        let quality = metrics::quality_sample(&frame);
        let data_base64 = encoder::encode_webp_base64(&frame, WebPQuality::High)?;

        self.bus.publish(PipelineEvent::Screenshot {
            data_base64: data_base64.clone(),
            quality,
        });

        Ok((data_base64, quality))
    }

    /// 원격 세션 수동 재개 (`Errored` 정지 해제)
    pub fn resume_remote(&self) {
        if let Some(session) = self.remote.lock().as_ref() {
            session.resume();
        }
    }

    /// 전체 해체 — 루프 취소, 워커 종료(멱등), 원격 비활성화.
    pub async fn shutdown(&self) {
        info!("오케스트레이터 해체");

        let _ = self.shutdown_tx.send(true);

        let remote = self.remote.lock().take();
        if let Some(remote) = remote {
            remote.shutdown().await;
        }

        self.engine.stop().await;

        if let Some(reporter) = self.reporter.lock().take() {
            reporter.abort();
        }
        let (capture, pump) = {
            let mut tasks = self.tasks.lock();
            (tasks.capture.take(), tasks.pump.take())
        };
        if let Some(capture) = capture {
            let _ = capture.await;
        }
        if let Some(pump) = pump {
            let _ = pump.await;
        }
    }
}

/// 이벤트 펌프 컨텍스트
struct PumpCtx {
    rx: UnboundedReceiver<EngineEvent>,
    engine: Arc<dyn InferenceEngine>,
    bus: Arc<EventBus>,
    scores: Arc<LatestScores>,
    detection: Arc<RwLock<DetectionConfig>>,
    reporter: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown_tx: watch::Sender<bool>,
}

/// 엔진 이벤트 펌프 — 워커 응답을 점수 슬롯/소비자 이벤트로 변환.
///
/// `Ready` 1:1로 검증 리포터를 기동하고, 종단 실패 시 중단한다.
async fn run_event_pump(mut ctx: PumpCtx) {
    let mut shutdown = ctx.shutdown_tx.subscribe();

    loop {
        let event = tokio::select! {
            event = ctx.rx.recv() => event,
            _ = shutdown.changed() => break,
        };
        let Some(event) = event else { break };
        handle_engine_event(&ctx, event);
    }

    if let Some(reporter) = ctx.reporter.lock().take() {
        reporter.abort();
    }
}

fn handle_engine_event(ctx: &PumpCtx, event: EngineEvent) {
    match event {
        EngineEvent::Ready => {
            info!("감지 활성 — 검증 리포터 기동");
            ctx.scores.reset();

            let mut reporter = ctx.reporter.lock();
            if reporter.as_ref().map_or(true, |r| r.is_finished()) {
                let interval = ctx.detection.read().validation_interval();
                *reporter = Some(tokio::spawn(run_validation_reporter(
                    ctx.scores.clone(),
                    ctx.bus.clone(),
                    interval,
                    ctx.shutdown_tx.subscribe(),
                )));
            }
        }

        EngineEvent::Result(outcome) => {
            use framegate_core::models::detection::InferenceOutcome::*;
            match outcome {
                Detections(detections) => {
                    let (threshold, filter) = {
                        let detection = ctx.detection.read();
                        (detection.score_threshold, detection.parsed_class_filter())
                    };
                    let filtered = filter_detections(detections, threshold, &filter);

                    // 감지 모드의 분류 점수 = 필터 통과 최고 점수
                    if let Some(top) = filtered
                        .iter()
                        .map(|d| d.score)
                        .fold(None::<f64>, |acc, s| Some(acc.map_or(s, |a| a.max(s))))
                    {
                        ctx.scores.set_classification(top);
                    }
                    ctx.bus.publish(PipelineEvent::Detections(filtered));
                }
                Classification(scores) => {
                    // 단일 프롬프트 분류 — 첫 항목이 기본 프롬프트 점수
                    if let Some(first) = scores.first() {
                        ctx.scores.set_classification(first.score);
                    }
                    ctx.bus.publish(PipelineEvent::Classification(scores));
                }
            }
        }

        EngineEvent::Failed(error) => {
            ctx.bus.publish(PipelineEvent::Error(error.to_string()));

            // 종단 실패 → 감지 비활성, 리포터 중단. 일시 실패는 다음 틱 진행.
            let state = ctx.engine.state();
            if matches!(state, WorkerState::Errored | WorkerState::Terminated) {
                warn!("워커 종단 실패 ({state:?}) — 검증 리포터 중단: {error}");
                if let Some(reporter) = ctx.reporter.lock().take() {
                    reporter.abort();
                }
            } else {
                warn!("일시적 추론 실패 (프레임 유실): {error}");
            }
        }
    }
}
