//! 캡처 루프.
//!
//! 디스플레이 리프레시 대역의 고정 주기 틱마다: 프레임 샘플링 →
//! 모션 갱신 → 승인 제어 하의 워커 제출. 워커가 느리면 프레임은
//! 드롭된다 — 느린 모델 아래의 정상 정상상태다.

use framegate_core::models::detection::{SubmitOutcome, WorkerState};
use framegate_core::models::frame::Frame;
use framegate_core::models::validation::LatestScores;
use framegate_core::ports::frame_source::FrameSource;
use framegate_core::ports::inference::InferenceEngine;
use framegate_vision::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// 캡처 루프 컨텍스트
pub(crate) struct CaptureLoopCtx {
    pub source: Arc<dyn FrameSource>,
    pub engine: Arc<dyn InferenceEngine>,
    pub scores: Arc<LatestScores>,
    pub tick: Duration,
}

/// 워커 채널이 프레임을 받을 수 있는 국면인지.
///
/// `Busy`도 포함한다 — 캡처/모션은 계속 진행하고 제출만 드롭되는 것이
/// 승인 제어의 의도다. 로드 전/종단 상태에서는 틱 전체가 no-op.
fn channel_operating(state: WorkerState) -> bool {
    matches!(state, WorkerState::Ready | WorkerState::Busy)
}

/// 캡처 루프 실행 — 소유 설정이 해체될 때까지 재스케줄.
pub(crate) async fn run_capture_loop(ctx: CaptureLoopCtx, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(ctx.tick);
    let mut previous: Option<Frame> = None;

    info!("캡처 루프 시작: 틱 {}ms", ctx.tick.as_millis());

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // 소스/워커 준비 전에는 저비용 no-op 틱으로 폴링 유지
                if !ctx.source.is_ready() || !channel_operating(ctx.engine.state()) {
                    continue;
                }

                let Some(frame) = ctx.source.capture_frame() else {
                    continue;
                };

                // 모션 갱신 — 이전 프레임이 있고 해상도가 같을 때만 (호출자 가드)
                if let Some(prev) = &previous {
                    if let Some(motion) = metrics::motion_score(prev, &frame) {
                        ctx.scores.set_motion(motion);
                    }
                }
                previous = Some(frame.clone());

                // 승인 제어 — 거절(Dropped)은 에러가 아니다
                match ctx.engine.submit(frame).await {
                    SubmitOutcome::Submitted => {}
                    SubmitOutcome::Dropped => {
                        debug!("워커 바쁨 — 프레임 드롭");
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("캡처 루프 종료");
                break;
            }
        }
    }

    // 해체 시 잔여 프레임 상태 해제
    drop(previous);
}
