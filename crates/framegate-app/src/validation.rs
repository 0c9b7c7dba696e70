//! 검증 리포터.
//!
//! 감지 활성 동안만 도는 고정 주기 타이머. 틱마다 최신 점수 슬롯의
//! 스냅샷을 발행한다 — 큐도 평균도 아닌, 틱 시점의 가장 신선한 관측값.
//! 프레임 레이트와 완전히 분리된, 사람이 읽을 수 있는 주기다.

use framegate_core::models::validation::LatestScores;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::events::{EventBus, PipelineEvent};

/// 검증 리포터 실행 — 첫 발행은 한 주기 뒤 (setInterval 의미론).
pub(crate) async fn run_validation_reporter(
    scores: Arc<LatestScores>,
    bus: Arc<EventBus>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);

    info!("검증 리포터 시작: 주기 {}ms", interval.as_millis());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let tick = scores.snapshot();
                debug!(
                    motion = tick.motion_score,
                    classification = tick.classification_score,
                    "검증 틱"
                );
                bus.publish(PipelineEvent::ValidationTick(tick));
            }
            _ = shutdown.changed() => {
                info!("검증 리포터 종료");
                break;
            }
        }
    }
}
