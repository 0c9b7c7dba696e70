//! # framegate
//!
//! FRAMEGATE 바이너리 진입점 — 설정 로드, 포트 어댑터 조립,
//! 오케스트레이터 기동/해체.

use anyhow::{bail, Result};
use clap::Parser;
use framegate_app::{Orchestrator, PipelineEvent};
use framegate_core::config::{AppConfig, CaptureSourceKind};
use framegate_core::ports::frame_source::FrameSource;
use framegate_core::ports::remote::RemoteVisionProvider;
use framegate_infer::ProcessWorkerChannel;
use framegate_network::HttpRemoteVision;
use framegate_vision::source::SyntheticFrameSource;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// FRAMEGATE — 실시간 프레임 검증 파이프라인
///
/// 프레임 캡처 → 픽셀 품질 메트릭 + 프로세스 워커 추론 → 주기 검증
/// 리포트. 선택적으로 원격 멀티모달 관찰 채널을 함께 구동한다.
#[derive(Parser, Debug)]
#[command(name = "framegate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 설정 파일 경로 (기본: 플랫폼 설정 디렉터리의 config.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// 감지 파이프라인 강제 활성화
    #[arg(long)]
    detect: bool,

    /// 모델 식별자 오버라이드
    #[arg(long)]
    model: Option<String>,

    /// 원격 세션 강제 활성화 (엔드포인트 설정 필요)
    #[arg(long)]
    remote: bool,

    /// 지정 시간(초) 실행 후 종료 (기본: Ctrl-C까지)
    #[arg(long)]
    duration: Option<u64>,
}

/// 설정 + CLI 오버라이드 병합
fn resolve_config(args: &Args) -> Result<AppConfig> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    if args.detect {
        config.detection.enabled = true;
    }
    if let Some(model) = &args.model {
        config.detection.model_identifier = model.clone();
    }
    if args.remote {
        config.remote.enabled = true;
    }
    Ok(config)
}

/// 프레임 소스 어댑터 선택
fn build_source(config: &AppConfig) -> Result<Arc<dyn FrameSource>> {
    match config.capture.source {
        CaptureSourceKind::Synthetic => {
            info!("합성 프레임 소스 사용");
            Ok(Arc::new(SyntheticFrameSource::with_default_size()))
        }
        CaptureSourceKind::Screen => {
            #[cfg(feature = "screen")]
            {
                info!("스크린 프레임 소스 사용");
                Ok(Arc::new(framegate_vision::source::ScreenFrameSource::new()))
            }
            #[cfg(not(feature = "screen"))]
            {
                bail!("screen 소스는 'screen' feature 빌드가 필요합니다");
            }
        }
    }
}

/// 소비자 이벤트를 로그로 출력
async fn run_event_logger(mut rx: tokio::sync::broadcast::Receiver<PipelineEvent>) {
    loop {
        match rx.recv().await {
            Ok(PipelineEvent::ValidationTick(tick)) => {
                info!(
                    "검증 틱: 모션 {:.2}, 분류 {:.3}",
                    tick.motion_score, tick.classification_score
                );
            }
            Ok(PipelineEvent::Detections(detections)) => {
                for d in &detections {
                    info!("감지: {} ({:.2})", d.label, d.score);
                }
            }
            Ok(PipelineEvent::Classification(scores)) => {
                if let Some(first) = scores.first() {
                    info!("분류: {} ({:.3})", first.label, first.score);
                }
            }
            Ok(PipelineEvent::RemoteResponse(text)) => {
                info!("원격 관찰: {text}");
            }
            Ok(PipelineEvent::RemoteScore(score)) => {
                info!("원격 점수: {} ({:.3})", score.label, score.score);
            }
            Ok(PipelineEvent::RemoteNotice(notice)) => {
                warn!("원격 공지: {notice}");
            }
            Ok(PipelineEvent::Screenshot { quality, .. }) => {
                info!(
                    "스크린샷: 블러 {:.0}, 조명 {:.2}",
                    quality.blur_score, quality.lighting_score
                );
            }
            Ok(PipelineEvent::Error(message)) => {
                warn!("파이프라인 에러: {message}");
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("이벤트 {skipped}건 유실 (구독 지연)");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .init();

    let config = resolve_config(&args)?;

    if !config.detection.enabled && !config.remote.enabled {
        bail!("감지/원격 모두 비활성 — --detect 또는 --remote로 활성화하세요");
    }

    let source = build_source(&config)?;

    let (engine_tx, engine_rx) = mpsc::unbounded_channel();
    let engine = Arc::new(ProcessWorkerChannel::new(
        config.detection.worker_command.clone(),
        engine_tx,
    ));

    let remote_provider: Option<Arc<dyn RemoteVisionProvider>> = if config.remote.enabled {
        Some(Arc::new(HttpRemoteVision::new(&config.remote)?))
    } else {
        None
    };

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        source,
        engine,
        engine_rx,
        remote_provider,
    ));

    let logger = tokio::spawn(run_event_logger(orchestrator.subscribe()));

    orchestrator.start().await?;
    info!("framegate 기동 완료");

    match args.duration {
        Some(secs) => {
            tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
            info!("{secs}초 경과 — 종료");
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("종료 신호 수신");
        }
    }

    orchestrator.shutdown().await;
    logger.abort();

    Ok(())
}
