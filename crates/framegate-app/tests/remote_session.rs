//! 원격 세션 통합 테스트.
//!
//! 목 제공자로 비중첩/타임아웃 공지/에러 복구/수동 재개 의미론 검증.

mod common;

use common::{MockRemoteProvider, RemoteBehavior};
use framegate_app::{PipelineEvent, RemoteSession, RemoteSessionState};
use framegate_app::events::EventBus;
use framegate_core::config::RemoteConfig;
use framegate_core::models::detection::LabelScore;
use framegate_core::ports::frame_source::FrameSource;
use framegate_vision::source::SyntheticFrameSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn fast_remote_config() -> RemoteConfig {
    RemoteConfig {
        enabled: true,
        endpoint: "http://localhost/unused".to_string(),
        prompt: "신분증이 보입니까".to_string(),
        // 10ms 간격 (rate 100/s) — 테스트 가속
        requests_per_second: 100.0,
        timeout_ms: 10_000,
        max_consecutive_failures: 3,
        max_edge: 64,
        ..Default::default()
    }
}

fn make_source() -> Arc<dyn FrameSource> {
    Arc::new(SyntheticFrameSource::new(32, 24))
}

async fn wait_for(
    rx: &mut broadcast::Receiver<PipelineEvent>,
    timeout: Duration,
    pred: impl Fn(&PipelineEvent) -> bool,
) -> Option<PipelineEvent> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) if pred(&event) => return Some(event),
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            _ => return None,
        }
    }
}

/// 응답 없는 엔드포인트 — 타임아웃/해체 전까지 두 번째 요청 없음
#[tokio::test]
async fn never_issues_overlapping_requests() {
    let provider = MockRemoteProvider::new(RemoteBehavior::NeverReply);
    let bus = Arc::new(EventBus::default());
    let session = RemoteSession::spawn(
        fast_remote_config(),
        make_source(),
        provider.clone(),
        bus,
    );

    // 요청 간격(10ms)보다 훨씬 오래 기다려도 호출은 1회
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(provider.call_count(), 1, "응답 대기 중 중첩 요청 금지");
    assert_eq!(session.state(), RemoteSessionState::AwaitingReply);

    session.shutdown().await;
    assert_eq!(session.state(), RemoteSessionState::Disabled);
}

/// 캡션 모드 — 관찰 텍스트 발행 + 순차 재스케줄
#[tokio::test]
async fn caption_mode_publishes_observations() {
    let provider = MockRemoteProvider::new(RemoteBehavior::Caption(
        "책상 위에 신분증이 있습니다".to_string(),
    ));
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let session = RemoteSession::spawn(
        fast_remote_config(),
        make_source(),
        provider.clone(),
        bus,
    );

    let event = wait_for(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, PipelineEvent::RemoteResponse(_))
    })
    .await
    .expect("원격 관찰이 발행되어야 함");

    let PipelineEvent::RemoteResponse(text) = event else {
        unreachable!();
    };
    assert_eq!(text, "책상 위에 신분증이 있습니다");

    // 순차 루프 — 지연을 두고 여러 번 호출됨
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(provider.call_count() >= 2);

    session.shutdown().await;
}

/// 대조 모드 — 기본 프롬프트 항목만 점수로 발행
#[tokio::test]
async fn contrastive_mode_selects_primary_entry() {
    let provider = MockRemoteProvider::new(RemoteBehavior::Scores(vec![
        LabelScore {
            label: "신분증이 보입니까".to_string(),
            score: 0.91,
        },
        LabelScore {
            label: "빈 책상".to_string(),
            score: 0.09,
        },
    ]));
    let mut config = fast_remote_config();
    config.negative_prompt = Some("빈 책상".to_string());

    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let session = RemoteSession::spawn(config, make_source(), provider, bus);

    let event = wait_for(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, PipelineEvent::RemoteScore(_))
    })
    .await
    .expect("원격 점수가 발행되어야 함");

    let PipelineEvent::RemoteScore(score) = event else {
        unreachable!();
    };
    assert_eq!(score.label, "신분증이 보입니까");
    assert!((score.score - 0.91).abs() < f64::EPSILON);

    session.shutdown().await;
}

/// 무응답 엔드포인트 — "무응답" 공지는 정확히 1회
#[tokio::test]
async fn timeout_notice_published_once() {
    let provider = MockRemoteProvider::new(RemoteBehavior::NeverReply);
    let mut config = fast_remote_config();
    config.timeout_ms = 30;
    // 정지 없이 계속 재시도하도록 한도 해제
    config.max_consecutive_failures = 0;

    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let session = RemoteSession::spawn(config, make_source(), provider.clone(), bus);

    // 여러 타임아웃 주기가 지나도록 대기
    tokio::time::sleep(Duration::from_millis(300)).await;
    session.shutdown().await;

    let mut notices = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, PipelineEvent::RemoteNotice(_)) {
            notices += 1;
        }
    }
    assert_eq!(notices, 1, "무응답 공지는 반복되지 않아야 함");
    assert!(provider.call_count() >= 2, "타임아웃 후에도 재시도는 계속");
}

/// 전송 실패 — 에러 발행 후 루프 계속, 한도 도달 시 정지 + 수동 재개
#[tokio::test]
async fn failures_park_session_until_resume() {
    let provider = MockRemoteProvider::new(RemoteBehavior::AlwaysFail);
    let mut config = fast_remote_config();
    config.max_consecutive_failures = 2;

    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let session = RemoteSession::spawn(config, make_source(), provider.clone(), bus);

    // 에러 2건 발행 후 정지
    for _ in 0..2 {
        let error = wait_for(&mut rx, Duration::from_secs(2), |e| {
            matches!(e, PipelineEvent::Error(_))
        })
        .await;
        assert!(error.is_some(), "실패는 소비자에게 발행되어야 함");
    }

    // 정지 확인 — 호출 수 고정
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while session.state() != RemoteSessionState::Errored {
        assert!(tokio::time::Instant::now() < deadline, "Errored 정지 상태가 되어야 함");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let parked_calls = provider.call_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(provider.call_count(), parked_calls, "정지 중 요청 없음");

    // 수동 재개 → 루프 재가동
    session.resume();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while provider.call_count() == parked_calls {
        assert!(tokio::time::Instant::now() < deadline, "재개 후 요청이 재개되어야 함");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    session.shutdown().await;
}

/// 일시 장애 후 복구 — 에러는 종단이 아니다
#[tokio::test]
async fn recovers_after_transient_failures() {
    let provider = MockRemoteProvider::new(RemoteBehavior::FailThenCaption(
        2,
        "복구된 관찰".to_string(),
    ));
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let session = RemoteSession::spawn(
        fast_remote_config(),
        make_source(),
        provider,
        bus,
    );

    // 실패 2회(한도 3 미만) 뒤 정상 관찰 수신
    let event = wait_for(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, PipelineEvent::RemoteResponse(_))
    })
    .await;
    assert!(event.is_some(), "일시 장애 후 복구되어야 함");

    session.shutdown().await;
}

/// 응답 대기 중 비활성화 — 스테일 발행 없이 종료
#[tokio::test]
async fn disable_during_await_ends_cleanly() {
    let provider = MockRemoteProvider::new(RemoteBehavior::NeverReply);
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let session = RemoteSession::spawn(
        fast_remote_config(),
        make_source(),
        provider.clone(),
        bus,
    );

    // 요청이 나간 뒤 비활성화
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while provider.call_count() == 0 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    session.disable();

    // 루프가 스스로 종료 (abort 없이)
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while session.state() != RemoteSessionState::Disabled {
        assert!(tokio::time::Instant::now() < deadline, "비활성화 후 종료되어야 함");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // 비활성화 후 발행 없음
    while rx.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "해체 후 스테일 콜백 없음");
}
