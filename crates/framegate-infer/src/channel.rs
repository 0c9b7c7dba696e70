//! 프로세스 워커 채널.
//!
//! 워커 프로세스 1개의 라이프사이클(스폰 → 로드 → 요청/응답 → 종료)과
//! 단일 인플라이트 불변식을 소유한다. 워커가 느리면 프레임은 큐잉되지 않고
//! 드롭된다 — 이것이 백프레셔의 전부다.

use framegate_core::config::DetectionConfig;
use framegate_core::error::CoreError;
use framegate_core::models::detection::{SubmitOutcome, WorkerState};
use framegate_core::models::frame::Frame;
use framegate_core::ports::inference::{EngineEvent, InferenceEngine};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::{self, WorkerReply, WorkerRequest};

/// 채널 공유 상태 — 상태 머신 + 이벤트 송신자
struct SharedState {
    state: Mutex<WorkerState>,
    event_tx: UnboundedSender<EngineEvent>,
}

impl SharedState {
    /// 유효 전이만 수행. 무효 전이는 로그 후 거부.
    fn transition(&self, to: WorkerState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition(to) {
            debug!("워커 상태 전이: {:?} → {:?}", *state, to);
            *state = to;
            true
        } else {
            warn!("무효 상태 전이 시도: {:?} → {:?}", *state, to);
            false
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    /// 제출 슬롯 획득 — `Ready → Busy` CAS. 실패 시 제출은 드롭.
    fn try_acquire_slot(&self) -> bool {
        let mut state = self.state.lock();
        if *state == WorkerState::Ready {
            *state = WorkerState::Busy;
            true
        } else {
            false
        }
    }
}

/// 워커 응답 1건 처리.
///
/// 현재 상태와 맞지 않는 응답은 프로토콜 위반 — 로그 후 폐기하며
/// 절대 채널을 중단시키지 않는다.
fn apply_reply(shared: &SharedState, reply: WorkerReply) {
    let current = *shared.state.lock();
    match reply {
        WorkerReply::Ready => {
            if current == WorkerState::Loading && shared.transition(WorkerState::Ready) {
                info!("워커 모델 로드 완료");
                shared.emit(EngineEvent::Ready);
            } else {
                warn!("프로토콜 위반: {current:?} 상태에서 ready 수신 — 폐기");
            }
        }
        WorkerReply::Detections { payload } => {
            if current == WorkerState::Busy && shared.transition(WorkerState::Ready) {
                shared.emit(EngineEvent::Result(
                    framegate_core::models::detection::InferenceOutcome::Detections(payload),
                ));
            } else {
                warn!("프로토콜 위반: {current:?} 상태에서 detections 수신 — 폐기");
            }
        }
        WorkerReply::Classification { payload } => {
            if current == WorkerState::Busy && shared.transition(WorkerState::Ready) {
                shared.emit(EngineEvent::Result(
                    framegate_core::models::detection::InferenceOutcome::Classification(payload),
                ));
            } else {
                warn!("프로토콜 위반: {current:?} 상태에서 classification 수신 — 폐기");
            }
        }
        WorkerReply::Error { message } => match current {
            // 로드 중 실패는 현재 워커 인스턴스에 종단적
            WorkerState::Loading => {
                shared.transition(WorkerState::Errored);
                shared.emit(EngineEvent::Failed(CoreError::LoadFailure(message)));
            }
            // 추론 실패는 일시적 — 프레임만 유실, 채널은 Ready 복귀
            WorkerState::Busy => {
                shared.transition(WorkerState::Ready);
                shared.emit(EngineEvent::Failed(CoreError::InferenceFailure(message)));
            }
            _ => {
                warn!("프로토콜 위반: {current:?} 상태에서 error 수신 — 폐기: {message}");
            }
        },
    }
}

/// 스폰된 프로세스 핸들 묶음
#[derive(Default)]
struct ProcHandles {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
}

/// 프로세스 워커 채널 — `InferenceEngine` 포트 구현
pub struct ProcessWorkerChannel {
    worker_command: PathBuf,
    shared: Arc<SharedState>,
    proc: tokio::sync::Mutex<ProcHandles>,
    /// 요청 시퀀스 마커 (로그 전용 — 매칭은 단일 인플라이트 순서로 충분)
    seq: AtomicU64,
}

impl ProcessWorkerChannel {
    /// 새 채널 생성. `worker_command`가 없으면 실행 파일 옆의
    /// `framegate-worker`를 사용한다.
    pub fn new(worker_command: Option<PathBuf>, event_tx: UnboundedSender<EngineEvent>) -> Self {
        Self {
            worker_command: worker_command.unwrap_or_else(Self::default_worker_command),
            shared: Arc::new(SharedState {
                state: Mutex::new(WorkerState::Uninitialized),
                event_tx,
            }),
            proc: tokio::sync::Mutex::new(ProcHandles::default()),
            seq: AtomicU64::new(0),
        }
    }

    /// 실행 파일 옆의 기본 워커 바이너리 경로
    fn default_worker_command() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join("framegate-worker")))
            .unwrap_or_else(|| PathBuf::from("framegate-worker"))
    }

    /// 스폰/전송 단계 실패 처리 — `Errored` 진입 + 업스트림 보고
    fn fail_startup(&self, reason: String) {
        self.shared.transition(WorkerState::Errored);
        self.shared
            .emit(EngineEvent::Failed(CoreError::SpawnFailure(reason)));
    }
}

#[async_trait::async_trait]
impl InferenceEngine for ProcessWorkerChannel {
    /// 새 워커 기동.
    ///
    /// 스폰/로드 실패는 반환값이 아니라 `Errored` 상태 + `Failed` 이벤트로
    /// 보고된다 (자동 재시도 없음). `Err`는 호출 규약 위반
    /// (실행 중 재시작 시도)에만 쓰인다.
    async fn start(&self, config: &DetectionConfig) -> Result<(), CoreError> {
        {
            let mut state = self.shared.state.lock();
            if matches!(
                *state,
                WorkerState::Loading | WorkerState::Ready | WorkerState::Busy
            ) {
                return Err(CoreError::Internal(
                    "워커 실행 중 — stop() 후 다시 start() 필요".to_string(),
                ));
            }
            // 새 워커 인스턴스 = 새 상태 머신
            *state = WorkerState::Uninitialized;
        }

        info!(
            command = %self.worker_command.display(),
            model = %config.model_identifier,
            "워커 스폰"
        );

        let mut child = match Command::new(&self.worker_command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.fail_startup(format!("워커 프로세스 스폰 실패: {e}"));
                return Ok(());
            }
        };

        let Some(stdout) = child.stdout.take() else {
            self.fail_startup("워커 stdout 파이프 없음".to_string());
            return Ok(());
        };
        let Some(mut stdin) = child.stdin.take() else {
            self.fail_startup("워커 stdin 파이프 없음".to_string());
            return Ok(());
        };

        self.shared.transition(WorkerState::Loading);

        let load = WorkerRequest::Load {
            model_identifier: config.model_identifier.clone(),
            primary_prompt: config.primary_prompt.clone(),
            negative_prompt: config.negative_prompt.clone(),
            label_map: config.parsed_label_map(),
        };
        if let Err(e) = protocol::write_message(&mut stdin, &load).await {
            self.fail_startup(format!("load 메시지 전송 실패: {e}"));
            let _ = child.start_kill();
            return Ok(());
        }

        // 응답 판독 루프 — 워커 수명 동안 상주
        let shared = self.shared.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout);
            loop {
                match protocol::read_message::<_, WorkerReply>(&mut lines).await {
                    Ok(Some(reply)) => apply_reply(&shared, reply),
                    Ok(None) => {
                        // EOF — 의도된 종료가 아니면 종단 실패
                        let state = *shared.state.lock();
                        if state != WorkerState::Terminated {
                            warn!("워커 프로세스가 예기치 않게 종료됨 (상태: {state:?})");
                            shared.transition(WorkerState::Errored);
                            let error = if state == WorkerState::Loading {
                                CoreError::LoadFailure("워커가 로드 완료 전에 종료됨".to_string())
                            } else {
                                CoreError::SpawnFailure("워커 프로세스 조기 종료".to_string())
                            };
                            shared.emit(EngineEvent::Failed(error));
                        }
                        break;
                    }
                    Err(CoreError::ProtocolViolation(message)) => {
                        // 형식 오류 메시지는 폐기하고 계속
                        warn!("프로토콜 위반 (폐기): {message}");
                    }
                    Err(e) => {
                        let state = *shared.state.lock();
                        if state != WorkerState::Terminated {
                            warn!("워커 stdout 읽기 실패: {e}");
                            shared.transition(WorkerState::Errored);
                            shared.emit(EngineEvent::Failed(CoreError::SpawnFailure(format!(
                                "워커 파이프 읽기 실패: {e}"
                            ))));
                        }
                        break;
                    }
                }
            }
        });

        let mut proc = self.proc.lock().await;
        proc.child = Some(child);
        proc.stdin = Some(stdin);
        proc.reader = Some(reader);

        Ok(())
    }

    /// 프레임 제출 — `Ready`가 아니면 큐잉 없이 드롭.
    async fn submit(&self, frame: Frame) -> SubmitOutcome {
        if !self.shared.try_acquire_slot() {
            return SubmitOutcome::Dropped;
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        debug!(seq, width = frame.width, height = frame.height, "프레임 제출");

        let request = WorkerRequest::detect(&frame);
        let mut proc = self.proc.lock().await;
        match proc.stdin.as_mut() {
            Some(stdin) => {
                if let Err(e) = protocol::write_message(stdin, &request).await {
                    // 파이프가 죽었으면 이 워커 인스턴스는 끝
                    self.shared.transition(WorkerState::Errored);
                    self.shared.emit(EngineEvent::Failed(CoreError::SpawnFailure(
                        format!("detect 메시지 전송 실패: {e}"),
                    )));
                }
            }
            None => {
                self.shared.transition(WorkerState::Errored);
                self.shared.emit(EngineEvent::Failed(CoreError::Internal(
                    "stdin 핸들 없음 — start() 전 제출".to_string(),
                )));
            }
        }

        SubmitOutcome::Submitted
    }

    /// 워커 무조건 종료. 멱등.
    async fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state == WorkerState::Terminated {
                return;
            }
            *state = WorkerState::Terminated;
        }

        info!("워커 채널 종료");

        let mut proc = self.proc.lock().await;

        // 종료 신호는 최선 노력 — 응답은 기다리지 않는다
        if let Some(stdin) = proc.stdin.as_mut() {
            let _ = protocol::write_message(stdin, &WorkerRequest::Shutdown).await;
        }
        proc.stdin = None;

        if let Some(reader) = proc.reader.take() {
            reader.abort();
        }
        if let Some(mut child) = proc.child.take() {
            let _ = child.start_kill();
        }
    }

    fn state(&self) -> WorkerState {
        *self.shared.state.lock()
    }
}
