//! 워커 측 모델 런타임.
//!
//! 프로토콜 서빙 루프 + `ModelRuntime` seam. 실제 모델 포맷은 이 경계
//! 뒤에서 불투명하다 — 이미지를 받아 감지 목록 또는 분류 점수를 돌려주면
//! 된다. 내장 `synthetic` 런타임은 결정적 밝기 기반 모델로, 파이프라인
//! 전체를 모델 없이 구동/검증하는 용도다.

use framegate_core::error::CoreError;
use framegate_core::models::detection::{Detection, InferenceOutcome, LabelScore};
use framegate_core::models::frame::{BoundingBox, Frame};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, info, warn};

use crate::protocol::{self, WorkerRequest, WorkerReply};

/// 로드 파라미터 — `load` 메시지 필드 묶음
#[derive(Debug, Clone)]
pub struct LoadParams {
    pub model_identifier: String,
    pub primary_prompt: String,
    pub negative_prompt: Option<String>,
    pub label_map: HashMap<u32, String>,
}

/// 모델 런타임 — 이미지 → 감지/분류
pub trait ModelRuntime: Send + std::fmt::Debug {
    /// 모델 로드. 실패는 로드 단계 종단 에러로 보고된다.
    fn load(&mut self, params: &LoadParams) -> Result<(), CoreError>;

    /// 프레임 1장 추론
    fn infer(&self, frame: &Frame) -> Result<InferenceOutcome, CoreError>;
}

/// 모델 식별자로 런타임 생성.
///
/// `synthetic`(및 `synthetic-*` 변형)만 내장. 그 외 식별자는
/// 로드 실패 — 실제 모델 런타임은 이 레지스트리에 등록해 확장한다.
pub fn create_runtime(model_identifier: &str) -> Result<Box<dyn ModelRuntime>, CoreError> {
    if model_identifier == "synthetic" || model_identifier.starts_with("synthetic-") {
        Ok(Box::new(SyntheticRuntime::default()))
    } else {
        Err(CoreError::LoadFailure(format!(
            "미지원 모델 식별자: {model_identifier}"
        )))
    }
}

// ============================================================
// 합성 런타임
// ============================================================

/// 밝기 샘플링 간격 (행/열)
const SAMPLE_STRIDE: u32 = 4;

/// 합성 런타임 — 밝기 기반 결정적 모델
///
/// 프롬프트가 있으면 제로샷 분류 모드(평균 휘도 = 기본 프롬프트 점수),
/// 없으면 감지 모드(최대 휘도 지점 주변 박스 1개).
#[derive(Debug, Default)]
pub struct SyntheticRuntime {
    params: Option<LoadParams>,
}

impl SyntheticRuntime {
    /// 평균/최대 휘도와 최대 지점 좌표 계산
    fn luma_stats(frame: &Frame) -> (f64, f64, u32, u32) {
        let data = &frame.data;
        let mut sum = 0.0f64;
        let mut count = 0u64;
        let mut max = 0.0f64;
        let (mut max_x, mut max_y) = (0u32, 0u32);

        let mut y = 0;
        while y < frame.height {
            let mut x = 0;
            while x < frame.width {
                let idx = frame.pixel_offset(x, y);
                let luma = (0.299 * data[idx] as f64
                    + 0.587 * data[idx + 1] as f64
                    + 0.114 * data[idx + 2] as f64)
                    / 255.0;
                sum += luma;
                count += 1;
                if luma > max {
                    max = luma;
                    max_x = x;
                    max_y = y;
                }
                x += SAMPLE_STRIDE;
            }
            y += SAMPLE_STRIDE;
        }

        let mean = if count > 0 { sum / count as f64 } else { 0.0 };
        (mean, max, max_x, max_y)
    }
}

impl ModelRuntime for SyntheticRuntime {
    fn load(&mut self, params: &LoadParams) -> Result<(), CoreError> {
        debug!(model = %params.model_identifier, "합성 런타임 로드");
        self.params = Some(params.clone());
        Ok(())
    }

    fn infer(&self, frame: &Frame) -> Result<InferenceOutcome, CoreError> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| CoreError::InferenceFailure("모델 미로드".to_string()))?;

        if frame.is_degenerate() {
            return Err(CoreError::InferenceFailure("퇴화 프레임".to_string()));
        }

        let (mean_luma, max_luma, max_x, max_y) = Self::luma_stats(frame);

        if !params.primary_prompt.is_empty() {
            // 분류 모드 — 평균 휘도를 기본 프롬프트 신뢰도로
            let mut payload = vec![LabelScore {
                label: params.primary_prompt.clone(),
                score: mean_luma,
            }];
            if let Some(negative) = &params.negative_prompt {
                payload.push(LabelScore {
                    label: negative.clone(),
                    score: 1.0 - mean_luma,
                });
            }
            return Ok(InferenceOutcome::Classification(payload));
        }

        // 감지 모드 — 최대 휘도 지점 주변 박스 1개 (프레임 픽셀 좌표)
        let class_id = 1u32;
        let label = params
            .label_map
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| format!("class {class_id}"));

        let box_w = (frame.width as f64 / 8.0).max(1.0);
        let box_h = (frame.height as f64 / 8.0).max(1.0);
        let bbox = BoundingBox {
            x: (max_x as f64 - box_w / 2.0).max(0.0),
            y: (max_y as f64 - box_h / 2.0).max(0.0),
            w: box_w,
            h: box_h,
        };

        Ok(InferenceOutcome::Detections(vec![Detection {
            label,
            class_id,
            score: max_luma,
            bbox,
        }]))
    }
}

// ============================================================
// 서빙 루프
// ============================================================

/// 워커 서빙 루프 — 요청 스트림 소진 또는 shutdown까지.
///
/// 형식 오류 요청은 `error` 응답 후 계속 진행한다 (루프는 죽지 않음).
pub async fn serve<R, W>(reader: R, mut writer: W) -> Result<(), CoreError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut runtime: Option<Box<dyn ModelRuntime>> = None;

    loop {
        let request = match protocol::read_message::<_, WorkerRequest>(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                info!("입력 스트림 종료 — 워커 종료");
                break;
            }
            Err(CoreError::ProtocolViolation(message)) => {
                warn!("형식 오류 요청: {message}");
                protocol::write_message(&mut writer, &WorkerReply::Error { message }).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        match request {
            WorkerRequest::Load {
                model_identifier,
                primary_prompt,
                negative_prompt,
                label_map,
            } => {
                if runtime.is_some() {
                    // 채널은 재로드를 보내지 않는다 — 중복 로드는 무해하게 수락
                    debug!("모델 이미 로드됨");
                    protocol::write_message(&mut writer, &WorkerReply::Ready).await?;
                    continue;
                }

                let params = LoadParams {
                    model_identifier: model_identifier.clone(),
                    primary_prompt,
                    negative_prompt,
                    label_map,
                };

                let reply = match create_runtime(&model_identifier) {
                    Ok(mut rt) => match rt.load(&params) {
                        Ok(()) => {
                            runtime = Some(rt);
                            info!(model = %model_identifier, "모델 로드 완료");
                            WorkerReply::Ready
                        }
                        Err(e) => WorkerReply::Error {
                            message: e.to_string(),
                        },
                    },
                    Err(e) => WorkerReply::Error {
                        message: e.to_string(),
                    },
                };
                protocol::write_message(&mut writer, &reply).await?;
            }

            WorkerRequest::Detect { width, height, data } => {
                let reply = match &runtime {
                    Some(rt) => match protocol::frame_from_detect(width, height, &data) {
                        Ok(frame) => match rt.infer(&frame) {
                            Ok(InferenceOutcome::Detections(payload)) => {
                                WorkerReply::Detections { payload }
                            }
                            Ok(InferenceOutcome::Classification(payload)) => {
                                WorkerReply::Classification { payload }
                            }
                            Err(e) => WorkerReply::Error {
                                message: e.to_string(),
                            },
                        },
                        Err(e) => WorkerReply::Error {
                            message: e.to_string(),
                        },
                    },
                    None => WorkerReply::Error {
                        message: "모델 미로드 상태에서 detect 수신".to_string(),
                    },
                };
                protocol::write_message(&mut writer, &reply).await?;
            }

            WorkerRequest::Shutdown => {
                info!("종료 신호 수신");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn loaded_runtime(prompt: &str, negative: Option<&str>) -> SyntheticRuntime {
        let mut rt = SyntheticRuntime::default();
        rt.load(&LoadParams {
            model_identifier: "synthetic".to_string(),
            primary_prompt: prompt.to_string(),
            negative_prompt: negative.map(String::from),
            label_map: HashMap::new(),
        })
        .unwrap();
        rt
    }

    #[test]
    fn registry_rejects_unknown_model() {
        assert!(create_runtime("synthetic").is_ok());
        assert!(create_runtime("synthetic-v2").is_ok());
        let err = create_runtime("ssd-mobilenet-v2").unwrap_err();
        assert!(err.is_terminal_for_worker());
    }

    #[test]
    fn classification_tracks_brightness() {
        let rt = loaded_runtime("밝은 장면", Some("어두운 장면"));

        let bright = Frame::solid(32, 32, [255, 255, 255, 255]);
        let dark = Frame::solid(32, 32, [0, 0, 0, 255]);

        let InferenceOutcome::Classification(bright_scores) = rt.infer(&bright).unwrap() else {
            panic!("분류 결과가 아님");
        };
        let InferenceOutcome::Classification(dark_scores) = rt.infer(&dark).unwrap() else {
            panic!("분류 결과가 아님");
        };

        // 기본 프롬프트 점수는 밝을수록 높고, 대조 항목은 반대
        assert!(bright_scores[0].score > dark_scores[0].score);
        assert_eq!(bright_scores[0].label, "밝은 장면");
        assert_eq!(bright_scores[1].label, "어두운 장면");
        assert!((bright_scores[0].score + bright_scores[1].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn detection_mode_when_no_prompt() {
        let mut rt = SyntheticRuntime::default();
        rt.load(&LoadParams {
            model_identifier: "synthetic".to_string(),
            primary_prompt: String::new(),
            negative_prompt: None,
            label_map: HashMap::from([(1, "피사체".to_string())]),
        })
        .unwrap();

        let frame = Frame::solid(64, 64, [200, 200, 200, 255]);
        let InferenceOutcome::Detections(detections) = rt.infer(&frame).unwrap() else {
            panic!("감지 결과가 아님");
        };
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "피사체");
        assert!(detections[0].bbox.w > 0.0);
    }

    #[test]
    fn detection_label_fallback() {
        let mut rt = SyntheticRuntime::default();
        rt.load(&LoadParams {
            model_identifier: "synthetic".to_string(),
            primary_prompt: String::new(),
            negative_prompt: None,
            label_map: HashMap::new(),
        })
        .unwrap();

        let frame = Frame::solid(16, 16, [50, 50, 50, 255]);
        let InferenceOutcome::Detections(detections) = rt.infer(&frame).unwrap() else {
            panic!("감지 결과가 아님");
        };
        // 라벨 맵에 없으면 "class {id}" 폴백 (원 워커 동작)
        assert_eq!(detections[0].label, "class 1");
    }

    #[test]
    fn infer_deterministic() {
        let rt = loaded_runtime("문서", None);
        let frame = Frame::solid(32, 32, [120, 80, 40, 255]);
        assert_eq!(rt.infer(&frame).unwrap(), rt.infer(&frame).unwrap());
    }

    #[test]
    fn infer_before_load_fails() {
        let rt = SyntheticRuntime::default();
        let frame = Frame::solid(8, 8, [0, 0, 0, 255]);
        assert!(rt.infer(&frame).is_err());
    }

    // ============================================================
    // 서빙 루프 테스트 (인메모리 duplex)
    // ============================================================

    async fn spawn_serve() -> (
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
        BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
        tokio::task::JoinHandle<Result<(), CoreError>>,
    ) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, client_write) = tokio::io::split(client);

        let handle = tokio::spawn(serve(server_read, server_write));
        (client_write, BufReader::new(client_read), handle)
    }

    #[tokio::test]
    async fn serve_load_then_detect() {
        let (mut tx, mut rx, handle) = spawn_serve().await;

        protocol::write_message(
            &mut tx,
            &WorkerRequest::Load {
                model_identifier: "synthetic".to_string(),
                primary_prompt: "문서".to_string(),
                negative_prompt: None,
                label_map: HashMap::new(),
            },
        )
        .await
        .unwrap();

        let reply: WorkerReply = protocol::read_message(&mut rx).await.unwrap().unwrap();
        assert_eq!(reply, WorkerReply::Ready);

        let frame = Frame::solid(16, 16, [255, 255, 255, 255]);
        protocol::write_message(&mut tx, &WorkerRequest::detect(&frame))
            .await
            .unwrap();

        let reply: WorkerReply = protocol::read_message(&mut rx).await.unwrap().unwrap();
        let WorkerReply::Classification { payload } = reply else {
            panic!("분류 응답이 아님");
        };
        assert!((payload[0].score - 1.0).abs() < 1e-9);

        protocol::write_message(&mut tx, &WorkerRequest::Shutdown)
            .await
            .unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn serve_unknown_model_replies_error() {
        let (mut tx, mut rx, _handle) = spawn_serve().await;

        protocol::write_message(
            &mut tx,
            &WorkerRequest::Load {
                model_identifier: "yolov8n".to_string(),
                primary_prompt: String::new(),
                negative_prompt: None,
                label_map: HashMap::new(),
            },
        )
        .await
        .unwrap();

        let reply: WorkerReply = protocol::read_message(&mut rx).await.unwrap().unwrap();
        assert!(matches!(reply, WorkerReply::Error { .. }));
    }

    #[tokio::test]
    async fn serve_detect_before_load_replies_error() {
        let (mut tx, mut rx, _handle) = spawn_serve().await;

        let frame = Frame::solid(8, 8, [0, 0, 0, 255]);
        protocol::write_message(&mut tx, &WorkerRequest::detect(&frame))
            .await
            .unwrap();

        let reply: WorkerReply = protocol::read_message(&mut rx).await.unwrap().unwrap();
        assert!(matches!(reply, WorkerReply::Error { .. }));
    }

    #[tokio::test]
    async fn serve_survives_malformed_line() {
        let (mut tx, mut rx, handle) = spawn_serve().await;

        tx.write_all(b"garbage line\n").await.unwrap();
        let reply: WorkerReply = protocol::read_message(&mut rx).await.unwrap().unwrap();
        assert!(matches!(reply, WorkerReply::Error { .. }));

        // 루프가 살아있어 정상 요청 처리 가능
        protocol::write_message(
            &mut tx,
            &WorkerRequest::Load {
                model_identifier: "synthetic".to_string(),
                primary_prompt: String::new(),
                negative_prompt: None,
                label_map: HashMap::new(),
            },
        )
        .await
        .unwrap();
        let reply: WorkerReply = protocol::read_message(&mut rx).await.unwrap().unwrap();
        assert_eq!(reply, WorkerReply::Ready);

        protocol::write_message(&mut tx, &WorkerRequest::Shutdown)
            .await
            .unwrap();
        handle.await.unwrap().unwrap();
    }
}
