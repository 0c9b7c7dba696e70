//! 워커 메시지 프로토콜.
//!
//! stdin/stdout 위의 JSON 라인. 요청/응답은 단일 인플라이트 불변식으로
//! 1:1 상관되므로 요청 ID 없이 순서만으로 매칭된다.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use framegate_core::error::CoreError;
use framegate_core::models::detection::{Detection, LabelScore};
use framegate_core::models::frame::Frame;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// 채널 → 워커 요청
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// 모델 로드 — 성공 시 `Ready`, 실패 시 `Error` 응답
    Load {
        /// 모델 식별자 (형식은 런타임이 해석)
        model_identifier: String,
        /// 제로샷 분류 프롬프트 (감지 모델이면 무시)
        primary_prompt: String,
        /// 대조 프롬프트
        #[serde(skip_serializing_if = "Option::is_none")]
        negative_prompt: Option<String>,
        /// 클래스 ID → 라벨 매핑
        #[serde(default)]
        label_map: HashMap<u32, String>,
    },
    /// 프레임 1장 추론
    Detect {
        width: u32,
        height: u32,
        /// Base64 인코딩된 RGBA 픽셀
        data: String,
    },
    /// 종료 신호 — 응답 없음
    Shutdown,
}

/// 워커 → 채널 응답
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    /// 모델 로드 완료
    Ready,
    /// 객체 감지 결과
    Detections { payload: Vec<Detection> },
    /// 제로샷 분류 결과
    Classification { payload: Vec<LabelScore> },
    /// 실패 — 로드 중이면 종단, 추론 중이면 일시적
    Error { message: String },
}

impl WorkerRequest {
    /// 프레임을 `Detect` 요청으로 인코딩
    pub fn detect(frame: &Frame) -> Self {
        Self::Detect {
            width: frame.width,
            height: frame.height,
            data: B64.encode(&frame.data),
        }
    }
}

/// `Detect` 요청의 픽셀 페이로드를 프레임으로 복원
pub fn frame_from_detect(width: u32, height: u32, data: &str) -> Result<Frame, CoreError> {
    let bytes = B64
        .decode(data)
        .map_err(|e| CoreError::ProtocolViolation(format!("프레임 Base64 디코딩 실패: {e}")))?;
    Frame::from_rgba(width, height, bytes).ok_or_else(|| {
        CoreError::ProtocolViolation(format!("프레임 버퍼 길이 불일치: {width}x{height}"))
    })
}

/// 메시지 1건을 JSON 라인으로 기록
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), CoreError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// 다음 메시지 읽기. 스트림 종료 시 `Ok(None)`.
///
/// 형식 오류 라인은 `ProtocolViolation` — 호출자가 로그 후 폐기한다.
pub async fn read_message<R, T>(reader: &mut BufReader<R>) -> Result<Option<T>, CoreError>
where
    R: tokio::io::AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        // 빈 라인은 건너뛰고 다음 메시지 시도
        return Box::pin(read_message(reader)).await;
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| CoreError::ProtocolViolation(format!("메시지 파싱 실패: {e} (raw: {trimmed})")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use framegate_core::models::frame::BoundingBox;

    #[test]
    fn request_wire_format() {
        let request = WorkerRequest::Load {
            model_identifier: "synthetic".to_string(),
            primary_prompt: "문서".to_string(),
            negative_prompt: None,
            label_map: HashMap::new(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""type":"load""#));
        // negative_prompt 없으면 직렬화 생략
        assert!(!json.contains("negative_prompt"));

        let deser: WorkerRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(deser, request);
    }

    #[test]
    fn reply_wire_format() {
        let reply = WorkerReply::Detections {
            payload: vec![Detection {
                label: "사람".to_string(),
                class_id: 1,
                score: 0.92,
                bbox: BoundingBox {
                    x: 10.0,
                    y: 20.0,
                    w: 100.0,
                    h: 200.0,
                },
            }],
        };
        let json = serde_json::to_string(&reply).unwrap();
        assert!(json.contains(r#""type":"detections""#));
        let deser: WorkerReply = serde_json::from_str(&json).unwrap();
        assert_eq!(deser, reply);
    }

    #[test]
    fn detect_roundtrip_preserves_pixels() {
        let frame = Frame::solid(8, 4, [1, 2, 3, 255]);
        let request = WorkerRequest::detect(&frame);

        let WorkerRequest::Detect { width, height, data } = &request else {
            panic!("detect 메시지가 아님");
        };
        let restored = frame_from_detect(*width, *height, data).unwrap();
        assert_eq!(restored.dimensions(), (8, 4));
        assert_eq!(&restored.data[..], &frame.data[..]);
    }

    #[test]
    fn malformed_frame_payload_rejected() {
        assert!(frame_from_detect(8, 4, "###잘못된 base64###").is_err());
        // 길이 불일치
        let short = B64.encode([0u8; 4]);
        assert!(frame_from_detect(8, 4, &short).is_err());
    }

    #[tokio::test]
    async fn framed_io_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, _server_write) = tokio::io::split(server);
        let (_client_read, mut client_write) = tokio::io::split(client);

        let request = WorkerRequest::Load {
            model_identifier: "synthetic".to_string(),
            primary_prompt: String::new(),
            negative_prompt: Some("배경".to_string()),
            label_map: HashMap::from([(1, "사람".to_string())]),
        };
        write_message(&mut client_write, &request).await.unwrap();
        drop(client_write);

        let mut reader = BufReader::new(server_read);
        let received: WorkerRequest = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(received, request);

        // 스트림 종료 → None
        let eof: Option<WorkerRequest> = read_message(&mut reader).await.unwrap();
        assert!(eof.is_none());
    }

    #[tokio::test]
    async fn malformed_line_is_protocol_violation() {
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, _sw) = tokio::io::split(server);
        let (_cr, mut client_write) = tokio::io::split(client);

        client_write.write_all(b"{not json}\n").await.unwrap();
        drop(client_write);

        let mut reader = BufReader::new(server_read);
        let result: Result<Option<WorkerReply>, _> = read_message(&mut reader).await;
        assert!(matches!(result, Err(CoreError::ProtocolViolation(_))));
    }
}
