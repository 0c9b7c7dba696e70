//! 원격 멀티모달 클라이언트.
//!
//! `RemoteVisionProvider` 포트 구현. 두 모드를 지원한다:
//! - 캡션 모드: OpenAI 호환 chat completions (`content`에 이미지 포함)
//!   → 자연어 관찰 텍스트
//! - 대조 모드(negative_prompt 설정 시): 제로샷 분류 엔드포인트
//!   (`candidate_labels` 배열) → 라벨별 점수
//!
//! 엔드포인트 URL은 선택한 모드에 맞는 것을 설정해야 한다.

use async_trait::async_trait;
use framegate_core::config::RemoteConfig;
use framegate_core::error::CoreError;
use framegate_core::models::detection::LabelScore;
use framegate_core::ports::remote::{RemoteAnalysisRequest, RemoteReply, RemoteVisionProvider};
use tracing::{debug, warn};

/// 응답 본문 로그 절단 길이
const BODY_SNIPPET_LEN: usize = 200;

/// HTTP 원격 멀티모달 클라이언트
#[derive(Debug)]
pub struct HttpRemoteVision {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
}

impl HttpRemoteVision {
    /// 새 클라이언트 생성
    pub fn new(config: &RemoteConfig) -> Result<Self, CoreError> {
        if config.endpoint.is_empty() {
            return Err(CoreError::Config("원격 엔드포인트 미설정".into()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.reply_timeout())
            .build()
            .map_err(|e| CoreError::Network(format!("HTTP 클라이언트 생성 실패: {e}")))?;

        debug!(
            endpoint = %config.endpoint,
            timeout_ms = config.timeout_ms,
            "HttpRemoteVision 초기화"
        );

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    /// 캡션 모드 요청 본문 (OpenAI 호환 chat completions)
    fn build_caption_body(
        model: Option<&str>,
        request: &RemoteAnalysisRequest,
    ) -> serde_json::Value {
        let data_url = format!(
            "data:{};base64,{}",
            request.media_type, request.image_base64
        );
        serde_json::json!({
            "model": model.unwrap_or("default"),
            "max_tokens": 256,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": request.prompt },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }]
        })
    }

    /// 대조 모드 요청 본문 (제로샷 분류)
    fn build_zero_shot_body(request: &RemoteAnalysisRequest) -> serde_json::Value {
        let mut labels = vec![request.prompt.clone()];
        if let Some(negative) = &request.negative_prompt {
            labels.push(negative.clone());
        }
        serde_json::json!({
            "image": request.image_base64,
            "candidate_labels": labels
        })
    }

    /// 캡션 응답 파싱 — `choices[0].message.content`
    fn parse_caption_response(body: &str) -> Result<String, CoreError> {
        let response: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| CoreError::RemoteSendFailure(format!("응답 JSON 파싱 실패: {e}")))?;

        response
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|msg| msg.get("content"))
            .and_then(|t| t.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| {
                CoreError::RemoteSendFailure("응답에서 텍스트를 찾을 수 없음".to_string())
            })
    }

    /// 제로샷 응답 파싱 — `[{label, score}, …]` 배열
    fn parse_zero_shot_response(body: &str) -> Result<Vec<LabelScore>, CoreError> {
        let response: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| CoreError::RemoteSendFailure(format!("응답 JSON 파싱 실패: {e}")))?;

        // 최상위 배열 또는 {"scores": […]} 래핑 둘 다 수용
        let entries = response
            .as_array()
            .or_else(|| response.get("scores").and_then(|s| s.as_array()))
            .ok_or_else(|| {
                CoreError::RemoteSendFailure("응답이 점수 배열이 아님".to_string())
            })?;

        entries
            .iter()
            .map(|entry| {
                let label = entry
                    .get("label")
                    .and_then(|l| l.as_str())
                    .ok_or_else(|| {
                        CoreError::RemoteSendFailure("점수 항목에 label 없음".to_string())
                    })?;
                let score = entry
                    .get("score")
                    .and_then(|s| s.as_f64())
                    .ok_or_else(|| {
                        CoreError::RemoteSendFailure("점수 항목에 score 없음".to_string())
                    })?;
                Ok(LabelScore {
                    label: label.to_string(),
                    score,
                })
            })
            .collect()
    }
}

#[async_trait]
impl RemoteVisionProvider for HttpRemoteVision {
    async fn analyze(&self, request: &RemoteAnalysisRequest) -> Result<RemoteReply, CoreError> {
        let contrastive = request.negative_prompt.is_some();
        let body = if contrastive {
            Self::build_zero_shot_body(request)
        } else {
            Self::build_caption_body(self.model.as_deref(), request)
        };

        debug!(
            endpoint = %self.endpoint,
            contrastive,
            image_bytes = request.image_base64.len(),
            "원격 분석 요청"
        );

        let mut builder = self
            .http_client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CoreError::RemoteSendFailure(format!("요청 전송 실패: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CoreError::RemoteSendFailure(format!("응답 읽기 실패: {e}")))?;

        if !status.is_success() {
            warn!(status = %status, "원격 API 오류 응답");
            return Err(CoreError::RemoteSendFailure(format!(
                "원격 API 오류 ({status}): {}",
                text.chars().take(BODY_SNIPPET_LEN).collect::<String>()
            )));
        }

        if contrastive {
            let scores = Self::parse_zero_shot_response(&text)?;
            Ok(RemoteReply { text: None, scores })
        } else {
            let caption = Self::parse_caption_response(&text)?;
            Ok(RemoteReply {
                text: Some(caption),
                scores: Vec::new(),
            })
        }
    }

    fn provider_name(&self) -> &str {
        self.model.as_deref().unwrap_or("remote-vision")
    }
}

// ============================================================
// 테스트
// ============================================================
