//! 원격 멀티모달 제공자 포트.
//!
//! 구현: `framegate-network` crate (reqwest 기반 HTTP 클라이언트)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::detection::LabelScore;

/// 원격 분석 요청 — 인코딩된 프레임 1장 + 고정 프롬프트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAnalysisRequest {
    /// Base64 인코딩된 이미지
    pub image_base64: String,
    /// 이미지 MIME 타입 (예: "image/webp")
    pub media_type: String,
    /// 기본 프롬프트
    pub prompt: String,
    /// 대조 프롬프트 — 설정 시 판별 점수 모드로 동작
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
}

/// 원격 분석 응답
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteReply {
    /// 자연어 관찰 텍스트 (캡션 모드)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// 라벨별 점수 (대조 모드)
    #[serde(default)]
    pub scores: Vec<LabelScore>,
}

impl RemoteReply {
    /// 기본 프롬프트에 해당하는 점수 항목 선택.
    /// 없으면 `None` — 빈 결과로 취급한다.
    pub fn score_for(&self, prompt: &str) -> Option<&LabelScore> {
        self.scores.iter().find(|s| s.label == prompt)
    }
}

/// 원격 멀티모달 제공자 — 프레임 1장 + 프롬프트 → 관찰/점수
#[async_trait]
pub trait RemoteVisionProvider: Send + Sync {
    /// 단일 분석 요청. 호출자는 절대 요청을 겹치지 않는다.
    async fn analyze(&self, request: &RemoteAnalysisRequest) -> Result<RemoteReply, CoreError>;

    /// 제공자 이름 (로그용)
    fn provider_name(&self) -> &str;
}
