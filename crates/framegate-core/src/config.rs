//! 애플리케이션 설정 구조체.
//!
//! 감지(모델/임계값/검증 주기), 캡처(틱 레이트/소스), 원격 세션(엔드포인트/
//! 전송률/타임아웃) 설정을 정의한다. `config` crate를 통해 파일/환경변수에서 로드.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::CoreError;

/// 최상위 애플리케이션 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 객체 감지/분류 파이프라인 설정
    #[serde(default)]
    pub detection: DetectionConfig,
    /// 프레임 캡처 설정
    #[serde(default)]
    pub capture: CaptureConfig,
    /// 원격 멀티모달 세션 설정
    #[serde(default)]
    pub remote: RemoteConfig,
}

// ============================================================
// 감지 설정
// ============================================================

/// 감지 설정 — 워커 모델 구성 + 검증 리포트 주기
///
/// `class_filter`/`label_map`은 소비자가 넘기는 문자열 그대로 보관하고
/// 파싱 실패 시 "전체 허용"/"빈 맵"으로 조용히 폴백한다 (fail-open).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// 감지 파이프라인 활성화 여부
    #[serde(default)]
    pub enabled: bool,
    /// 모델 식별자 (워커에 그대로 전달, 형식은 워커가 해석)
    #[serde(default = "default_model_identifier")]
    pub model_identifier: String,
    /// 제로샷 분류용 기본 프롬프트 (감지 모델이면 무시)
    #[serde(default)]
    pub primary_prompt: String,
    /// 대조 프롬프트 (선택 — 분류 점수 포화 방지)
    #[serde(default)]
    pub negative_prompt: Option<String>,
    /// 점수 임계값 (이 미만의 감지는 발행하지 않음)
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    /// 허용 클래스 ID 목록 (쉼표 구분 문자열, 빈 문자열 = 전체 허용)
    #[serde(default)]
    pub class_filter: String,
    /// 클래스 ID → 라벨 매핑 (JSON 객체 문자열)
    #[serde(default = "default_label_map")]
    pub label_map: String,
    /// 검증 리포트 주기 (밀리초)
    #[serde(default = "default_validation_interval_ms")]
    pub validation_interval_ms: u64,
    /// 워커 바이너리 경로 (없으면 실행 파일 옆의 framegate-worker)
    #[serde(default)]
    pub worker_command: Option<PathBuf>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model_identifier: default_model_identifier(),
            primary_prompt: String::new(),
            negative_prompt: None,
            score_threshold: default_score_threshold(),
            class_filter: String::new(),
            label_map: default_label_map(),
            validation_interval_ms: default_validation_interval_ms(),
            worker_command: None,
        }
    }
}

impl DetectionConfig {
    /// 검증 리포트 주기
    pub fn validation_interval(&self) -> Duration {
        Duration::from_millis(self.validation_interval_ms)
    }

    /// 허용 클래스 ID 파싱.
    ///
    /// 빈 문자열 → 빈 벡터 (전체 허용). 항목 파싱 실패 시에도 전체 허용으로
    /// 폴백한다 — 원 구현의 fail-open 동작 유지, 로그로만 노출.
    pub fn parsed_class_filter(&self) -> Vec<u32> {
        let trimmed = self.class_filter.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let mut ids = Vec::new();
        for part in trimmed.split(',') {
            match part.trim().parse::<u32>() {
                Ok(id) => ids.push(id),
                Err(e) => {
                    warn!("클래스 필터 파싱 실패 (전체 허용으로 폴백): {part:?} — {e}");
                    return Vec::new();
                }
            }
        }
        ids
    }

    /// 라벨 맵 파싱. 실패 시 빈 맵으로 폴백 (fail-open).
    pub fn parsed_label_map(&self) -> HashMap<u32, String> {
        match serde_json::from_str::<HashMap<String, String>>(&self.label_map) {
            Ok(raw) => raw
                .into_iter()
                .filter_map(|(k, v)| match k.parse::<u32>() {
                    Ok(id) => Some((id, v)),
                    Err(_) => {
                        warn!("라벨 맵 키 무시 (숫자 아님): {k:?}");
                        None
                    }
                })
                .collect(),
            Err(e) => {
                warn!("라벨 맵 파싱 실패 (빈 맵으로 폴백): {e}");
                HashMap::new()
            }
        }
    }
}

// ============================================================
// 캡처 설정
// ============================================================

/// 프레임 소스 종류
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSourceKind {
    /// 주 모니터 스크린 캡처 (xcap)
    Screen,
    /// 합성 패턴 생성기 (헤드리스 실행/테스트)
    #[default]
    Synthetic,
}

/// 캡처 설정 — 디스플레이 리프레시 대역 클록
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// 캡처 루프 틱 레이트 (Hz)
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// 프레임 소스 종류
    #[serde(default)]
    pub source: CaptureSourceKind,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            source: CaptureSourceKind::default(),
        }
    }
}

impl CaptureConfig {
    /// 틱 간격 (tick_hz=0이면 기본값으로 보정)
    pub fn tick_interval(&self) -> Duration {
        let hz = if self.tick_hz == 0 {
            default_tick_hz()
        } else {
            self.tick_hz
        };
        Duration::from_micros(1_000_000 / hz as u64)
    }
}

// ============================================================
// 원격 세션 설정
// ============================================================

/// 원격 멀티모달 세션 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// 원격 파이프라인 활성화 여부
    #[serde(default)]
    pub enabled: bool,
    /// API 엔드포인트 URL
    #[serde(default)]
    pub endpoint: String,
    /// API 키 (선택 — 메모리에만 유지)
    #[serde(default)]
    pub api_key: Option<String>,
    /// 원격 모델 이름 (선택)
    #[serde(default)]
    pub model: Option<String>,
    /// 프레임에 함께 보낼 고정 프롬프트
    #[serde(default = "default_remote_prompt")]
    pub prompt: String,
    /// 대조 프롬프트 (설정 시 판별 점수 모드)
    #[serde(default)]
    pub negative_prompt: Option<String>,
    /// 초당 요청 수 (요청 간 지연 = 1000/rate ms)
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    /// 응답 대기 한도 (밀리초)
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
    /// 연속 실패 허용 횟수 (초과 시 수동 재개 전까지 정지)
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// 전송 전 다운스케일 최대 변 길이 (픽셀)
    #[serde(default = "default_max_edge")]
    pub max_edge: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            api_key: None,
            model: None,
            prompt: default_remote_prompt(),
            negative_prompt: None,
            requests_per_second: default_requests_per_second(),
            timeout_ms: default_remote_timeout_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            max_edge: default_max_edge(),
        }
    }
}

impl RemoteConfig {
    /// 요청 간 지연. rate가 0 이하이면 기본 rate로 보정.
    pub fn inter_request_delay(&self) -> Duration {
        let rate = if self.requests_per_second > 0.0 {
            self.requests_per_second
        } else {
            default_requests_per_second()
        };
        Duration::from_millis((1000.0 / rate) as u64)
    }

    /// 응답 대기 한도
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============================================================
// 기본값 헬퍼
// ============================================================

fn default_model_identifier() -> String {
    "synthetic".to_string()
}

fn default_score_threshold() -> f64 {
    0.5
}

fn default_label_map() -> String {
    "{}".to_string()
}

fn default_validation_interval_ms() -> u64 {
    1500
}

fn default_tick_hz() -> u32 {
    30
}

fn default_remote_prompt() -> String {
    "이 장면에서 보이는 것을 한 문장으로 설명하세요.".to_string()
}

fn default_requests_per_second() -> f64 {
    0.5
}

fn default_remote_timeout_ms() -> u64 {
    15000
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_max_edge() -> u32 {
    512
}

// ============================================================
// 로더
// ============================================================

impl AppConfig {
    /// 설정 로드 — 파일(선택) 위에 `FRAMEGATE_` 환경변수 오버레이.
    ///
    /// 파일이 주어지지 않으면 플랫폼 기본 경로의 `config.toml`을 찾고,
    /// 없으면 기본값으로 시작한다.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let mut builder = config::Config::builder();

        let file = path
            .map(PathBuf::from)
            .or_else(Self::default_config_path)
            .filter(|p| p.exists());

        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("FRAMEGATE")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CoreError::Config(format!("설정 로드 실패: {e}")))
    }

    /// 플랫폼별 기본 설정 파일 경로
    ///
    /// - macOS: `~/Library/Application Support/io.framegate.agent/config.toml`
    /// - Linux: `~/.config/framegate/agent/config.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "framegate", "agent")
            .map(|p| p.config_dir().join("config.toml"))
    }
}
