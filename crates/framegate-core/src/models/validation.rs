//! 검증 점수 모델.
//!
//! 최신값 덮어쓰기 슬롯 — 큐/평균이 아니라 항상 가장 최근 관측값을 보고한다.
//! 캡처 루프(모션)와 워커 응답 핸들러(분류)가 쓰고, 검증 리포터가 읽는다.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// 검증 틱 페이로드 — 틱 시점의 최신값 스냅샷
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationTick {
    /// 모션 점수 (0 이상, 최대 765)
    pub motion_score: f64,
    /// 분류/감지 신뢰도 (0.0 ~ 1.0)
    pub classification_score: f64,
}

/// 스크린샷 품질 샘플 — 요청 시마다 재계산, 보관하지 않음
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualitySample {
    /// 블러 점수 (0 이상 — 클수록 선명)
    pub blur_score: f64,
    /// 조명 점수 (0.0 어두움 ~ 1.0 밝음)
    pub lighting_score: f64,
}

/// 최신 점수 슬롯
///
/// 락은 값 복사 동안만 유지된다. 쓰기 경로가 단일 태스크씩이므로
/// 경합은 사실상 없고, 리포터는 틱마다 스냅샷만 뜬다.
#[derive(Debug, Default)]
pub struct LatestScores {
    inner: RwLock<ValidationTickInner>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ValidationTickInner {
    motion: f64,
    classification: f64,
}

impl LatestScores {
    /// 새 슬롯 (0.0 / 0.0)
    pub fn new() -> Self {
        Self::default()
    }

    /// 모션 점수 덮어쓰기
    pub fn set_motion(&self, score: f64) {
        self.inner.write().motion = score;
    }

    /// 분류 점수 덮어쓰기
    pub fn set_classification(&self, score: f64) {
        self.inner.write().classification = score;
    }

    /// 현재 스냅샷
    pub fn snapshot(&self) -> ValidationTick {
        let inner = *self.inner.read();
        ValidationTick {
            motion_score: inner.motion,
            classification_score: inner.classification,
        }
    }

    /// 0으로 초기화 (감지 재시작 시)
    pub fn reset(&self) {
        *self.inner.write() = ValidationTickInner::default();
    }
}
