//! 프레임 모델.
//!
//! 캡처 시점의 불변 RGBA8 픽셀 버퍼. `Arc` 공유로 복제 비용 없이
//! 캡처 루프의 이전-프레임 슬롯과 워커 제출 경로에 전달된다.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// 캡처된 단일 프레임 (RGBA8, row-major)
#[derive(Debug, Clone)]
pub struct Frame {
    /// 가로 픽셀 수
    pub width: u32,
    /// 세로 픽셀 수
    pub height: u32,
    /// 픽셀 데이터 — 길이는 반드시 `width * height * 4`
    pub data: Arc<[u8]>,
    /// 캡처 시각
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// 원시 RGBA 버퍼로부터 프레임 생성.
    ///
    /// 버퍼 길이가 `width * height * 4`와 다르면 `None`.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != (width as usize) * (height as usize) * 4 {
            return None;
        }
        Some(Self {
            width,
            height,
            data: data.into(),
            captured_at: Utc::now(),
        })
    }

    /// 단색 프레임 생성 (테스트/합성 소스용)
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((width as usize) * (height as usize) * 4);
        for _ in 0..(width as usize) * (height as usize) {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data: data.into(),
            captured_at: Utc::now(),
        }
    }

    /// (width, height) 튜플
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// 픽셀이 없는 퇴화 프레임인지 여부
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// (x, y) 픽셀의 RGBA 시작 오프셋
    #[inline]
    pub fn pixel_offset(&self, x: u32, y: u32) -> usize {
        ((y as usize) * (self.width as usize) + (x as usize)) * 4
    }
}

/// 직사각형 영역 (감지 바운딩 박스, 프레임 픽셀 좌표)
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}
