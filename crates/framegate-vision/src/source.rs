//! 프레임 소스 어댑터.
//!
//! `FrameSource` 포트 구현 — xcap 스크린 소스(feature `screen`),
//! 헤드리스 실행/테스트용 합성 패턴 소스.

use framegate_core::models::frame::Frame;
use framegate_core::ports::frame_source::FrameSource;
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "screen")]
use tracing::debug;

/// 합성 프레임 소스 — 결정적 패턴 생성기
///
/// 캡처마다 밝은 세로 막대가 한 칸씩 이동하는 그라디언트를 생성한다.
/// 카메라 없는 환경에서 모션/분류 파이프라인 전체를 구동할 수 있다.
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    tick: AtomicU64,
}

impl SyntheticFrameSource {
    /// 새 합성 소스 생성
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: AtomicU64::new(0),
        }
    }

    /// 기본 해상도 (320x240)
    pub fn with_default_size() -> Self {
        Self::new(320, 240)
    }
}

impl FrameSource for SyntheticFrameSource {
    fn is_ready(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    fn capture_frame(&self) -> Option<Frame> {
        if !self.is_ready() {
            return None;
        }

        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        let bar_x = (tick % self.width as u64) as u32;

        let mut data = Vec::with_capacity((self.width * self.height * 4) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                // 수평 그라디언트 + 이동 막대
                let base = ((x * 255) / self.width.max(1)) as u8;
                let v = if x == bar_x { 255 } else { base / 2 };
                let row_shade = ((y * 128) / self.height.max(1)) as u8;
                data.extend_from_slice(&[v, base, row_shade, 255]);
            }
        }

        Frame::from_rgba(self.width, self.height, data)
    }

    fn video_dimensions(&self) -> Option<(u32, u32)> {
        if self.is_ready() {
            Some((self.width, self.height))
        } else {
            None
        }
    }
}

/// 스크린 프레임 소스 — xcap 기반 주 모니터 캡처
#[cfg(feature = "screen")]
pub struct ScreenFrameSource;

#[cfg(feature = "screen")]
impl ScreenFrameSource {
    /// 새 스크린 소스 생성
    pub fn new() -> Self {
        Self
    }

    fn primary_monitor() -> Option<xcap::Monitor> {
        let monitors = xcap::Monitor::all().ok()?;
        monitors
            .into_iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .or_else(|| xcap::Monitor::all().ok()?.into_iter().next())
    }
}

#[cfg(feature = "screen")]
impl Default for ScreenFrameSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "screen")]
impl FrameSource for ScreenFrameSource {
    fn is_ready(&self) -> bool {
        xcap::Monitor::all().map(|m| !m.is_empty()).unwrap_or(false)
    }

    fn capture_frame(&self) -> Option<Frame> {
        let monitor = Self::primary_monitor()?;
        let image = match monitor.capture_image() {
            Ok(image) => image,
            Err(e) => {
                debug!("스크린 캡처 실패: {e}");
                return None;
            }
        };

        let (w, h) = (image.width(), image.height());
        debug!("스크린 캡처 완료: {w}x{h}");
        Frame::from_rgba(w, h, image.into_raw())
    }

    fn video_dimensions(&self) -> Option<(u32, u32)> {
        let monitor = Self::primary_monitor()?;
        let w = monitor.width().ok()?;
        let h = monitor.height().ok()?;
        Some((w, h))
    }
}
