//! 픽셀 품질 메트릭.
//!
//! 블러(라플라시안 분산), 조명(휘도 평균), 모션(프레임 간 차이).
//! 전부 순수 함수 — 상태 없음, I/O 없음, 동일 입력이면 동일 출력.
//! 성능을 위해 희소 그리드 샘플링 (블러/조명 4픽셀 간격, 모션 10픽셀 간격).

use framegate_core::models::frame::Frame;
use framegate_core::models::validation::QualitySample;

/// 블러 샘플링 간격 (행/열)
const BLUR_STRIDE: u32 = 4;

/// 조명 샘플링 간격 (픽셀 단위 — RGBA 16바이트)
const LIGHTING_STRIDE: usize = 16;

/// 모션 샘플링 간격 (행/열)
const MOTION_STRIDE: u32 = 10;

/// 모션 점수 최댓값 (채널당 255 차이 × 3채널)
pub const MOTION_SCORE_MAX: f64 = 765.0;

/// 블러 점수 — 라플라시안 에지 응답의 평균 제곱.
///
/// 적색 채널에 `|4c - l - r - t - b|` 근사 필터를 적용하고
/// 제곱 응답을 누적한다. 값이 클수록 선명, 0에 가까울수록 흐림.
/// 퇴화 입력(3x3 미만)은 0.
pub fn blur_score(frame: &Frame) -> f64 {
    if frame.width < 3 || frame.height < 3 {
        return 0.0;
    }

    let data = &frame.data;
    let row = frame.width as usize * 4;
    let mut variance = 0.0f64;
    let mut count = 0u64;

    let mut y = 1;
    while y < frame.height - 1 {
        let mut x = 1;
        while x < frame.width - 1 {
            let idx = frame.pixel_offset(x, y);

            let current = data[idx] as f64;
            let left = data[idx - 4] as f64;
            let right = data[idx + 4] as f64;
            let top = data[idx - row] as f64;
            let bottom = data[idx + row] as f64;

            let laplacian = (4.0 * current - left - right - top - bottom).abs();
            variance += laplacian * laplacian;
            count += 1;

            x += BLUR_STRIDE;
        }
        y += BLUR_STRIDE;
    }

    if count > 0 {
        variance / count as f64
    } else {
        0.0
    }
}

/// 조명 점수 — 방송 휘도 가중(0.299R + 0.587G + 0.114B) 평균, [0,1].
///
/// 0.0 = 완전 어두움, 1.0 = 완전 밝음. 퇴화 입력은 0.
pub fn lighting_score(frame: &Frame) -> f64 {
    if frame.is_degenerate() {
        return 0.0;
    }

    let data = &frame.data;
    let mut total_brightness = 0.0f64;
    let mut total_pixels = 0u64;

    let mut i = 0;
    while i + 2 < data.len() {
        let r = data[i] as f64;
        let g = data[i + 1] as f64;
        let b = data[i + 2] as f64;

        total_brightness += (0.299 * r + 0.587 * g + 0.114 * b) / 255.0;
        total_pixels += 1;

        i += LIGHTING_STRIDE;
    }

    if total_pixels > 0 {
        total_brightness / total_pixels as f64
    } else {
        0.0
    }
}

/// 모션 점수 — 두 프레임 간 채널별 절대차의 그리드 평균.
///
/// 10픽셀 간격 그리드에서 RGB 세 채널의 절대차를 더해 샘플 수로 나눈다.
/// 동일 프레임이면 0, 전흑 대 전백이면 [`MOTION_SCORE_MAX`].
/// 해상도가 다르거나 퇴화 입력이면 `None` — 호출자가 가드한다.
pub fn motion_score(previous: &Frame, current: &Frame) -> Option<f64> {
    if previous.dimensions() != current.dimensions() || current.is_degenerate() {
        return None;
    }

    let prev = &previous.data;
    let curr = &current.data;
    let mut motion = 0u64;
    let mut sampled = 0u64;

    let mut y = 0;
    while y < current.height {
        let mut x = 0;
        while x < current.width {
            let idx = current.pixel_offset(x, y);

            let dr = (curr[idx] as i32 - prev[idx] as i32).unsigned_abs();
            let dg = (curr[idx + 1] as i32 - prev[idx + 1] as i32).unsigned_abs();
            let db = (curr[idx + 2] as i32 - prev[idx + 2] as i32).unsigned_abs();

            motion += (dr + dg + db) as u64;
            sampled += 1;

            x += MOTION_STRIDE;
        }
        y += MOTION_STRIDE;
    }

    if sampled == 0 {
        return None;
    }
    Some(motion as f64 / sampled as f64)
}

/// 스크린샷 품질 샘플 — 블러 + 조명을 한 번에 계산.
///
/// 요청 시마다 재계산되며 보관하지 않는다.
pub fn quality_sample(frame: &Frame) -> QualitySample {
    QualitySample {
        blur_score: blur_score(frame),
        lighting_score: lighting_score(frame),
    }
}
