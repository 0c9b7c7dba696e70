//! 프레임 인코더.
//!
//! 원격 전송용 WebP 인코딩 + Base64, fast_image_resize 기반 다운스케일.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use fast_image_resize::{images::Image as FirImage, ResizeAlg, ResizeOptions, Resizer};
use framegate_core::error::CoreError;
use framegate_core::models::frame::Frame;
use image::RgbaImage;
use tracing::debug;

/// WebP 품질 프리셋
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebPQuality {
    /// 낮은 품질 (60%) — 원격 전송 기본
    Low = 60,
    /// 중간 품질 (75%)
    Medium = 75,
    /// 높은 품질 (85%) — 스크린샷 응답용
    High = 85,
}

/// 프레임 → RgbaImage 변환
fn to_rgba_image(frame: &Frame) -> Result<RgbaImage, CoreError> {
    RgbaImage::from_raw(frame.width, frame.height, frame.data.to_vec())
        .ok_or_else(|| CoreError::Internal("프레임 버퍼 길이 불일치".to_string()))
}

/// WebP 인코딩
pub fn encode_webp(frame: &Frame, quality: WebPQuality) -> Result<Vec<u8>, CoreError> {
    if frame.is_degenerate() {
        return Err(CoreError::Internal("퇴화 프레임은 인코딩 불가".to_string()));
    }

    let rgba = to_rgba_image(frame)?;
    let encoder = webp::Encoder::from_rgba(&rgba, frame.width, frame.height);
    let encoded = encoder.encode(quality as u8 as f32).to_vec();

    debug!(
        "WebP 인코딩: {}x{} → {} bytes (품질 {})",
        frame.width,
        frame.height,
        encoded.len(),
        quality as u8
    );

    Ok(encoded)
}

/// WebP 인코딩 후 Base64 반환
pub fn encode_webp_base64(frame: &Frame, quality: WebPQuality) -> Result<String, CoreError> {
    let bytes = encode_webp(frame, quality)?;
    Ok(B64.encode(&bytes))
}

/// 비율 유지 다운스케일 — 긴 변을 `max_edge` 이하로.
///
/// 이미 충분히 작으면 입력 프레임을 그대로 반환한다 (복사 없음).
pub fn downscale(frame: &Frame, max_edge: u32) -> Result<Frame, CoreError> {
    if max_edge == 0 {
        return Err(CoreError::Internal("max_edge는 0일 수 없음".to_string()));
    }
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 {
        return Err(CoreError::Internal("소스 프레임 크기 0".to_string()));
    }

    let longest = w.max(h);
    if longest <= max_edge {
        return Ok(frame.clone());
    }

    let scale = max_edge as f64 / longest as f64;
    let dst_w = ((w as f64 * scale).round() as u32).max(1);
    let dst_h = ((h as f64 * scale).round() as u32).max(1);

    let src_image = FirImage::from_vec_u8(w, h, frame.data.to_vec(), fast_image_resize::PixelType::U8x4)
        .map_err(|e| CoreError::Internal(format!("소스 이미지 생성 실패: {e}")))?;

    let mut dst_image = FirImage::new(dst_w, dst_h, fast_image_resize::PixelType::U8x4);

    let mut resizer = Resizer::new();
    let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(
        fast_image_resize::FilterType::Bilinear,
    ));

    resizer
        .resize(&src_image, &mut dst_image, &options)
        .map_err(|e| CoreError::Internal(format!("리사이즈 실패: {e}")))?;

    debug!("다운스케일: {w}x{h} → {dst_w}x{dst_h}");

    Frame::from_rgba(dst_w, dst_h, dst_image.into_vec())
        .ok_or_else(|| CoreError::Internal("결과 프레임 생성 실패".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_bytes() {
        let frame = Frame::solid(320, 240, [100, 150, 200, 255]);
        let bytes = encode_webp(&frame, WebPQuality::Medium).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn encode_base64_decodable() {
        let frame = Frame::solid(64, 64, [10, 20, 30, 255]);
        let b64 = encode_webp_base64(&frame, WebPQuality::Low).unwrap();
        let decoded = B64.decode(&b64).unwrap();
        assert!(!decoded.is_empty());
    }

    #[test]
    fn encode_degenerate_fails() {
        let frame = Frame::solid(0, 0, [0, 0, 0, 0]);
        assert!(encode_webp(&frame, WebPQuality::Low).is_err());
    }

    #[test]
    fn downscale_preserves_aspect() {
        let frame = Frame::solid(1920, 1080, [50, 50, 50, 255]);
        let small = downscale(&frame, 512).unwrap();
        assert_eq!(small.dimensions(), (512, 288));
    }

    #[test]
    fn downscale_noop_when_small() {
        let frame = Frame::solid(320, 240, [50, 50, 50, 255]);
        let same = downscale(&frame, 512).unwrap();
        assert_eq!(same.dimensions(), (320, 240));
    }

    #[test]
    fn downscale_portrait() {
        let frame = Frame::solid(600, 1200, [50, 50, 50, 255]);
        let small = downscale(&frame, 300).unwrap();
        assert_eq!(small.dimensions(), (150, 300));
    }
}
