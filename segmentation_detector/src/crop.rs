use crate::buffer::{PixelBuffer, PixelBufferError, PixelFormat};
use image::{
    imageops::{self, FilterType},
    ImageBuffer, Luma, Pixel, Rgb, Rgba,
};
use serde::Deserialize;

/// How an input whose aspect ratio differs from the model's is fitted to the
/// model's input dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropScalePolicy {
    /// Crop the largest centered region with the target aspect ratio, then scale.
    #[default]
    CenterCrop,
    /// Scale preserving aspect ratio and pad the remainder with zeros.
    ScaleFit,
    /// Scale each axis independently.
    ScaleFill,
}

impl CropScalePolicy {
    pub fn apply(
        &self,
        input: &PixelBuffer,
        width: u32,
        height: u32,
    ) -> Result<PixelBuffer, PixelBufferError> {
        if width == 0 || height == 0 {
            return Err(PixelBufferError::InvalidDimensions { width, height });
        }
        if input.width() == width && input.height() == height {
            return Ok(input.clone().into_packed());
        }

        let format = input.format();
        let (src_w, src_h) = (input.width(), input.height());
        let data = input.clone().into_packed().into_data();

        let out = match format.bytes_per_pixel() {
            4 => fit::<Rgba<u8>>(*self, src_w, src_h, data, width, height),
            3 => fit::<Rgb<u8>>(*self, src_w, src_h, data, width, height),
            _ => fit::<Luma<u8>>(*self, src_w, src_h, data, width, height),
        }
        .ok_or(PixelBufferError::InvalidDimensions {
            width: src_w,
            height: src_h,
        })?;

        PixelBuffer::from_raw(
            width,
            height,
            width as usize * format.bytes_per_pixel(),
            format,
            out,
        )
    }
}

// Channel meaning is irrelevant to cropping and resampling, so ARGB data is
// carried through `Rgba<u8>` untouched.
fn fit<P>(
    policy: CropScalePolicy,
    src_w: u32,
    src_h: u32,
    data: Vec<u8>,
    width: u32,
    height: u32,
) -> Option<Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let src: ImageBuffer<P, Vec<u8>> = ImageBuffer::from_raw(src_w, src_h, data)?;

    let out = match policy {
        CropScalePolicy::ScaleFill => imageops::resize(&src, width, height, FilterType::Triangle),
        CropScalePolicy::CenterCrop => {
            let (x, y, w, h) = center_crop_rect(src_w, src_h, width, height);
            let cropped = imageops::crop_imm(&src, x, y, w, h).to_image();
            imageops::resize(&cropped, width, height, FilterType::Triangle)
        }
        CropScalePolicy::ScaleFit => {
            let (w, h) = scale_fit_size(src_w, src_h, width, height);
            let scaled = imageops::resize(&src, w, h, FilterType::Triangle);
            let mut canvas: ImageBuffer<P, Vec<u8>> = ImageBuffer::new(width, height);
            let x = ((width - w) / 2) as i64;
            let y = ((height - h) / 2) as i64;
            imageops::replace(&mut canvas, &scaled, x, y);
            canvas
        }
    };

    Some(out.into_raw())
}

fn center_crop_rect(src_w: u32, src_h: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let (src_w64, src_h64) = (src_w as u64, src_h as u64);
    let (w64, h64) = (width as u64, height as u64);

    let (crop_w, crop_h) = if src_w64 * h64 > src_h64 * w64 {
        (((src_h64 * w64 + h64 / 2) / h64).max(1) as u32, src_h)
    } else {
        (src_w, ((src_w64 * h64 + w64 / 2) / w64).max(1) as u32)
    };
    let crop_w = crop_w.min(src_w);
    let crop_h = crop_h.min(src_h);

    ((src_w - crop_w) / 2, (src_h - crop_h) / 2, crop_w, crop_h)
}

fn scale_fit_size(src_w: u32, src_h: u32, width: u32, height: u32) -> (u32, u32) {
    let scale = (width as f64 / src_w as f64).min(height as f64 / src_h as f64);
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, width);
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, height);
    (w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_with_border(width: u32, height: u32, border: u32) -> PixelBuffer {
        let mut buffer = PixelBuffer::new(width, height, PixelFormat::OneComponent8).unwrap();
        let data = buffer.data_mut();
        for y in 0..height {
            for x in 0..width {
                let inside = x >= border && x < width - border;
                data[(y * width + x) as usize] = if inside { 200 } else { 10 };
            }
        }
        buffer
    }

    #[test]
    fn test_center_crop_rect_landscape_to_square() {
        assert_eq!(center_crop_rect(1920, 1080, 224, 224), (420, 0, 1080, 1080));
    }

    #[test]
    fn test_center_crop_rect_portrait_to_square() {
        assert_eq!(center_crop_rect(480, 640, 100, 100), (0, 80, 480, 480));
    }

    #[test]
    fn test_scale_fit_size_keeps_aspect() {
        assert_eq!(scale_fit_size(200, 100, 50, 50), (50, 25));
    }

    #[test]
    fn test_center_crop_discards_side_columns() {
        // Left and right 20 columns differ from the center; a square center
        // crop of a 100x60 image must only see the center region.
        let input = gray_with_border(100, 60, 20);
        let output = CropScalePolicy::CenterCrop.apply(&input, 30, 30).unwrap();

        assert_eq!(output.width(), 30);
        assert_eq!(output.height(), 30);
        assert!(output.data().iter().all(|&v| v == 200));
    }

    #[test]
    fn test_scale_fit_pads_with_zeros() {
        let mut input = PixelBuffer::new(40, 20, PixelFormat::Argb32Premultiplied).unwrap();
        input.data_mut().fill(255);

        let output = CropScalePolicy::ScaleFit.apply(&input, 20, 20).unwrap();

        assert_eq!(output.pixel(10, 0), &[0, 0, 0, 0]);
        assert_eq!(output.pixel(10, 10), &[255, 255, 255, 255]);
        assert_eq!(output.pixel(10, 19), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_scale_fill_stretches_to_target() {
        let input = PixelBuffer::new(64, 16, PixelFormat::Bgr24).unwrap();
        let output = CropScalePolicy::ScaleFill.apply(&input, 8, 8).unwrap();
        assert_eq!(output.data().len(), 8 * 8 * 3);
    }

    #[test]
    fn test_matching_size_is_returned_unchanged() {
        let input = gray_with_border(16, 16, 4);
        let output = CropScalePolicy::CenterCrop.apply(&input, 16, 16).unwrap();
        assert_eq!(output, input);
    }
}
