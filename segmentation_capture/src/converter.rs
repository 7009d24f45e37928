use crate::frame::{DisplayImage, Orientation};
use image::{imageops, Rgba};
use segmentation_detector::{PixelBuffer, PixelFormat};

/// Draws `image` into a freshly allocated alpha-first, premultiplied 32-bit
/// buffer of the same size. `None` means the frame should be skipped.
pub fn pixel_buffer_from_image(image: &DisplayImage) -> Option<PixelBuffer> {
    let mut buffer = match PixelBuffer::new(image.width(), image.height(), PixelFormat::Argb32Premultiplied) {
        Ok(buffer) => buffer,
        Err(e) => {
            tracing::warn!("Failed to allocate model input buffer: {}", e);
            return None;
        }
    };

    let bytes_per_row = buffer.bytes_per_row();
    let data = buffer.data_mut();
    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let offset = y as usize * bytes_per_row + x as usize * 4;
        data[offset..offset + 4].copy_from_slice(&[
            a,
            premultiply(r, a),
            premultiply(g, a),
            premultiply(b, a),
        ]);
    }

    Some(buffer)
}

/// Decodes any supported pixel buffer into a straight-alpha RGBA image.
/// Single-channel masks become opaque grayscale.
pub fn image_from_pixel_buffer(buffer: &PixelBuffer) -> DisplayImage {
    let bpp = buffer.format().bytes_per_pixel();
    let mut image = DisplayImage::new(buffer.width(), buffer.height());

    for y in 0..buffer.height() {
        let row = buffer.row(y);
        for (x, px) in row.chunks_exact(bpp).enumerate() {
            let rgba = match buffer.format() {
                PixelFormat::Argb32Premultiplied => [
                    unpremultiply(px[1], px[0]),
                    unpremultiply(px[2], px[0]),
                    unpremultiply(px[3], px[0]),
                    px[0],
                ],
                PixelFormat::Bgra32 => [px[2], px[1], px[0], px[3]],
                PixelFormat::Bgr24 => [px[2], px[1], px[0], 255],
                PixelFormat::Rgb24 => [px[0], px[1], px[2], 255],
                PixelFormat::OneComponent8 => [px[0], px[0], px[0], 255],
            };
            image.put_pixel(x as u32, y, Rgba(rgba));
        }
    }

    image
}

pub fn orient(image: DisplayImage, orientation: Orientation) -> DisplayImage {
    match orientation {
        Orientation::Up => image,
        Orientation::Right => imageops::rotate90(&image),
        Orientation::Down => imageops::rotate180(&image),
        Orientation::Left => imageops::rotate270(&image),
    }
}

fn premultiply(c: u8, a: u8) -> u8 {
    ((c as u16 * a as u16 + 127) / 255) as u8
}

fn unpremultiply(c: u8, a: u8) -> u8 {
    if a == 0 {
        return 0;
    }
    ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> DisplayImage {
        DisplayImage::from_pixel(width, height, Rgba(rgba))
    }

    #[test]
    fn test_solid_colors_round_trip() {
        for color in [[0, 0, 0, 255], [255, 255, 255, 255], [128, 128, 128, 255]] {
            let image = solid(64, 64, color);

            let buffer = pixel_buffer_from_image(&image).unwrap();
            assert_eq!(buffer.format(), PixelFormat::Argb32Premultiplied);
            assert_eq!((buffer.width(), buffer.height()), (64, 64));

            let decoded = image_from_pixel_buffer(&buffer);
            assert!(decoded.pixels().all(|p| p.0 == color), "color {:?}", color);
        }
    }

    #[test]
    fn test_buffer_layout_is_alpha_first_premultiplied() {
        let image = solid(2, 1, [200, 100, 0, 128]);

        let buffer = pixel_buffer_from_image(&image).unwrap();

        assert_eq!(buffer.bytes_per_row(), 8);
        assert_eq!(buffer.pixel(1, 0), &[128, 100, 50, 0]);
    }

    #[test]
    fn test_non_square_size_is_preserved() {
        let image = solid(37, 5, [1, 2, 3, 255]);
        let buffer = pixel_buffer_from_image(&image).unwrap();
        assert_eq!(buffer.data().len(), 37 * 5 * 4);
    }

    #[test]
    fn test_empty_image_is_skipped() {
        let image = DisplayImage::new(0, 0);
        assert!(pixel_buffer_from_image(&image).is_none());
    }

    #[test]
    fn test_mask_decodes_to_grayscale() {
        let mask =
            PixelBuffer::from_raw(2, 1, 2, PixelFormat::OneComponent8, vec![0, 255]).unwrap();

        let image = image_from_pixel_buffer(&mask);

        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_bgr_frame_decodes_to_rgb() {
        let raw = PixelBuffer::from_raw(1, 1, 3, PixelFormat::Bgr24, vec![10, 20, 30]).unwrap();
        assert_eq!(image_from_pixel_buffer(&raw).get_pixel(0, 0).0, [30, 20, 10, 255]);
    }

    #[test]
    fn test_orient_right_swaps_dimensions() {
        let image = solid(4, 2, [0, 0, 0, 255]);
        let rotated = orient(image, Orientation::Right);
        assert_eq!(rotated.dimensions(), (2, 4));
    }
}
