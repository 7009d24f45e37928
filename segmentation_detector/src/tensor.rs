use crate::{
    buffer::{PixelBuffer, PixelFormat},
    model_service::{ModelError, Observation},
};
use ndarray::{Array, ArrayD, Axis, Ix4};

/// Converts a pixel buffer into a `[1, 3, H, W]` RGB tensor scaled to `[0, 1]`.
pub fn buffer_to_tensor(input: &PixelBuffer) -> Result<Array<f32, Ix4>, ModelError> {
    let (width, height) = (input.width() as usize, input.height() as usize);
    let bpp = input.format().bytes_per_pixel();
    // (red, green, blue, alpha) byte offsets within a pixel
    let (r, g, b, a) = match input.format() {
        PixelFormat::Argb32Premultiplied => (1, 2, 3, Some(0)),
        PixelFormat::Bgra32 => (2, 1, 0, None),
        PixelFormat::Bgr24 => (2, 1, 0, None),
        PixelFormat::Rgb24 => (0, 1, 2, None),
        PixelFormat::OneComponent8 => (0, 0, 0, None),
    };

    let mut tensor = Array::zeros((1, 3, height, width));
    for y in 0..height {
        let row = input.row(y as u32);
        for x in 0..width {
            let px = &row[x * bpp..(x + 1) * bpp];
            let alpha = a.map(|i| px[i] as f32).unwrap_or(255.);
            if alpha == 0. {
                continue;
            }
            let scale = 1. / alpha;
            tensor[[0, 0, y, x]] = (px[r] as f32 * scale).min(1.);
            tensor[[0, 1, y, x]] = (px[g] as f32 * scale).min(1.);
            tensor[[0, 2, y, x]] = (px[b] as f32 * scale).min(1.);
        }
    }

    Ok(tensor)
}

/// Interprets a model output tensor as a mask.
///
/// `[1, 1, H, W]` and `[1, H, W]` are read as per-pixel foreground
/// probabilities, `[1, C, H, W]` as per-class scores where any class other
/// than 0 is foreground. Anything else is returned as a raw tensor.
pub fn mask_from_output(output: ArrayD<f32>, threshold: Option<f32>) -> Result<Observation, ModelError> {
    let shape = output.shape().to_vec();

    let mask = match shape.as_slice() {
        [1, 1, h, w] | [1, h, w] => {
            let plane = output
                .to_shape((*h, *w))
                .map_err(|e| ModelError::Execution(format!("invalid mask shape: {}", e)))?;
            let mut mask = new_mask(*w, *h)?;
            for ((y, x), p) in plane.indexed_iter() {
                mask.data_mut()[y * w + x] = match threshold {
                    Some(t) if *p >= t => 255,
                    Some(_) => 0,
                    None => (p.clamp(0., 1.) * 255.).round() as u8,
                };
            }
            mask
        }
        [1, c, h, w] if *c > 1 => {
            let scores = output.index_axis(Axis(0), 0);
            let mut mask = new_mask(*w, *h)?;
            for y in 0..*h {
                for x in 0..*w {
                    let class = (0..*c)
                        .map(|k| (k, scores[[k, y, x]]))
                        .reduce(|best, next| if next.1 > best.1 { next } else { best })
                        .map(|(k, _)| k)
                        .unwrap_or(0);
                    mask.data_mut()[y * w + x] = if class == 0 { 0 } else { 255 };
                }
            }
            mask
        }
        _ => return Ok(Observation::Tensor(output)),
    };

    Ok(Observation::PixelBuffer(mask))
}

fn new_mask(width: usize, height: usize) -> Result<PixelBuffer, ModelError> {
    PixelBuffer::new(width as u32, height as u32, PixelFormat::OneComponent8)
        .map_err(|e| ModelError::Execution(format!("failed to allocate mask: {}", e)))
}
