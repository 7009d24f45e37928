use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PixelBufferError {
    #[error("Invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("Row stride {bytes_per_row} is smaller than {min} bytes")]
    InvalidStride { bytes_per_row: usize, min: usize },
    #[error("Expected at least {expected} bytes, got {actual}")]
    DataTooShort { expected: usize, actual: usize },
    #[error("Failed to allocate {0} bytes")]
    AllocationFailed(usize),
}

/// Memory layout of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32 bits per pixel, `[A, R, G, B]`, color premultiplied by alpha.
    Argb32Premultiplied,
    Bgra32,
    Bgr24,
    Rgb24,
    /// 8-bit single channel, used for masks.
    OneComponent8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Argb32Premultiplied | PixelFormat::Bgra32 => 4,
            PixelFormat::Bgr24 | PixelFormat::Rgb24 => 3,
            PixelFormat::OneComponent8 => 1,
        }
    }
}

/// A raw, row-major pixel buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    bytes_per_row: usize,
    format: PixelFormat,
    data: Vec<u8>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes_per_row", &self.bytes_per_row)
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}

impl PixelBuffer {
    /// Allocates a zeroed buffer with tightly packed rows.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, PixelBufferError> {
        if width == 0 || height == 0 {
            return Err(PixelBufferError::InvalidDimensions { width, height });
        }
        let bytes_per_row = (width as usize)
            .checked_mul(format.bytes_per_pixel())
            .ok_or(PixelBufferError::InvalidDimensions { width, height })?;
        let len = bytes_per_row
            .checked_mul(height as usize)
            .ok_or(PixelBufferError::InvalidDimensions { width, height })?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| PixelBufferError::AllocationFailed(len))?;
        data.resize(len, 0);

        Ok(Self {
            width,
            height,
            bytes_per_row,
            format,
            data,
        })
    }

    /// Wraps existing bytes. Rows may carry padding beyond `width * bpp`.
    pub fn from_raw(
        width: u32,
        height: u32,
        bytes_per_row: usize,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, PixelBufferError> {
        if width == 0 || height == 0 {
            return Err(PixelBufferError::InvalidDimensions { width, height });
        }
        let min = width as usize * format.bytes_per_pixel();
        if bytes_per_row < min {
            return Err(PixelBufferError::InvalidStride { bytes_per_row, min });
        }
        let expected = bytes_per_row * (height as usize - 1) + min;
        if data.len() < expected {
            return Err(PixelBufferError::DataTooShort {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            bytes_per_row,
            format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn is_packed(&self) -> bool {
        self.bytes_per_row == self.width as usize * self.format.bytes_per_pixel()
    }

    /// The bytes of one row, without padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.bytes_per_row;
        &self.data[start..start + self.width as usize * self.format.bytes_per_pixel()]
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = self.format.bytes_per_pixel();
        let start = y as usize * self.bytes_per_row + x as usize * bpp;
        &self.data[start..start + bpp]
    }

    /// Copies the pixels into a tightly packed buffer, dropping row padding.
    pub fn into_packed(self) -> Self {
        if self.is_packed() {
            return self;
        }
        let mut data = Vec::with_capacity(
            self.width as usize * self.height as usize * self.format.bytes_per_pixel(),
        );
        for y in 0..self.height {
            data.extend_from_slice(self.row(y));
        }
        Self {
            bytes_per_row: self.width as usize * self.format.bytes_per_pixel(),
            data,
            ..self
        }
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_packed_and_zeroed() {
        let buffer = PixelBuffer::new(4, 3, PixelFormat::Argb32Premultiplied).unwrap();
        assert_eq!(buffer.bytes_per_row(), 16);
        assert_eq!(buffer.data().len(), 48);
        assert!(buffer.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_sized_buffer_is_rejected() {
        let err = PixelBuffer::new(0, 10, PixelFormat::OneComponent8).unwrap_err();
        assert_eq!(
            err,
            PixelBufferError::InvalidDimensions {
                width: 0,
                height: 10
            }
        );
    }

    #[test]
    fn test_padded_rows_are_stripped() {
        // 2x2 gray buffer with 2 bytes of padding per row
        let data = vec![1, 2, 0, 0, 3, 4, 0, 0];
        let buffer = PixelBuffer::from_raw(2, 2, 4, PixelFormat::OneComponent8, data).unwrap();
        assert!(!buffer.is_packed());
        assert_eq!(buffer.pixel(1, 1), &[4]);

        let packed = buffer.into_packed();
        assert!(packed.is_packed());
        assert_eq!(packed.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_short_data_is_rejected() {
        let result = PixelBuffer::from_raw(2, 2, 6, PixelFormat::Bgr24, vec![0; 10]);
        assert_eq!(
            result.unwrap_err(),
            PixelBufferError::DataTooShort {
                expected: 12,
                actual: 10
            }
        );
    }
}
