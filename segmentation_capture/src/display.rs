use crate::frame::DisplayImage;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use std::sync::Arc;
use tokio::sync::watch;

/// Where the live preview and the segmentation overlay are shown.
pub trait DisplaySink: Send + Sync {
    fn show_preview(&self, image: &DisplayImage);
    fn show_overlay(&self, image: &DisplayImage);
}

impl<T: DisplaySink + ?Sized> DisplaySink for Arc<T> {
    fn show_preview(&self, image: &DisplayImage) {
        (**self).show_preview(image)
    }

    fn show_overlay(&self, image: &DisplayImage) {
        (**self).show_overlay(image)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Preview,
    Overlay,
}

/// Keeps the latest preview and overlay as JPEG for the MJPEG routes.
pub struct MjpegDisplay {
    preview: watch::Sender<Option<Bytes>>,
    overlay: watch::Sender<Option<Bytes>>,
    quality: u8,
}

impl MjpegDisplay {
    pub fn new(quality: u8) -> Self {
        let (preview, _) = watch::channel(None);
        let (overlay, _) = watch::channel(None);
        Self {
            preview,
            overlay,
            quality: quality.clamp(1, 100),
        }
    }

    pub fn subscribe(&self, feed: Feed) -> watch::Receiver<Option<Bytes>> {
        match feed {
            Feed::Preview => self.preview.subscribe(),
            Feed::Overlay => self.overlay.subscribe(),
        }
    }

    fn publish(&self, feed: Feed, image: &DisplayImage) {
        let jpeg = match encode_jpeg(image, self.quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                tracing::warn!("Failed to encode {:?} image: {}", feed, e);
                return;
            }
        };
        let sender = match feed {
            Feed::Preview => &self.preview,
            Feed::Overlay => &self.overlay,
        };
        sender.send_replace(Some(jpeg));
    }
}

impl DisplaySink for MjpegDisplay {
    fn show_preview(&self, image: &DisplayImage) {
        self.publish(Feed::Preview, image);
    }

    fn show_overlay(&self, image: &DisplayImage) {
        self.publish(Feed::Overlay, image);
    }
}

fn encode_jpeg(image: &DisplayImage, quality: u8) -> Result<Bytes, image::ImageError> {
    let rgb = image::DynamicImage::ImageRgba8(image.clone()).into_rgb8();
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode_image(&rgb)?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_overlay_is_published_as_jpeg() {
        let display = MjpegDisplay::new(80);
        let overlay = display.subscribe(Feed::Overlay);
        let preview = display.subscribe(Feed::Preview);

        display.show_overlay(&DisplayImage::from_pixel(8, 8, Rgba([255, 255, 255, 255])));

        let jpeg = overlay.borrow().clone().unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(preview.borrow().is_none());
    }

    #[test]
    fn test_late_subscriber_sees_latest_frame() {
        let display = MjpegDisplay::new(80);
        display.show_preview(&DisplayImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));

        assert!(display.subscribe(Feed::Preview).borrow().is_some());
    }
}
