use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

const FRAME_BOUNDARY: &str = "frame";

pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

#[derive(Error, Debug)]
pub enum VideoStreamError {
    #[error("Http builder error: {0}")]
    HttpBuilderError(String),
}

/// MJPEG stream of the latest JPEG published on a display feed.
pub struct VideoStream {
    frames: watch::Receiver<Option<Bytes>>,
}

impl VideoStream {
    pub fn new(frames: watch::Receiver<Option<Bytes>>) -> Self {
        Self { frames }
    }

    /// Yields one multipart part per published JPEG. Intermediate frames are
    /// skipped when the client reads slower than frames are published.
    pub fn generate_stream(self) -> impl Stream<Item = Result<Bytes, VideoStreamError>> {
        WatchStream::new(self.frames).filter_map(|frame| async move {
            frame.map(|jpeg| Ok(multipart_part(&jpeg)))
        })
    }
}

fn multipart_part(jpeg: &[u8]) -> Bytes {
    let part_header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        FRAME_BOUNDARY,
        jpeg.len()
    );
    let mut body = part_header.into_bytes();
    body.extend_from_slice(jpeg);
    body.extend_from_slice(b"\r\n");
    Bytes::from(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_part_layout() {
        let part = multipart_part(&[0xFF, 0xD8, 0xFF, 0xD9]);

        let header = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n";
        assert!(part.starts_with(header));
        assert_eq!(&part[header.len()..], &[0xFF, 0xD8, 0xFF, 0xD9, b'\r', b'\n']);
    }

    #[tokio::test]
    async fn test_stream_skips_empty_feed_and_yields_latest() {
        let (tx, rx) = watch::channel(None);
        let stream = VideoStream::new(rx).generate_stream();
        futures::pin_mut!(stream);

        tx.send_replace(Some(Bytes::from_static(b"first")));
        tx.send_replace(Some(Bytes::from_static(b"latest")));

        let part = stream.next().await.unwrap().unwrap();
        assert!(part.ends_with(b"latest\r\n"));

        drop(tx);
        assert!(stream.next().await.is_none());
    }
}
