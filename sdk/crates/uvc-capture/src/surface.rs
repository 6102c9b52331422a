//! Capture surface: where drivers render frames and where the capture thread
//! picks them up.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::CaptureConfig;

/// Frames buffered between a driver and the capture thread. Frames pushed
/// while the queue is full are dropped.
const FRAME_QUEUE_DEPTH: usize = 4;

/// Column-major 4x4 identity transform.
pub const IDENTITY_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// A frame rendered into the surface texture by a driver.
#[derive(Debug, Clone)]
pub struct TextureFrame {
    /// Texture coordinate transform for this frame.
    pub transform_matrix: [f32; 16],
    /// Capture timestamp in nanoseconds.
    pub timestamp_ns: i64,
    /// CPU-side pixels, for drivers that do not render into a GPU texture.
    pub buffer: Option<Bytes>,
}

impl TextureFrame {
    pub fn new(timestamp_ns: i64) -> Self {
        TextureFrame {
            transform_matrix: IDENTITY_MATRIX,
            timestamp_ns,
            buffer: None,
        }
    }
}

/// Producer side of a capture surface, handed to drivers.
#[derive(Debug, Clone)]
pub struct SurfaceTexture {
    texture_id: u32,
    frame_tx: mpsc::Sender<TextureFrame>,
}

impl SurfaceTexture {
    pub fn texture_id(&self) -> u32 {
        self.texture_id
    }

    /// Render a frame into the surface. Safe to call from any thread.
    ///
    /// Returns `false` when the frame was dropped, either because the capture
    /// thread is behind or because the surface is gone.
    pub fn push(&self, frame: TextureFrame) -> bool {
        match self.frame_tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!("surface {} frame dropped (capture thread behind)", self.texture_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// A render target plus the name of the serial context that consumes it.
///
/// The caller owns the surface. A capturer binds to it once, taking the
/// consumer end of its frame queue and running its capture thread under the
/// surface's thread name.
#[derive(Debug)]
pub struct CaptureSurface {
    thread_name: String,
    texture: SurfaceTexture,
    frame_rx: Option<mpsc::Receiver<TextureFrame>>,
}

impl CaptureSurface {
    pub fn new(thread_name: impl Into<String>, texture_id: u32) -> Self {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        CaptureSurface {
            thread_name: thread_name.into(),
            texture: SurfaceTexture {
                texture_id,
                frame_tx,
            },
            frame_rx: Some(frame_rx),
        }
    }

    pub fn from_config(config: &CaptureConfig, texture_id: u32) -> Self {
        Self::new(config.thread_name.clone(), texture_id)
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn texture_id(&self) -> u32 {
        self.texture.texture_id
    }

    /// A producer handle for the surface texture.
    pub fn texture(&self) -> SurfaceTexture {
        self.texture.clone()
    }

    /// Whether a capturer has already bound to this surface.
    pub fn is_bound(&self) -> bool {
        self.frame_rx.is_none()
    }

    pub(crate) fn take_frames(&mut self) -> Option<mpsc::Receiver<TextureFrame>> {
        self.frame_rx.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_drops_when_full() {
        let mut surface = CaptureSurface::new("test", 3);
        let texture = surface.texture();
        for i in 0..FRAME_QUEUE_DEPTH {
            assert!(texture.push(TextureFrame::new(i as i64)));
        }
        assert!(!texture.push(TextureFrame::new(99)));

        let mut frames = surface.take_frames().unwrap();
        assert_eq!(frames.try_recv().unwrap().timestamp_ns, 0);
    }

    #[test]
    fn test_frames_can_only_be_taken_once() {
        let mut surface = CaptureSurface::new("test", 1);
        assert!(!surface.is_bound());
        assert!(surface.take_frames().is_some());
        assert!(surface.is_bound());
        assert!(surface.take_frames().is_none());
    }

    #[test]
    fn test_push_after_consumer_dropped() {
        let mut surface = CaptureSurface::new("test", 1);
        let texture = surface.texture();
        drop(surface.take_frames());
        assert!(!texture.push(TextureFrame::new(0)));
    }
}
