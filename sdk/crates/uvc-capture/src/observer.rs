use bytes::Bytes;

/// A frame forwarded to the observer.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Negotiated preview width.
    pub width: u32,
    /// Negotiated preview height.
    pub height: u32,
    pub texture_id: u32,
    pub transform_matrix: [f32; 16],
    /// Rotation in degrees. Always 0 for USB cameras.
    pub rotation: i32,
    pub timestamp_ns: i64,
    /// CPU-side pixels, when the driver produced them.
    pub buffer: Option<Bytes>,
}

/// Downstream consumer of a capturer (the video pipeline sink).
///
/// Both callbacks run on the capture thread.
pub trait CapturerObserver: Send + Sync {
    /// Reported once per start attempt, before any frame of that session.
    fn on_capturer_started(&self, success: bool);

    fn on_texture_frame_captured(&self, frame: CapturedFrame);
}
