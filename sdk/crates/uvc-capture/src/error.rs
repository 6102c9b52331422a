//! Error types for the capturer and camera drivers.

use thiserror::Error;

/// Errors returned while wiring up a capturer.
///
/// Only [`VideoCapturer::initialize`](crate::VideoCapturer::initialize) surfaces
/// these. Once the capture thread is running, failures are reported to the
/// observer as a failed start or absorbed into the lifecycle state.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Capturer is already initialized")]
    AlreadyInitialized,

    #[error("Capturer is not initialized")]
    NotInitialized,

    #[error("Capturer has been disposed")]
    Disposed,

    #[error("Surface is already bound to another capturer")]
    SurfaceInUse,

    #[error("Failed to start capture thread: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Errors raised by a [`CameraDriver`](crate::CameraDriver).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Failed to open device: {0}")]
    Open(String),

    #[error("Failed to configure device: {0}")]
    Configure(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Device is no longer available")]
    DeviceGone,

    #[error("Unsupported: {0}")]
    Unsupported(String),
}
