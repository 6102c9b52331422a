//! USB camera capture lifecycle.
//!
//! A [`UvcCameraCapturer`] turns hot-pluggable USB cameras into a stream of
//! texture frames for a video pipeline. Two inputs drive it: the pipeline
//! asking for frames ([`VideoCapturer::start_capture`]) and the
//! [`UsbMonitor`] reporting a permitted device. A driver session is open
//! exactly while both hold, whichever arrives first.
//!
//! All capture state and every driver call live on a single capture thread.
//! Public calls and monitor notifications only post commands to it.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use uvc_capture::{CaptureConfig, CaptureSurface, UvcCameraCapturer, VideoCapturer};
//!
//! let config = CaptureConfig::default();
//! let mut surface = CaptureSurface::from_config(&config, texture_id);
//! let mut capturer = UvcCameraCapturer::new(config, monitor, driver_factory);
//! capturer.initialize(&mut surface, &observer)?;
//! capturer.start_capture(640, 480, 30);
//! // ... frames arrive on observer.on_texture_frame_captured
//! capturer.dispose();
//! ```

mod capturer;
mod config;
mod device;
mod driver;
mod error;
pub mod fake;
mod format;
mod observer;
mod state;
mod surface;
mod watcher;

#[cfg(feature = "webcam")]
pub mod webcam;

pub use capturer::{UvcCameraCapturer, VideoCapturer};
pub use config::{CaptureConfig, DEFAULT_THREAD_NAME};
pub use device::{DeviceHandle, DeviceListener, UsbDevice, UsbMonitor};
pub use driver::{CameraDriver, DriverFactory, DEFAULT_PREVIEW_SIZE};
pub use error::{CaptureError, DriverError};
pub use format::{compare_sizes, select_preview_size, sort_sizes, Size};
pub use observer::{CapturedFrame, CapturerObserver};
pub use state::{CaptureRequest, CaptureState};
pub use surface::{CaptureSurface, SurfaceTexture, TextureFrame, IDENTITY_MATRIX};
