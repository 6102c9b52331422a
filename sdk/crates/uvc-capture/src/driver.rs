//! Camera driver contract.

use crate::device::DeviceHandle;
use crate::error::DriverError;
use crate::format::Size;
use crate::surface::SurfaceTexture;

/// Preview size a driver streams at when no explicit size is set.
pub const DEFAULT_PREVIEW_SIZE: Size = Size::new(640, 480);

/// A single camera driver instance.
///
/// Instances are created, used and destroyed on the capture thread only.
/// After [`start_preview`](CameraDriver::start_preview) the driver pushes
/// decoded frames into the bound [`SurfaceTexture`] until
/// [`stop_preview`](CameraDriver::stop_preview) returns.
pub trait CameraDriver: Send {
    fn open(&mut self, handle: &DeviceHandle) -> Result<(), DriverError>;

    /// Refresh cached control ranges after opening.
    fn update_camera_params(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn supported_sizes(&mut self) -> Result<Vec<Size>, DriverError>;

    fn set_preview_size(&mut self, size: Size) -> Result<(), DriverError>;

    /// Size used when [`set_preview_size`](CameraDriver::set_preview_size) is never called.
    fn default_preview_size(&self) -> Size {
        DEFAULT_PREVIEW_SIZE
    }

    fn set_brightness(&mut self, value: i32) -> Result<(), DriverError>;

    fn set_contrast(&mut self, value: i32) -> Result<(), DriverError>;

    fn set_preview_texture(&mut self, texture: SurfaceTexture) -> Result<(), DriverError>;

    fn start_preview(&mut self) -> Result<(), DriverError>;

    /// Stop streaming. No frames are pushed after this returns.
    fn stop_preview(&mut self);

    fn close(&mut self);

    /// Release every resource held by the instance.
    fn destroy(self: Box<Self>);
}

/// Creates a fresh driver instance for each capture session.
pub trait DriverFactory: Send + Sync {
    fn create(&self) -> Box<dyn CameraDriver>;
}

impl<F> DriverFactory for F
where
    F: Fn() -> Box<dyn CameraDriver> + Send + Sync,
{
    fn create(&self) -> Box<dyn CameraDriver> {
        self()
    }
}
