//! Capture state machine. Everything in here runs on the capture thread.
//!
//! The loop owns the capture intent, the device handle and the driver
//! session outright; other threads only reach it through [`CaptureCommand`]s.
//! A session exists exactly while both an intent and a handle are held.

use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::CaptureConfig;
use crate::device::{DeviceHandle, UsbDevice};
use crate::driver::{CameraDriver, DriverFactory};
use crate::error::DriverError;
use crate::format::{self, Size};
use crate::observer::{CapturedFrame, CapturerObserver};
use crate::surface::{SurfaceTexture, TextureFrame};

/// Resolution and frame rate asked for by `start_capture`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

impl CaptureRequest {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Observable lifecycle state of a capturer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No capture requested.
    Idle,
    /// Capture requested, no usable device yet.
    AwaitingDevice,
    /// A driver session is open and frames are flowing.
    Streaming,
    /// Terminal.
    Disposed,
}

/// Work posted to the capture thread.
#[derive(Debug)]
pub(crate) enum CaptureCommand {
    Start(CaptureRequest),
    Stop,
    DeviceConnected { handle: DeviceHandle, is_new: bool },
    DeviceDisconnected { device: UsbDevice },
    Shutdown,
}

/// Collaborators the capture thread needs, bound at initialization.
pub(crate) struct CaptureContext {
    pub(crate) config: CaptureConfig,
    pub(crate) factory: Arc<dyn DriverFactory>,
    pub(crate) observer: Weak<dyn CapturerObserver>,
    pub(crate) texture: SurfaceTexture,
    pub(crate) frames: mpsc::Receiver<TextureFrame>,
    pub(crate) state_tx: watch::Sender<CaptureState>,
}

/// An open, streaming driver instance.
struct CameraSession {
    driver: Box<dyn CameraDriver>,
    preview_size: Size,
}

/// Binding from the surface to the observer for one session.
pub(crate) struct FrameDelivery {
    capture_thread: ThreadId,
    texture_id: u32,
    size: Size,
}

impl FrameDelivery {
    /// Bind delivery to the calling thread.
    pub(crate) fn new(texture_id: u32, size: Size) -> Self {
        FrameDelivery {
            capture_thread: thread::current().id(),
            texture_id,
            size,
        }
    }

    /// Forward one frame to the observer.
    ///
    /// # Panics
    ///
    /// Panics when called from any thread other than the one that created
    /// this binding.
    pub(crate) fn deliver(&self, frame: TextureFrame, observer: &dyn CapturerObserver) {
        self.check_is_on_capture_thread();

        observer.on_texture_frame_captured(CapturedFrame {
            width: self.size.width,
            height: self.size.height,
            texture_id: self.texture_id,
            transform_matrix: frame.transform_matrix,
            rotation: 0,
            timestamp_ns: frame.timestamp_ns,
            buffer: frame.buffer,
        });
    }

    fn check_is_on_capture_thread(&self) {
        let current = thread::current();
        assert!(
            current.id() == self.capture_thread,
            "frame delivered on wrong thread {:?} ({:?}), expected capture thread {:?}",
            current.name(),
            current.id(),
            self.capture_thread
        );
    }
}

pub(crate) struct CaptureMachine {
    config: CaptureConfig,
    factory: Arc<dyn DriverFactory>,
    observer: Weak<dyn CapturerObserver>,
    texture: SurfaceTexture,
    frames: mpsc::Receiver<TextureFrame>,
    state_tx: watch::Sender<CaptureState>,

    intent: Option<CaptureRequest>,
    handle: Option<DeviceHandle>,
    session: Option<CameraSession>,
    delivery: Option<FrameDelivery>,
}

impl CaptureMachine {
    pub(crate) fn new(ctx: CaptureContext) -> Self {
        CaptureMachine {
            config: ctx.config,
            factory: ctx.factory,
            observer: ctx.observer,
            texture: ctx.texture,
            frames: ctx.frames,
            state_tx: ctx.state_tx,
            intent: None,
            handle: None,
            session: None,
            delivery: None,
        }
    }

    fn handle_command(&mut self, cmd: CaptureCommand) -> ControlFlow<()> {
        match cmd {
            CaptureCommand::Start(request) => {
                self.intent = Some(request);
                self.try_start_capture();
            }
            CaptureCommand::Stop => {
                self.intent = None;
                self.stop_capture();
            }
            CaptureCommand::DeviceConnected { handle, is_new } => {
                if self.session.is_some() {
                    tracing::warn!(
                        "ignoring {} while streaming from another device",
                        handle.device()
                    );
                } else {
                    tracing::debug!("device handle ready: {} (new={})", handle.device(), is_new);
                    self.handle = Some(handle);
                    self.try_start_capture();
                }
            }
            CaptureCommand::DeviceDisconnected { device } => {
                let in_use = self
                    .handle
                    .as_ref()
                    .is_some_and(|handle| *handle.device() == device);
                if in_use {
                    self.stop_capture();
                    self.handle = None;
                    tracing::info!("device {} disconnected", device);
                } else {
                    tracing::debug!("ignoring disconnect of unused device {}", device);
                }
            }
            CaptureCommand::Shutdown => {
                self.shutdown();
                return ControlFlow::Break(());
            }
        }
        self.publish_state();
        ControlFlow::Continue(())
    }

    /// Open a session if, and only if, capture is wanted and a device is ready.
    fn try_start_capture(&mut self) {
        tracing::debug!(
            "transition check: intent={:?}, handle={:?}",
            self.intent,
            self.handle.as_ref().map(|h| h.device().to_string())
        );

        let (Some(request), Some(handle)) = (self.intent, self.handle.clone()) else {
            return;
        };
        if self.session.is_some() {
            tracing::debug!("capture already running, keeping current session");
            return;
        }

        let mut driver = self.factory.create();
        match self.open_session(driver.as_mut(), &handle, request) {
            Ok(preview_size) => {
                tracing::info!(
                    "capture started on {} at {} (requested {}@{})",
                    handle.device(),
                    preview_size,
                    request.size(),
                    request.framerate
                );
                self.session = Some(CameraSession {
                    driver,
                    preview_size,
                });
                self.notify_started(true);
                self.delivery = Some(FrameDelivery::new(self.texture.texture_id(), preview_size));
            }
            Err(e) => {
                tracing::error!("failed to start capture on {}: {}", handle.device(), e);
                driver.close();
                driver.destroy();
                self.notify_started(false);
            }
        }
    }

    fn open_session(
        &mut self,
        driver: &mut dyn CameraDriver,
        handle: &DeviceHandle,
        request: CaptureRequest,
    ) -> Result<Size, DriverError> {
        driver.open(handle)?;
        let preview_size = self.set_preview_params(driver, request)?;

        // Anything still queued belongs to a previous session.
        while self.frames.try_recv().is_ok() {}

        driver.set_preview_texture(self.texture.clone())?;
        driver.start_preview()?;
        Ok(preview_size)
    }

    fn set_preview_params(
        &self,
        driver: &mut dyn CameraDriver,
        request: CaptureRequest,
    ) -> Result<Size, DriverError> {
        driver.update_camera_params()?;

        if let Err(e) = driver.set_brightness(self.config.brightness) {
            tracing::warn!("brightness not applied: {}", e);
        }
        if let Err(e) = driver.set_contrast(self.config.contrast) {
            tracing::warn!("contrast not applied: {}", e);
        }

        let supported = driver.supported_sizes()?;
        match format::select_preview_size(&supported, request.size()) {
            Some(size) => {
                driver.set_preview_size(size)?;
                Ok(size)
            }
            None => {
                let fallback = driver.default_preview_size();
                tracing::debug!(
                    "no supported size covers {}, using default {}",
                    request.size(),
                    fallback
                );
                Ok(fallback)
            }
        }
    }

    /// Tear down the session, if any. Frame delivery stops before the driver
    /// is touched.
    fn stop_capture(&mut self) {
        self.delivery = None;

        if let Some(mut session) = self.session.take() {
            session.driver.stop_preview();
            session.driver.close();
            session.driver.destroy();
            tracing::info!("capture stopped ({} session torn down)", session.preview_size);
        }
    }

    fn shutdown(&mut self) {
        self.intent = None;
        self.stop_capture();
        self.handle = None;
        self.state_tx.send_replace(CaptureState::Disposed);
        tracing::info!("capture thread disposed");
    }

    fn on_frame(&self, frame: TextureFrame) {
        let Some(delivery) = &self.delivery else {
            tracing::trace!("dropping frame at {}ns, not listening", frame.timestamp_ns);
            return;
        };
        if let Some(observer) = self.observer.upgrade() {
            delivery.deliver(frame, observer.as_ref());
        }
    }

    fn notify_started(&self, success: bool) {
        match self.observer.upgrade() {
            Some(observer) => observer.on_capturer_started(success),
            None => tracing::debug!("observer dropped, start result {} not reported", success),
        }
    }

    fn current_state(&self) -> CaptureState {
        if self.session.is_some() {
            CaptureState::Streaming
        } else if self.intent.is_some() {
            CaptureState::AwaitingDevice
        } else {
            CaptureState::Idle
        }
    }

    fn publish_state(&self) {
        let next = self.current_state();
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                tracing::debug!("capture state {:?} -> {:?}", state, next);
                *state = next;
                true
            }
        });
    }
}

/// Main capture loop. Processes commands and surface frames in arrival
/// order until shut down.
pub(crate) async fn run_capture_loop(
    mut machine: CaptureMachine,
    mut cmd_rx: mpsc::UnboundedReceiver<CaptureCommand>,
    cancel: CancellationToken,
) {
    tracing::debug!("capture loop running on {:?}", thread::current().name());

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Capture loop cancelled");
                machine.shutdown();
                break;
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    None => {
                        machine.shutdown();
                        break;
                    }
                    Some(cmd) => {
                        if machine.handle_command(cmd).is_break() {
                            break;
                        }
                    }
                }
            }
            Some(frame) = machine.frames.recv() => {
                machine.on_frame(frame);
            }
        }
    }
}
