//! Public capturer handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::CaptureConfig;
use crate::device::UsbMonitor;
use crate::driver::DriverFactory;
use crate::error::CaptureError;
use crate::observer::CapturerObserver;
use crate::state::{self, CaptureCommand, CaptureContext, CaptureMachine, CaptureRequest, CaptureState};
use crate::surface::CaptureSurface;
use crate::watcher::DeviceWatcher;

/// Operations a video pipeline drives on a capture source.
pub trait VideoCapturer {
    /// Bind the capturer to a surface and an observer. Must be called once,
    /// before [`start_capture`](VideoCapturer::start_capture).
    fn initialize(
        &mut self,
        surface: &mut CaptureSurface,
        observer: &Arc<dyn CapturerObserver>,
    ) -> Result<(), CaptureError>;

    /// Ask for frames. The outcome is reported to the observer.
    fn start_capture(&self, width: u32, height: u32, framerate: u32);

    fn stop_capture(&self);

    fn change_capture_format(&self, width: u32, height: u32, framerate: u32);

    /// Stop capturing and release the device monitor. Terminal.
    fn dispose(&self);

    fn is_screencast(&self) -> bool;
}

/// Capturer for USB (UVC) cameras that may come and go at any time.
///
/// Every public method only posts work to the capture thread and returns
/// immediately. Streaming starts once capture has been requested and the
/// monitor has delivered a permitted device, in either order.
pub struct UvcCameraCapturer {
    config: CaptureConfig,
    monitor: Arc<dyn UsbMonitor>,
    factory: Arc<dyn DriverFactory>,
    cmd_tx: Option<mpsc::UnboundedSender<CaptureCommand>>,
    cancel: CancellationToken,
    thread: Option<std::thread::JoinHandle<()>>,
    state_tx: Option<watch::Sender<CaptureState>>,
    state_rx: watch::Receiver<CaptureState>,
    disposed: AtomicBool,
}

impl UvcCameraCapturer {
    pub fn new(
        config: CaptureConfig,
        monitor: Arc<dyn UsbMonitor>,
        factory: Arc<dyn DriverFactory>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(CaptureState::Idle);
        UvcCameraCapturer {
            config,
            monitor,
            factory,
            cmd_tx: None,
            cancel: CancellationToken::new(),
            thread: None,
            state_tx: Some(state_tx),
            state_rx,
            disposed: AtomicBool::new(false),
        }
    }

    /// Latest state published by the capture thread.
    pub fn state(&self) -> CaptureState {
        *self.state_rx.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<CaptureState> {
        self.state_rx.clone()
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn send_cmd(&self, cmd: CaptureCommand) {
        if self.is_disposed() {
            tracing::warn!("capturer is disposed, ignoring {:?}", cmd);
            return;
        }
        self.post(cmd);
    }

    fn post(&self, cmd: CaptureCommand) {
        match &self.cmd_tx {
            Some(tx) => {
                if tx.send(cmd).is_err() {
                    tracing::warn!("capture thread is not running");
                }
            }
            None => tracing::warn!("capturer not initialized, ignoring {:?}", cmd),
        }
    }
}

impl VideoCapturer for UvcCameraCapturer {
    fn initialize(
        &mut self,
        surface: &mut CaptureSurface,
        observer: &Arc<dyn CapturerObserver>,
    ) -> Result<(), CaptureError> {
        tracing::debug!("initialize on surface {}", surface.texture_id());

        if self.is_disposed() {
            return Err(CaptureError::Disposed);
        }
        if self.cmd_tx.is_some() {
            return Err(CaptureError::AlreadyInitialized);
        }
        let frames = surface.take_frames().ok_or(CaptureError::SurfaceInUse)?;
        let state_tx = self.state_tx.take().ok_or(CaptureError::AlreadyInitialized)?;

        let machine = CaptureMachine::new(CaptureContext {
            config: self.config.clone(),
            factory: Arc::clone(&self.factory),
            observer: Arc::downgrade(observer),
            texture: surface.texture(),
            frames,
            state_tx,
        });

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancel = self.cancel.clone();

        let handle = std::thread::Builder::new()
            .name(surface.thread_name().to_string())
            .spawn(move || {
                runtime.block_on(state::run_capture_loop(machine, cmd_rx, cancel));
            })?;

        self.thread = Some(handle);
        self.cmd_tx = Some(cmd_tx.clone());

        let watcher = DeviceWatcher::new(cmd_tx, Arc::downgrade(&self.monitor));
        self.monitor.register(Arc::new(watcher));
        Ok(())
    }

    fn start_capture(&self, width: u32, height: u32, framerate: u32) {
        tracing::debug!("start capture {}x{}@{}", width, height, framerate);
        self.send_cmd(CaptureCommand::Start(CaptureRequest {
            width,
            height,
            framerate,
        }));
    }

    fn stop_capture(&self) {
        tracing::debug!("stop capture");
        self.send_cmd(CaptureCommand::Stop);
    }

    fn change_capture_format(&self, width: u32, height: u32, framerate: u32) {
        // Renegotiating a running stream is not supported.
        tracing::debug!(
            "format change to {}x{}@{} ignored",
            width,
            height,
            framerate
        );
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("dispose");

        if self.cmd_tx.is_some() {
            self.post(CaptureCommand::Stop);
            self.post(CaptureCommand::Shutdown);
            self.monitor.unregister();
        } else if let Some(state_tx) = &self.state_tx {
            // Never initialized: there is no capture thread to publish for us.
            state_tx.send_replace(CaptureState::Disposed);
        }
    }

    fn is_screencast(&self) -> bool {
        false
    }
}

impl Drop for UvcCameraCapturer {
    fn drop(&mut self) {
        self.dispose();
        self.cancel.cancel();
        self.cmd_tx = None;
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("capture thread panicked");
            }
        }
    }
}
