//! Webcam support through nokhwa.
//!
//! `nokhwa::Camera` is `!Send`, so [`WebcamDriver`] only probes the device
//! from the capture thread and streams from a dedicated decode thread that
//! owns the camera for the lifetime of a preview. [`QueryMonitor`] polls the
//! platform camera list to synthesize hot-plug events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, ControlValueSetter, FrameFormat, KnownCameraControl,
    RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use tokio_util::sync::CancellationToken;

use crate::device::{DeviceHandle, DeviceListener, UsbDevice, UsbMonitor};
use crate::driver::{CameraDriver, DriverFactory};
use crate::error::DriverError;
use crate::format::{self, Size};
use crate::surface::{SurfaceTexture, TextureFrame, IDENTITY_MATRIX};

/// Frame rate asked of the camera when streaming.
const STREAM_FPS: u32 = 30;

/// Granularity at which the poller checks for cancellation.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Enumerate cameras exposed by the platform backend.
pub fn list_devices() -> Result<Vec<UsbDevice>, DriverError> {
    let backend = nokhwa::native_api_backend()
        .ok_or_else(|| DriverError::Unsupported("no camera backend available".to_string()))?;
    let cameras = nokhwa::query(backend)
        .map_err(|e| DriverError::Open(format!("failed to query cameras: {e}")))?;

    Ok(cameras
        .into_iter()
        .filter_map(|info| match info.index() {
            CameraIndex::Index(i) => Some(UsbDevice::new(*i, 0, 0, info.human_name())),
            CameraIndex::String(_) => None,
        })
        .collect())
}

/// Driver factory producing [`WebcamDriver`]s.
pub fn webcam_factory() -> Arc<dyn DriverFactory> {
    Arc::new(|| Box::new(WebcamDriver::new()) as Box<dyn CameraDriver>)
}

#[derive(Debug, Clone, Copy, Default)]
struct Controls {
    brightness: Option<i32>,
    contrast: Option<i32>,
}

struct DecodeThread {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// A [`CameraDriver`] backed by the platform camera API.
#[derive(Default)]
pub struct WebcamDriver {
    index: Option<u32>,
    supported: Vec<Size>,
    preview_size: Option<Size>,
    controls: Controls,
    texture: Option<SurfaceTexture>,
    stream: Option<DecodeThread>,
}

impl WebcamDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn halt_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop.store(true, Ordering::SeqCst);
            if stream.thread.join().is_err() {
                tracing::error!("webcam decode thread panicked");
            }
        }
    }
}

impl CameraDriver for WebcamDriver {
    fn open(&mut self, handle: &DeviceHandle) -> Result<(), DriverError> {
        let index = handle.device().index;
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);
        let mut camera = Camera::new(CameraIndex::Index(index), requested)
            .map_err(|e| DriverError::Open(e.to_string()))?;

        let formats = camera
            .compatible_camera_formats()
            .map_err(|e| DriverError::Open(e.to_string()))?;
        let mut sizes: Vec<Size> = formats
            .iter()
            .map(|f| {
                let resolution = f.resolution();
                Size::new(resolution.width_x, resolution.height_y)
            })
            .collect();
        format::sort_sizes(&mut sizes);
        sizes.dedup();

        tracing::info!("webcam {} opened, {} sizes", handle.device(), sizes.len());
        self.index = Some(index);
        self.supported = sizes;
        Ok(())
    }

    fn supported_sizes(&mut self) -> Result<Vec<Size>, DriverError> {
        if self.index.is_none() {
            return Err(DriverError::DeviceGone);
        }
        Ok(self.supported.clone())
    }

    fn set_preview_size(&mut self, size: Size) -> Result<(), DriverError> {
        if !self.supported.contains(&size) {
            return Err(DriverError::Configure(format!("{size} not supported")));
        }
        self.preview_size = Some(size);
        Ok(())
    }

    fn set_brightness(&mut self, value: i32) -> Result<(), DriverError> {
        self.controls.brightness = Some(value);
        Ok(())
    }

    fn set_contrast(&mut self, value: i32) -> Result<(), DriverError> {
        self.controls.contrast = Some(value);
        Ok(())
    }

    fn set_preview_texture(&mut self, texture: SurfaceTexture) -> Result<(), DriverError> {
        self.texture = Some(texture);
        Ok(())
    }

    fn start_preview(&mut self) -> Result<(), DriverError> {
        let index = self.index.ok_or(DriverError::DeviceGone)?;
        let texture = self
            .texture
            .clone()
            .ok_or_else(|| DriverError::Stream("no preview texture".to_string()))?;
        let size = self.preview_size.unwrap_or_else(|| self.default_preview_size());
        let controls = self.controls;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let thread = std::thread::Builder::new()
            .name(format!("webcam-decode-{index}"))
            .spawn(move || run_decode_thread(index, size, controls, texture, thread_stop, ready_tx))
            .map_err(|e| DriverError::Stream(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(DriverError::Stream("decode thread exited".to_string())));
        match ready {
            Ok(()) => {
                self.stream = Some(DecodeThread { stop, thread });
                Ok(())
            }
            Err(e) => {
                let _ = thread.join();
                Err(e)
            }
        }
    }

    fn stop_preview(&mut self) {
        self.halt_stream();
    }

    fn close(&mut self) {
        self.halt_stream();
        self.index = None;
    }

    fn destroy(mut self: Box<Self>) {
        self.halt_stream();
        self.texture = None;
    }
}

fn apply_control(camera: &mut Camera, control: KnownCameraControl, value: Option<i32>) {
    let Some(value) = value else { return };
    if let Err(e) = camera.set_camera_control(control, ControlValueSetter::Integer(i64::from(value))) {
        tracing::warn!("webcam control {:?} not applied: {}", control, e);
    }
}

fn run_decode_thread(
    index: u32,
    size: Size,
    controls: Controls,
    texture: SurfaceTexture,
    stop: Arc<AtomicBool>,
    ready: std_mpsc::SyncSender<Result<(), DriverError>>,
) {
    let format = CameraFormat::new(
        Resolution::new(size.width, size.height),
        FrameFormat::MJPEG,
        STREAM_FPS,
    );
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));
    let mut camera = match Camera::new(CameraIndex::Index(index), requested) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready.send(Err(DriverError::Open(e.to_string())));
            return;
        }
    };

    apply_control(&mut camera, KnownCameraControl::Brightness, controls.brightness);
    apply_control(&mut camera, KnownCameraControl::Contrast, controls.contrast);

    if let Err(e) = camera.open_stream() {
        let _ = ready.send(Err(DriverError::Stream(e.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));
    tracing::debug!("webcam {} streaming at {}", index, size);

    let started = Instant::now();
    while !stop.load(Ordering::SeqCst) {
        match camera.frame() {
            Ok(buffer) => match buffer.decode_image::<RgbFormat>() {
                Ok(decoded) => {
                    texture.push(TextureFrame {
                        transform_matrix: IDENTITY_MATRIX,
                        timestamp_ns: started.elapsed().as_nanos() as i64,
                        buffer: Some(Bytes::from(decoded.into_raw())),
                    });
                }
                Err(e) => tracing::warn!("failed to decode webcam frame: {}", e),
            },
            Err(e) => {
                tracing::warn!("failed to capture webcam frame: {}", e);
                std::thread::sleep(POLL_SLICE);
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("error stopping webcam stream: {}", e);
    }
    tracing::debug!("webcam {} decode thread exiting", index);
}

#[derive(Default)]
struct QueryState {
    listener: Option<Arc<dyn DeviceListener>>,
    present: HashMap<u32, UsbDevice>,
    connected: HashMap<u32, DeviceHandle>,
}

enum Notification {
    Attach(UsbDevice),
    Detach(UsbDevice),
    Disconnect(DeviceHandle),
}

/// A [`UsbMonitor`] that polls the platform camera list.
///
/// Desktop platforms have no per-device permission prompt, so permission
/// requests are granted on the spot.
pub struct QueryMonitor {
    interval: Duration,
    state: Arc<Mutex<QueryState>>,
    poller: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    next_raw: AtomicU64,
}

impl QueryMonitor {
    pub fn new(interval: Duration) -> Self {
        QueryMonitor {
            interval,
            state: Arc::new(Mutex::new(QueryState::default())),
            poller: Mutex::new(None),
            next_raw: AtomicU64::new(1),
        }
    }
}

fn poll_once(state: &Mutex<QueryState>) {
    let devices = match list_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::debug!("camera query failed: {}", e);
            return;
        }
    };

    let (listener, notifications) = {
        let mut st = state.lock().unwrap_or_else(|e| e.into_inner());
        let current: HashMap<u32, UsbDevice> =
            devices.into_iter().map(|d| (d.index, d)).collect();

        let mut notifications = Vec::new();
        for (index, device) in &st.present {
            if !current.contains_key(index) {
                notifications.push(Notification::Detach(device.clone()));
            }
        }
        for (index, device) in &current {
            if !st.present.contains_key(index) {
                notifications.push(Notification::Attach(device.clone()));
            }
        }
        for notification in notifications.iter_mut() {
            if let Notification::Detach(device) = notification {
                if let Some(handle) = st.connected.remove(&device.index) {
                    *notification = Notification::Disconnect(handle);
                }
            }
        }
        st.present = current;
        (st.listener.clone(), notifications)
    };

    let Some(listener) = listener else { return };
    for notification in notifications {
        match notification {
            Notification::Attach(device) => listener.on_attach(&device),
            Notification::Detach(device) => listener.on_detach(&device),
            Notification::Disconnect(handle) => listener.on_disconnect(handle.device(), &handle),
        }
    }
}

impl UsbMonitor for QueryMonitor {
    fn register(&self, listener: Arc<dyn DeviceListener>) {
        {
            let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
            *st = QueryState {
                listener: Some(listener),
                ..QueryState::default()
            };
        }

        let mut poller = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        if poller.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let thread_cancel = cancel.clone();
        let state = Arc::clone(&self.state);
        let interval = self.interval;
        let spawned = std::thread::Builder::new()
            .name("uvc-monitor".to_string())
            .spawn(move || {
                while !thread_cancel.is_cancelled() {
                    poll_once(&state);
                    let deadline = Instant::now() + interval;
                    while Instant::now() < deadline && !thread_cancel.is_cancelled() {
                        std::thread::sleep(POLL_SLICE);
                    }
                }
            });
        match spawned {
            Ok(handle) => *poller = Some((cancel, handle)),
            Err(e) => tracing::error!("failed to start camera monitor: {}", e),
        }
    }

    fn unregister(&self) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listener = None;

        let poller = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some((cancel, handle)) = poller {
            cancel.cancel();
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn request_permission(&self, device: &UsbDevice) {
        let handle = DeviceHandle::new(device.clone(), self.next_raw.fetch_add(1, Ordering::Relaxed));
        let listener = {
            let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
            st.connected.insert(device.index, handle.clone());
            st.listener.clone()
        };
        if let Some(listener) = listener {
            listener.on_connect(device, handle, true);
        }
    }
}

impl Drop for QueryMonitor {
    fn drop(&mut self) {
        self.unregister();
    }
}
