//! In-memory monitor and driver.
//!
//! Useful for exercising a capturer without hardware: the monitor lets the
//! caller play the role of the OS (attach, grant, deny, unplug) and the
//! driver records every call and pumps synthetic frames while previewing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::device::{DeviceHandle, DeviceListener, UsbDevice, UsbMonitor};
use crate::driver::{CameraDriver, DriverFactory};
use crate::error::DriverError;
use crate::format::Size;
use crate::surface::{SurfaceTexture, TextureFrame};

#[derive(Default)]
struct MonitorState {
    listener: Option<Arc<dyn DeviceListener>>,
    register_count: usize,
    unregister_count: usize,
    permission_requests: Vec<UsbDevice>,
}

/// A [`UsbMonitor`] driven by hand.
///
/// Notifications are delivered synchronously on the calling thread, which
/// stands in for the monitor's notification thread.
pub struct FakeMonitor {
    state: Mutex<MonitorState>,
    auto_grant: bool,
    next_raw: AtomicU64,
}

impl FakeMonitor {
    pub fn new() -> Self {
        FakeMonitor {
            state: Mutex::new(MonitorState::default()),
            auto_grant: false,
            next_raw: AtomicU64::new(1),
        }
    }

    /// A monitor that grants every permission request immediately.
    pub fn auto_granting() -> Self {
        FakeMonitor {
            auto_grant: true,
            ..Self::new()
        }
    }

    fn listener(&self) -> Option<Arc<dyn DeviceListener>> {
        self.state.lock().unwrap().listener.clone()
    }

    /// Plug in a device.
    pub fn attach(&self, device: &UsbDevice) {
        if let Some(listener) = self.listener() {
            listener.on_attach(device);
        }
    }

    /// Unplug a device that was never granted.
    pub fn detach(&self, device: &UsbDevice) {
        if let Some(listener) = self.listener() {
            listener.on_detach(device);
        }
    }

    /// Grant access to a device, returning the handle passed to the listener.
    pub fn grant(&self, device: &UsbDevice) -> DeviceHandle {
        let handle = DeviceHandle::new(device.clone(), self.next_raw.fetch_add(1, Ordering::Relaxed));
        if let Some(listener) = self.listener() {
            listener.on_connect(device, handle.clone(), true);
        }
        handle
    }

    /// Deny a pending permission request.
    pub fn deny(&self, device: &UsbDevice) {
        if let Some(listener) = self.listener() {
            listener.on_cancel(device);
        }
    }

    /// Unplug a device with a live handle.
    pub fn disconnect(&self, handle: &DeviceHandle) {
        if let Some(listener) = self.listener() {
            listener.on_disconnect(handle.device(), handle);
        }
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().unwrap().listener.is_some()
    }

    pub fn register_count(&self) -> usize {
        self.state.lock().unwrap().register_count
    }

    pub fn unregister_count(&self) -> usize {
        self.state.lock().unwrap().unregister_count
    }

    pub fn permission_requests(&self) -> Vec<UsbDevice> {
        self.state.lock().unwrap().permission_requests.clone()
    }
}

impl Default for FakeMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbMonitor for FakeMonitor {
    fn register(&self, listener: Arc<dyn DeviceListener>) {
        let mut state = self.state.lock().unwrap();
        state.listener = Some(listener);
        state.register_count += 1;
    }

    fn unregister(&self) {
        let mut state = self.state.lock().unwrap();
        state.listener = None;
        state.unregister_count += 1;
    }

    fn request_permission(&self, device: &UsbDevice) {
        self.state
            .lock()
            .unwrap()
            .permission_requests
            .push(device.clone());
        if self.auto_grant {
            self.grant(device);
        }
    }
}

/// A call made on a [`FakeDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Open(u64),
    UpdateParams,
    SupportedSizes,
    SetPreviewSize(Size),
    SetBrightness(i32),
    SetContrast(i32),
    SetPreviewTexture(u32),
    StartPreview,
    StopPreview,
    Close,
    Destroy,
}

#[derive(Debug)]
struct DriverBehavior {
    supported_sizes: Vec<Size>,
    frame_interval: Duration,
    fail_open: AtomicBool,
    fail_start_preview: AtomicBool,
    unsupported_controls: AtomicBool,
}

/// Creates [`FakeDriver`]s sharing one call log and one set of behaviors.
pub struct FakeDriverFactory {
    behavior: Arc<DriverBehavior>,
    calls: Arc<Mutex<Vec<DriverCall>>>,
    created: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl FakeDriverFactory {
    pub fn new(supported_sizes: Vec<Size>) -> Self {
        FakeDriverFactory {
            behavior: Arc::new(DriverBehavior {
                supported_sizes,
                frame_interval: Duration::from_millis(5),
                fail_open: AtomicBool::new(false),
                fail_start_preview: AtomicBool::new(false),
                unsupported_controls: AtomicBool::new(false),
            }),
            calls: Arc::new(Mutex::new(Vec::new())),
            created: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make subsequent `open` calls fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.behavior.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `start_preview` calls fail.
    pub fn set_fail_start_preview(&self, fail: bool) {
        self.behavior.fail_start_preview.store(fail, Ordering::SeqCst);
    }

    /// Reject brightness and contrast, like cameras without those controls.
    pub fn set_unsupported_controls(&self, unsupported: bool) {
        self.behavior
            .unsupported_controls
            .store(unsupported, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of driver instances created so far.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of created instances not yet destroyed.
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl DriverFactory for FakeDriverFactory {
    fn create(&self) -> Box<dyn CameraDriver> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeDriver {
            behavior: Arc::clone(&self.behavior),
            calls: Arc::clone(&self.calls),
            live: Arc::clone(&self.live),
            opened: false,
            texture: None,
            pump: None,
        })
    }
}

struct FramePump {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// A driver that produces synthetic frames from its own thread.
pub struct FakeDriver {
    behavior: Arc<DriverBehavior>,
    calls: Arc<Mutex<Vec<DriverCall>>>,
    live: Arc<AtomicUsize>,
    opened: bool,
    texture: Option<SurfaceTexture>,
    pump: Option<FramePump>,
}

impl FakeDriver {
    fn record(&self, call: DriverCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn halt_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.stop.store(true, Ordering::SeqCst);
            let _ = pump.thread.join();
        }
    }

    fn controls_supported(&self) -> Result<(), DriverError> {
        if self.behavior.unsupported_controls.load(Ordering::SeqCst) {
            Err(DriverError::Unsupported("control not available".to_string()))
        } else {
            Ok(())
        }
    }
}

impl CameraDriver for FakeDriver {
    fn open(&mut self, handle: &DeviceHandle) -> Result<(), DriverError> {
        self.record(DriverCall::Open(handle.raw()));
        if self.behavior.fail_open.load(Ordering::SeqCst) {
            return Err(DriverError::Open(format!("cannot open {}", handle.device())));
        }
        self.opened = true;
        Ok(())
    }

    fn update_camera_params(&mut self) -> Result<(), DriverError> {
        self.record(DriverCall::UpdateParams);
        Ok(())
    }

    fn supported_sizes(&mut self) -> Result<Vec<Size>, DriverError> {
        self.record(DriverCall::SupportedSizes);
        Ok(self.behavior.supported_sizes.clone())
    }

    fn set_preview_size(&mut self, size: Size) -> Result<(), DriverError> {
        self.record(DriverCall::SetPreviewSize(size));
        let supported: HashSet<Size> = self.behavior.supported_sizes.iter().copied().collect();
        if supported.contains(&size) {
            Ok(())
        } else {
            Err(DriverError::Configure(format!("{} not supported", size)))
        }
    }

    fn set_brightness(&mut self, value: i32) -> Result<(), DriverError> {
        self.record(DriverCall::SetBrightness(value));
        self.controls_supported()
    }

    fn set_contrast(&mut self, value: i32) -> Result<(), DriverError> {
        self.record(DriverCall::SetContrast(value));
        self.controls_supported()
    }

    fn set_preview_texture(&mut self, texture: SurfaceTexture) -> Result<(), DriverError> {
        self.record(DriverCall::SetPreviewTexture(texture.texture_id()));
        self.texture = Some(texture);
        Ok(())
    }

    fn start_preview(&mut self) -> Result<(), DriverError> {
        self.record(DriverCall::StartPreview);
        if !self.opened {
            return Err(DriverError::Stream("device not open".to_string()));
        }
        if self.behavior.fail_start_preview.load(Ordering::SeqCst) {
            return Err(DriverError::Stream("preview refused".to_string()));
        }
        let texture = self
            .texture
            .clone()
            .ok_or_else(|| DriverError::Stream("no preview texture".to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let pump_stop = Arc::clone(&stop);
        let interval = self.behavior.frame_interval;
        let thread = std::thread::Builder::new()
            .name("fake-uvc-decoder".to_string())
            .spawn(move || {
                let started = Instant::now();
                while !pump_stop.load(Ordering::SeqCst) {
                    let timestamp_ns = started.elapsed().as_nanos() as i64;
                    texture.push(TextureFrame::new(timestamp_ns));
                    std::thread::sleep(interval);
                }
            })
            .map_err(|e| DriverError::Stream(e.to_string()))?;

        self.pump = Some(FramePump { stop, thread });
        Ok(())
    }

    fn stop_preview(&mut self) {
        self.record(DriverCall::StopPreview);
        self.halt_pump();
    }

    fn close(&mut self) {
        self.record(DriverCall::Close);
        self.opened = false;
    }

    fn destroy(mut self: Box<Self>) {
        self.halt_pump();
        self.texture = None;
        self.record(DriverCall::Destroy);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for FakeDriver {
    fn drop(&mut self) {
        self.halt_pump();
    }
}
