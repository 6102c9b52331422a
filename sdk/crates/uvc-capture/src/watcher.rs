//! Adapter between the USB monitor's notifications and the capture thread.

use std::sync::Weak;

use tokio::sync::mpsc;

use crate::device::{DeviceHandle, DeviceListener, UsbDevice, UsbMonitor};
use crate::state::CaptureCommand;

/// Turns monitor notifications into capture commands.
///
/// Runs on the monitor's notification thread and never touches capture
/// state or the camera directly: connect and disconnect are posted to the
/// capture thread, attach only asks the monitor for permission.
pub(crate) struct DeviceWatcher {
    cmd_tx: mpsc::UnboundedSender<CaptureCommand>,
    monitor: Weak<dyn UsbMonitor>,
}

impl DeviceWatcher {
    pub(crate) fn new(
        cmd_tx: mpsc::UnboundedSender<CaptureCommand>,
        monitor: Weak<dyn UsbMonitor>,
    ) -> Self {
        DeviceWatcher { cmd_tx, monitor }
    }

    fn post(&self, cmd: CaptureCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::debug!("capture thread gone, dropping device event");
        }
    }
}

impl DeviceListener for DeviceWatcher {
    fn on_attach(&self, device: &UsbDevice) {
        tracing::debug!("device attached: {}", device);
        match self.monitor.upgrade() {
            Some(monitor) => monitor.request_permission(device),
            None => tracing::debug!("monitor released, not requesting permission"),
        }
    }

    fn on_detach(&self, device: &UsbDevice) {
        tracing::debug!("device detached: {}", device);
    }

    fn on_connect(&self, device: &UsbDevice, handle: DeviceHandle, is_new: bool) {
        tracing::debug!("device connected: {}", device);
        self.post(CaptureCommand::DeviceConnected { handle, is_new });
    }

    fn on_disconnect(&self, device: &UsbDevice, _handle: &DeviceHandle) {
        tracing::debug!("device disconnected: {}", device);
        self.post(CaptureCommand::DeviceDisconnected {
            device: device.clone(),
        });
    }

    fn on_cancel(&self, device: &UsbDevice) {
        tracing::debug!("permission cancelled: {}", device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeMonitor;
    use std::sync::Arc;

    fn camera() -> UsbDevice {
        UsbDevice::new(0, 0x046d, 0x0825, "Webcam C270")
    }

    fn watcher() -> (
        DeviceWatcher,
        Arc<FakeMonitor>,
        mpsc::UnboundedReceiver<CaptureCommand>,
    ) {
        let monitor = Arc::new(FakeMonitor::new());
        let dyn_monitor: Arc<dyn UsbMonitor> = monitor.clone();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let watcher = DeviceWatcher::new(cmd_tx, Arc::downgrade(&dyn_monitor));
        (watcher, monitor, cmd_rx)
    }

    #[test]
    fn test_attach_requests_permission_only() {
        let (watcher, monitor, mut cmd_rx) = watcher();
        watcher.on_attach(&camera());
        assert_eq!(monitor.permission_requests(), vec![camera()]);
        assert!(cmd_rx.try_recv().is_err());
    }

    #[test]
    fn test_connect_and_disconnect_are_posted() {
        let (watcher, _monitor, mut cmd_rx) = watcher();
        let handle = DeviceHandle::new(camera(), 17);

        watcher.on_connect(&camera(), handle.clone(), true);
        watcher.on_disconnect(&camera(), &handle);

        match cmd_rx.try_recv().unwrap() {
            CaptureCommand::DeviceConnected { handle: posted, is_new } => {
                assert_eq!(posted, handle);
                assert!(is_new);
            }
            other => panic!("unexpected command {:?}", other),
        }
        match cmd_rx.try_recv().unwrap() {
            CaptureCommand::DeviceDisconnected { device } => assert_eq!(device, camera()),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_detach_and_cancel_change_nothing() {
        let (watcher, monitor, mut cmd_rx) = watcher();
        watcher.on_detach(&camera());
        watcher.on_cancel(&camera());
        assert!(cmd_rx.try_recv().is_err());
        assert!(monitor.permission_requests().is_empty());
    }

    #[test]
    fn test_events_after_capture_thread_exit_are_dropped() {
        let (watcher, _monitor, cmd_rx) = watcher();
        drop(cmd_rx);
        watcher.on_connect(&camera(), DeviceHandle::new(camera(), 1), false);
    }
}
