//! USB device identity, control handles and the hot-plug monitor contract.

use std::fmt;
use std::sync::Arc;

/// A USB video device as reported by the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbDevice {
    /// System camera index (used by drivers that open devices by index).
    pub index: u32,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Human-readable device name.
    pub name: String,
}

impl UsbDevice {
    pub fn new(index: u32, vendor_id: u16, product_id: u16, name: impl Into<String>) -> Self {
        UsbDevice {
            index,
            vendor_id,
            product_id,
            name: name.into(),
        }
    }
}

impl fmt::Display for UsbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:04x}:{:04x}] #{}",
            self.name, self.vendor_id, self.product_id, self.index
        )
    }
}

/// An opened, permission-granted control channel to a USB device.
///
/// Produced by the monitor when permission is granted and handed to the
/// capture thread, which is the only owner allowed to open a driver with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    device: UsbDevice,
    raw: u64,
}

impl DeviceHandle {
    pub fn new(device: UsbDevice, raw: u64) -> Self {
        DeviceHandle { device, raw }
    }

    /// The device this handle controls.
    pub fn device(&self) -> &UsbDevice {
        &self.device
    }

    /// Opaque OS handle value (a file descriptor on most platforms).
    pub fn raw(&self) -> u64 {
        self.raw
    }
}

/// Notifications raised by a [`UsbMonitor`].
///
/// Called on the monitor's own notification thread.
pub trait DeviceListener: Send + Sync {
    /// A matching device appeared but has not been granted access yet.
    fn on_attach(&self, device: &UsbDevice);

    /// A device was removed before access was granted.
    fn on_detach(&self, device: &UsbDevice);

    /// Access was granted and a control handle is available.
    fn on_connect(&self, device: &UsbDevice, handle: DeviceHandle, is_new: bool);

    /// A device with a live handle was removed or revoked.
    fn on_disconnect(&self, device: &UsbDevice, handle: &DeviceHandle);

    /// The permission request was denied or cancelled.
    fn on_cancel(&self, device: &UsbDevice);
}

/// Hot-plug and permission monitor for USB video devices.
pub trait UsbMonitor: Send + Sync {
    /// Start delivering notifications to `listener`.
    fn register(&self, listener: Arc<dyn DeviceListener>);

    /// Stop delivering notifications and release monitor resources.
    fn unregister(&self);

    /// Ask the OS for access to `device`. The outcome arrives as
    /// [`DeviceListener::on_connect`] or [`DeviceListener::on_cancel`].
    fn request_permission(&self, device: &UsbDevice);
}
