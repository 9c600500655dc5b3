//! The driver capability set (§9 "Dynamic dispatch"): a trait-object-style
//! vtable the device base dispatches actions through. A driver that does
//! not implement a given capability reports so via the `supports_*`
//! queries; the base class turns an unsupported dispatch into
//! `DeviceError::NotSupported` (or, for `delete`, a free success - see
//! [`crate::device::Device`]) without ever calling the corresponding
//! method, mirroring how the original vtable's `NULL` function pointers
//! are checked before use.

use crate::device::Device;
use crate::print::Print;

/// Everything a driver plugs into the device base. Every method that is
/// not universally required is paired with a `supports_*` query the base
/// class checks first (§4.1 point 3); calling an unsupported method is a
/// contract violation the base class never commits.
pub trait Driver {
    fn supports_probe(&self) -> bool {
        false
    }
    fn supports_identify(&self) -> bool {
        false
    }
    fn supports_capture(&self) -> bool {
        false
    }
    fn supports_delete(&self) -> bool {
        false
    }
    fn supports_list(&self) -> bool {
        false
    }
    fn supports_clear(&self) -> bool {
        false
    }
    fn supports_cancel(&self) -> bool {
        false
    }

    /// Optional device discovery probe. Only called if
    /// [`Driver::supports_probe`] returns true; the base class otherwise
    /// treats `probe` as trivially successful.
    fn probe(&self, device: &Device) {
        let _ = device;
    }

    fn open(&self, device: &Device);
    fn close(&self, device: &Device);

    fn enroll(&self, device: &Device, template: Print);
    fn verify(&self, device: &Device, print: Print);

    /// Only called if [`Driver::supports_identify`] is true.
    fn identify(&self, device: &Device, gallery: Vec<Print>) {
        let _ = (device, gallery);
    }

    /// Only called if [`Driver::supports_capture`] is true.
    fn capture(&self, device: &Device, wait_for_finger: bool) {
        let _ = (device, wait_for_finger);
    }

    /// Only called if [`Driver::supports_delete`] is true; drivers
    /// without on-chip storage need not implement this at all (§4.1 point
    /// 3) since the base class completes `delete` with success directly.
    fn delete(&self, device: &Device, print: Print) {
        let _ = (device, print);
    }

    /// Only called if [`Driver::supports_list`] is true.
    fn list(&self, device: &Device) {
        let _ = device;
    }

    /// Only called if [`Driver::supports_clear`] is true.
    fn clear(&self, device: &Device) {
        let _ = device;
    }

    /// Only called if [`Driver::supports_cancel`] is true; otherwise
    /// cancellation is latched for the driver to observe via
    /// [`Device::action_is_cancelled`](crate::device::Device::action_is_cancelled)
    /// (§4.1 point 2).
    fn cancel(&self, device: &Device) {
        let _ = device;
    }
}
