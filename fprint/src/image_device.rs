//! The image-device pipeline (§4.3): finger on/off -> capture -> minutiae
//! -> match/enroll-progress, built on top of the action machinery in
//! [`crate::device`]. Grounded on `libfprint/fp-image-device.c`.
//!
//! A concrete sensor implements [`ImageDriver`] (open/close/activate/
//! deactivate, optionally `change_state`) and reports scan events through
//! [`ImageDeviceAdapter::report_finger_status`],
//! [`ImageDeviceAdapter::image_captured`], and
//! [`ImageDeviceAdapter::retry_scan`]. [`ImageDeviceAdapter`] itself
//! implements [`crate::driver::Driver`] and is handed to
//! [`crate::device::Device::new`] as the device's driver - the pipeline is
//! a layer wrapped *around* a driver, not a subclass, since Rust has no
//! base-class dispatch to hook into.

use crate::action::MatchResult;
use crate::device::Device;
use crate::driver::Driver;
use crate::error::{ActionError, DeviceError, DeviceRetry};
use crate::print::{Print, PrintType};
use minutiae::{Image, MatchOutcome, Minutiae, MinutiaeEngine};
use reactor::TimeoutId;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

const DEFAULT_ENROLL_STAGES: i32 = 5;
const DEFAULT_BZ3_THRESHOLD: u32 = 40;
const PENDING_ACTIVATION_GRACE_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    Inactive,
    AwaitFingerOn,
    Capture,
    AwaitFingerOff,
}

/// What a concrete image sensor implements: opening/closing the hardware
/// handle and starting/stopping the scan session. Everything else (the
/// on/off/capture state machine, minutiae detection, matching) is handled
/// by [`ImageDeviceAdapter`].
pub trait ImageDriver {
    fn open(&self, device: &Device);
    fn close(&self, device: &Device);

    /// Starts a scan session; the driver must eventually call
    /// [`ImageDeviceAdapter::activate_complete`].
    fn activate(&self, device: &Device, adapter: &Rc<ImageDeviceAdapter>);

    /// Stops a scan session; the driver must eventually call
    /// [`ImageDeviceAdapter::deactivate_complete`].
    fn deactivate(&self, device: &Device, adapter: &Rc<ImageDeviceAdapter>);

    fn change_state(&self, device: &Device, state: ImageState) {
        let _ = (device, state);
    }
}

struct Inner {
    driver: Rc<dyn ImageDriver>,
    minutiae: Rc<dyn MinutiaeEngine>,
    bz3_threshold: Cell<u32>,
    state: Cell<ImageState>,
    active: Cell<bool>,
    enroll_stage: Cell<i32>,
    accumulated: RefCell<Vec<u8>>,
    closing: Cell<bool>,
    pending_timeout: RefCell<Option<TimeoutId>>,
    pending_waiting_finger_off: Cell<bool>,
    supports_identify: bool,
    supports_capture: bool,
    self_weak: RefCell<Weak<ImageDeviceAdapter>>,
}

/// Wraps a driver's [`ImageDriver`] implementation into the §4.3 pipeline
/// and exposes it as a [`Driver`] the base [`Device`] dispatches actions
/// through.
pub struct ImageDeviceAdapter {
    inner: Inner,
}

impl ImageDeviceAdapter {
    pub fn new(
        driver: Rc<dyn ImageDriver>,
        minutiae: Rc<dyn MinutiaeEngine>,
        supports_identify: bool,
        supports_capture: bool,
    ) -> Rc<Self> {
        let adapter = Rc::new(ImageDeviceAdapter {
            inner: Inner {
                driver,
                minutiae,
                bz3_threshold: Cell::new(DEFAULT_BZ3_THRESHOLD),
                state: Cell::new(ImageState::Inactive),
                active: Cell::new(false),
                enroll_stage: Cell::new(0),
                accumulated: RefCell::new(Vec::new()),
                closing: Cell::new(false),
                pending_timeout: RefCell::new(None),
                pending_waiting_finger_off: Cell::new(false),
                supports_identify,
                supports_capture,
                self_weak: RefCell::new(Weak::new()),
            },
        });
        *adapter.inner.self_weak.borrow_mut() = Rc::downgrade(&adapter);
        adapter
    }

    /// The default enroll stage count image devices advertise (§4.3:
    /// "default 5, tunable by the driver"). Call
    /// `device.set_nr_enroll_stages` after construction to tune it.
    pub fn default_enroll_stages() -> i32 {
        DEFAULT_ENROLL_STAGES
    }

    pub fn set_bz3_threshold(&self, threshold: u32) {
        self.inner.bz3_threshold.set(threshold);
    }

    fn rc(&self) -> Rc<Self> {
        self.inner
            .self_weak
            .borrow()
            .upgrade()
            .expect("ImageDeviceAdapter used after being dropped")
    }

    fn change_state(&self, device: &Device, state: ImageState) {
        debug_assert_ne!(state, ImageState::Inactive, "use deactivate to go inactive");
        if let Some(id) = self.inner.pending_timeout.borrow_mut().take() {
            device.reactor().cancel_timeout(id);
        }
        self.inner.state.set(state);
        self.inner.driver.change_state(device, state);
    }

    fn deactivate(&self, device: &Device) {
        if !self.inner.active.get() {
            return;
        }
        self.inner.state.set(ImageState::Inactive);
        self.inner.driver.deactivate(device, &self.rc());
    }

    fn begin_activation(self: &Rc<Self>, device: &Device) {
        self.inner.enroll_stage.set(0);
        self.inner.accumulated.borrow_mut().clear();
        self.inner.state.set(ImageState::AwaitFingerOn);
        self.inner.driver.activate(device, self);
    }

    /// Entry point shared by enroll/verify/identify/capture (§4.3: "action
    /// started -> driver-activate -> on success, await_finger_on"),
    /// mirroring `fp_image_device_start_capture_action`.
    fn start_capture_action(self: &Rc<Self>, device: &Device) {
        if self.inner.active.get() || self.inner.state.get() != ImageState::Inactive {
            log::debug!("image device got a new request while still active; deferring");
            let waiting_finger_off = self.inner.state.get() == ImageState::AwaitFingerOff;
            self.inner.pending_waiting_finger_off.set(waiting_finger_off);
            let adapter = self.clone();
            let device_for_timer = device.clone();
            let id = device.reactor().add_timeout(PENDING_ACTIVATION_GRACE_MS, move || {
                adapter.inner.pending_timeout.borrow_mut().take();
                let retry = if adapter.inner.pending_waiting_finger_off.get() {
                    DeviceRetry::RemoveFinger
                } else {
                    DeviceRetry::General
                };
                device_for_timer.action_error(ActionError::Retry(retry));
            });
            *self.inner.pending_timeout.borrow_mut() = Some(id);
            return;
        }
        self.begin_activation(device);
    }

    /// Completes activation (§4.3). A previously-pending action that was
    /// waiting on deactivation cancels its grace timer and retries here -
    /// see [`ImageDeviceAdapter::deactivate_complete`].
    pub fn activate_complete(self: &Rc<Self>, device: &Device, error: Option<DeviceError>) {
        match error {
            Some(e) => {
                log::debug!("image device activation failed");
                device.action_error(ActionError::Device(e));
            }
            None => {
                self.inner.active.set(true);
                self.change_state(device, ImageState::AwaitFingerOn);
            }
        }
    }

    /// Completes deactivation. If this device is mid-close, finishes the
    /// close; if a new action was queued behind this deactivation (§4.3
    /// "deactivation overlap"), retries it now instead of waiting for the
    /// grace timer.
    pub fn deactivate_complete(self: &Rc<Self>, device: &Device, error: Option<DeviceError>) {
        self.inner.active.set(false);
        if let Some(e) = &error {
            log::warn!("image device deactivation reported an error: {}", e);
        }

        if self.inner.closing.get() {
            self.inner.closing.set(false);
            self.inner.driver.close(device);
            return;
        }

        if self.inner.pending_timeout.borrow().is_some() && device.current_action().is_some() {
            if let Some(id) = self.inner.pending_timeout.borrow_mut().take() {
                device.reactor().cancel_timeout(id);
            }
            self.begin_activation(device);
        }
    }

    /// Reports finger presence (§4.3 state table). Ignored while inactive.
    pub fn report_finger_status(self: &Rc<Self>, device: &Device, present: bool) {
        if self.inner.state.get() == ImageState::Inactive {
            log::debug!("ignoring finger presence report while inactive");
            return;
        }
        let action = device.current_action();
        debug_assert!(!matches!(action, Some(crate::action::ActionKind::Open | crate::action::ActionKind::Close)));

        if present && self.inner.state.get() == ImageState::AwaitFingerOn {
            self.change_state(device, ImageState::Capture);
        } else if !present && self.inner.state.get() == ImageState::AwaitFingerOff {
            if action == Some(crate::action::ActionKind::Enroll) {
                self.change_state(device, ImageState::AwaitFingerOn);
            } else {
                self.deactivate(device);
            }
        }
    }

    /// Reports a successful capture (§4.3 "driver yields image"); kicks
    /// off asynchronous minutiae detection and, once it returns, routes
    /// the outcome to whichever action is in flight.
    pub fn image_captured(self: &Rc<Self>, device: &Device, image: Image) {
        assert_eq!(self.inner.state.get(), ImageState::Capture, "image_captured outside of capture state");
        self.change_state(device, ImageState::AwaitFingerOff);

        let adapter = self.clone();
        let device = device.clone();
        let image_for_capture = image.clone();
        self.inner.minutiae.detect_minutiae(
            image,
            Box::new(move |result| adapter.on_minutiae_detected(&device, image_for_capture, result)),
        );
    }

    /// Reports a non-fatal retry condition (§4.3 "retry reported"): for
    /// enroll this feeds the progress callback without aborting; for
    /// every other action it aborts and deactivates.
    pub fn retry_scan(self: &Rc<Self>, device: &Device, retry: DeviceRetry) {
        match device.current_action() {
            Some(crate::action::ActionKind::Enroll) => {
                device.enroll_progress(self.inner.enroll_stage.get(), None, Some(retry));
            }
            _ => {
                self.deactivate(device);
                device.action_error(ActionError::Retry(retry));
            }
        }
    }

    fn on_minutiae_detected(
        self: &Rc<Self>,
        device: &Device,
        image: Image,
        result: common::errors::Result<Minutiae>,
    ) {
        let action = device.current_action();
        let minutiae = match result {
            Ok(m) => Some(m),
            Err(e) => {
                log::warn!("minutiae detection failed: {}", e);
                None
            }
        };

        if action == Some(crate::action::ActionKind::Capture) {
            device.capture_complete(Some(image), None);
            self.deactivate(device);
            return;
        }

        match action {
            Some(crate::action::ActionKind::Enroll) => {
                let template = device.enroll_template();
                let stage = if let Some(m) = &minutiae {
                    self.inner.accumulated.borrow_mut().extend_from_slice(&m.0);
                    self.inner.enroll_stage.set(self.inner.enroll_stage.get() + 1);
                    self.inner.enroll_stage.get()
                } else {
                    self.inner.enroll_stage.get()
                };

                let partial = minutiae.as_ref().map(|m| self.print_from_minutiae(m));
                let retry = if minutiae.is_none() {
                    Some(DeviceRetry::General)
                } else {
                    None
                };
                device.enroll_progress(stage, partial, retry);

                if stage >= device.nr_enroll_stages() {
                    let mut print = template.unwrap_or_else(|| Print::new("enrolled print"));
                    print.set_type(PrintType::Nbis);
                    print.data = self.inner.accumulated.borrow().clone();
                    device.enroll_complete(Some(print), None);
                    self.deactivate(device);
                }
            }
            Some(crate::action::ActionKind::Verify) => {
                let template = device.verify_template();
                let (result, scanned) = match (&minutiae, &template) {
                    (Some(m), Some(template)) => {
                        let probe = self.print_from_minutiae(m);
                        match self.inner.minutiae.bozorth3_match(
                            &Minutiae(template.data.clone()),
                            m,
                            self.inner.bz3_threshold.get(),
                        ) {
                            Ok(MatchOutcome::Success) => (MatchResult::Match, Some(probe)),
                            Ok(MatchOutcome::Fail) => (MatchResult::NoMatch, Some(probe)),
                            Err(e) => {
                                log::warn!("bozorth3 match failed: {}", e);
                                (MatchResult::Error(DeviceRetry::General), Some(probe))
                            }
                        }
                    }
                    _ => (MatchResult::Error(DeviceRetry::General), None),
                };
                device.verify_report(result, scanned);
                device.verify_complete(None);
                self.deactivate(device);
            }
            Some(crate::action::ActionKind::Identify) => {
                let gallery = device.identify_gallery().unwrap_or_default();
                let mut matched = None;
                if let Some(m) = &minutiae {
                    let probe = self.print_from_minutiae(m);
                    for candidate in &gallery {
                        match self.inner.minutiae.bozorth3_match(
                            &Minutiae(candidate.data.clone()),
                            m,
                            self.inner.bz3_threshold.get(),
                        ) {
                            Ok(MatchOutcome::Success) => {
                                matched = Some(candidate.clone());
                                break;
                            }
                            Ok(MatchOutcome::Fail) => continue,
                            Err(e) => {
                                log::warn!("bozorth3 match failed: {}", e);
                                break;
                            }
                        }
                    }
                    device.identify_report(matched.clone(), Some(probe), None);
                } else {
                    device.identify_report(None, None, Some(DeviceRetry::General));
                }
                device.identify_complete(None);
                self.deactivate(device);
            }
            _ => {
                log::warn!("minutiae result arrived with no matching in-flight action");
            }
        }
    }

    fn print_from_minutiae(&self, minutiae: &Minutiae) -> Print {
        let mut print = Print::new("scanned print");
        print.set_type(PrintType::Nbis);
        print.data = minutiae.0.clone();
        print
    }
}

impl Driver for ImageDeviceAdapter {
    fn supports_identify(&self) -> bool {
        self.inner.supports_identify
    }

    fn supports_capture(&self) -> bool {
        self.inner.supports_capture
    }

    fn supports_cancel(&self) -> bool {
        true
    }

    fn open(&self, device: &Device) {
        self.inner.driver.open(device);
    }

    fn close(&self, device: &Device) {
        if !self.inner.active.get() {
            self.inner.driver.close(device);
        } else if self.inner.state.get() != ImageState::Inactive {
            self.inner.closing.set(true);
            self.deactivate(device);
        }
    }

    fn enroll(&self, device: &Device, _template: Print) {
        self.rc().start_capture_action(device);
    }

    fn verify(&self, device: &Device, _print: Print) {
        self.rc().start_capture_action(device);
    }

    fn identify(&self, device: &Device, _gallery: Vec<Print>) {
        self.rc().start_capture_action(device);
    }

    fn capture(&self, device: &Device, wait_for_finger: bool) {
        if !wait_for_finger {
            device.action_error(ActionError::Device(DeviceError::NotSupported));
            return;
        }
        self.rc().start_capture_action(device);
    }

    fn cancel(&self, device: &Device) {
        use crate::action::ActionKind;
        if matches!(
            device.current_action(),
            Some(ActionKind::Enroll | ActionKind::Verify | ActionKind::Identify | ActionKind::Capture)
        ) {
            self.deactivate(device);
            device.action_error(ActionError::Device(DeviceError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::device::{DeviceParams, Features, ScanType, Transport};
    use minutiae::FakeMinutiaeEngine;
    use reactor::Reactor;
    use std::cell::RefCell;

    /// A scripted sensor: `activate`/`deactivate` complete immediately
    /// unless told to hang, and capture is driven explicitly by the test
    /// via `report_finger_status`/`image_captured`/`retry_scan` on the
    /// adapter handed back from [`new_device`].
    struct ScriptedImageDriver {
        auto_activate: Cell<bool>,
        auto_deactivate: Cell<bool>,
        opened: Cell<u32>,
        closed: Cell<u32>,
    }

    impl ScriptedImageDriver {
        fn new() -> Rc<Self> {
            Rc::new(ScriptedImageDriver {
                auto_activate: Cell::new(true),
                auto_deactivate: Cell::new(true),
                opened: Cell::new(0),
                closed: Cell::new(0),
            })
        }
    }

    impl ImageDriver for ScriptedImageDriver {
        fn open(&self, device: &Device) {
            self.opened.set(self.opened.get() + 1);
            device.open_complete(None);
        }
        fn close(&self, device: &Device) {
            self.closed.set(self.closed.get() + 1);
            device.close_complete(None);
        }
        fn activate(&self, device: &Device, adapter: &Rc<ImageDeviceAdapter>) {
            if self.auto_activate.get() {
                adapter.activate_complete(device, None);
            }
        }
        fn deactivate(&self, device: &Device, adapter: &Rc<ImageDeviceAdapter>) {
            if self.auto_deactivate.get() {
                adapter.deactivate_complete(device, None);
            }
        }
    }

    fn new_device(reactor: Reactor, minutiae: Rc<dyn MinutiaeEngine>) -> (Device, Rc<ImageDeviceAdapter>) {
        let driver = ScriptedImageDriver::new();
        let adapter = ImageDeviceAdapter::new(driver, minutiae, true, true);
        let device = Device::new(DeviceParams {
            driver_id: "image-test".to_string(),
            device_id: "0".to_string(),
            name: "Image test device".to_string(),
            nr_enroll_stages: ImageDeviceAdapter::default_enroll_stages(),
            scan_type: ScanType::Press,
            features: Features {
                supports_identify: true,
                supports_capture: true,
                has_storage: false,
                duplicates_check: false,
            },
            transport: Transport::Virtual("FP_IMAGE_TEST".to_string()),
            driver_data: 0,
            reactor,
            driver: adapter.clone(),
        });
        (device, adapter)
    }

    fn sample_image(bytes: &[u8]) -> Image {
        Image {
            width: 8,
            height: 8,
            pixels: bytes.to_vec(),
        }
    }

    fn open(device: &Device, reactor: &Reactor) {
        device.open(None, |r| r.unwrap());
        reactor.drain_idle();
    }

    /// S6: a full finger-on -> capture -> finger-off cycle during verify
    /// drives the adapter back to `Inactive` and reports a match.
    #[test]
    fn verify_full_finger_cycle_reports_match() {
        let reactor = Reactor::new();
        let minutiae = Rc::new(FakeMinutiaeEngine::new(reactor.clone()));
        let (device, adapter) = new_device(reactor.clone(), minutiae);
        open(&device, &reactor);

        let mut template = Print::new("template");
        template.set_type(PrintType::Nbis);
        template.data = b"same-ridge-pattern".to_vec();

        let matched = Rc::new(RefCell::new(None));
        let matched2 = matched.clone();
        device.verify(template, None, move |r| {
            *matched2.borrow_mut() = Some(r.unwrap().matched);
        });
        assert_eq!(adapter.inner.state.get(), ImageState::AwaitFingerOn);

        adapter.report_finger_status(&device, true);
        assert_eq!(adapter.inner.state.get(), ImageState::Capture);

        adapter.image_captured(&device, sample_image(b"same-ridge-pattern"));
        assert_eq!(adapter.inner.state.get(), ImageState::AwaitFingerOff);

        // Minutiae detection is asynchronous (deferred via the reactor);
        // once it resolves, verify's completion and the deactivation that
        // follows it run without needing a finger-off report, since a
        // one-shot verify has nothing left to wait on the sensor for.
        reactor.drain_idle();

        assert_eq!(*matched.borrow(), Some(true));
        assert_eq!(adapter.inner.state.get(), ImageState::Inactive);
    }

    /// A non-enroll `retry_scan` aborts the action with the retry folded
    /// into `DeviceError::General` (§4.1 point 5 / §4.3 state table: "any
    /// active | retry reported | ... else action fails").
    #[test]
    fn retry_scan_during_verify_fails_the_action_as_general() {
        let reactor = Reactor::new();
        let minutiae = Rc::new(FakeMinutiaeEngine::new(reactor.clone()));
        let (device, adapter) = new_device(reactor.clone(), minutiae);
        open(&device, &reactor);

        let error = Rc::new(RefCell::new(None));
        let error2 = error.clone();
        device.verify(Print::new("template"), None, move |r| {
            *error2.borrow_mut() = Some(r.err());
        });

        adapter.report_finger_status(&device, true);
        adapter.retry_scan(&device, DeviceRetry::General);
        reactor.drain_idle();

        assert_eq!(*error.borrow(), Some(Some(ActionError::Device(DeviceError::General))));
        assert!(device.current_action().is_none());
    }

    /// A retry during enroll is routed through `enroll_progress` instead,
    /// leaving the action running.
    #[test]
    fn retry_scan_during_enroll_reports_progress_without_failing() {
        let reactor = Reactor::new();
        let minutiae = Rc::new(FakeMinutiaeEngine::new(reactor.clone()));
        let (device, adapter) = new_device(reactor.clone(), minutiae);
        open(&device, &reactor);

        let retries = Rc::new(RefCell::new(Vec::new()));
        let retries2 = retries.clone();
        device.enroll(
            Print::new("template"),
            move |_stage, _partial, retry| {
                retries2.borrow_mut().push(retry);
            },
            None,
            |r| {
                r.unwrap();
            },
        );

        adapter.report_finger_status(&device, true);
        adapter.retry_scan(&device, DeviceRetry::CenterFinger);
        reactor.drain_idle();

        assert_eq!(*retries.borrow(), vec![Some(DeviceRetry::CenterFinger)]);
        assert_eq!(device.current_action(), Some(ActionKind::Enroll));
    }

    /// Testable property #6: a full enroll completes only after
    /// `nr_enroll_stages` successful captures, and the reported stage
    /// number is monotonically non-decreasing across progress calls.
    #[test]
    fn enroll_completes_after_configured_stage_count_with_monotonic_stages() {
        let reactor = Reactor::new();
        let minutiae = Rc::new(FakeMinutiaeEngine::new(reactor.clone()));
        let (device, adapter) = new_device(reactor.clone(), minutiae);
        open(&device, &reactor);
        device.set_nr_enroll_stages(3);

        let stages = Rc::new(RefCell::new(Vec::new()));
        let stages2 = stages.clone();
        let done = Rc::new(Cell::new(false));
        let done2 = done.clone();
        device.enroll(
            Print::new("template"),
            move |stage, _partial, _retry| stages2.borrow_mut().push(stage),
            None,
            move |r| {
                r.unwrap();
                done2.set(true);
            },
        );

        for i in 0..3 {
            adapter.report_finger_status(&device, true);
            adapter.image_captured(&device, sample_image(&[i as u8]));
            reactor.drain_idle();
            if i < 2 {
                adapter.report_finger_status(&device, false);
                reactor.drain_idle();
            }
        }

        assert!(done.get());
        let stages = stages.borrow();
        assert_eq!(*stages, vec![1, 2, 3]);
        assert!(stages.windows(2).all(|w| w[0] <= w[1]));
    }

    /// A request that arrives while the device is still deactivating from
    /// a previous action waits out the grace timer and then retries
    /// automatically (§4.3 "deactivation overlap").
    #[test]
    fn overlapping_request_during_deactivation_retries_once_deactivation_completes() {
        struct SlowDeactivateDriver;
        impl ImageDriver for SlowDeactivateDriver {
            fn open(&self, device: &Device) {
                device.open_complete(None);
            }
            fn close(&self, device: &Device) {
                device.close_complete(None);
            }
            fn activate(&self, device: &Device, adapter: &Rc<ImageDeviceAdapter>) {
                adapter.activate_complete(device, None);
            }
            // Left hanging deliberately; the test completes it by hand once
            // it wants to simulate the driver's hardware teardown finishing.
            fn deactivate(&self, _device: &Device, _adapter: &Rc<ImageDeviceAdapter>) {}
        }

        let reactor = Reactor::new();
        let minutiae = Rc::new(FakeMinutiaeEngine::new(reactor.clone()));
        let adapter = ImageDeviceAdapter::new(Rc::new(SlowDeactivateDriver), minutiae, true, true);
        let device = Device::new(DeviceParams {
            driver_id: "image-test".to_string(),
            device_id: "0".to_string(),
            name: "Image test device".to_string(),
            nr_enroll_stages: ImageDeviceAdapter::default_enroll_stages(),
            scan_type: ScanType::Press,
            features: Features {
                supports_identify: true,
                supports_capture: true,
                has_storage: false,
                duplicates_check: false,
            },
            transport: Transport::Virtual("FP_IMAGE_TEST".to_string()),
            driver_data: 0,
            reactor: reactor.clone(),
            driver: adapter.clone(),
        });
        open(&device, &reactor);

        let capture_done = Rc::new(Cell::new(false));
        let capture_done2 = capture_done.clone();
        device.capture(true, None, move |r| {
            r.unwrap();
            capture_done2.set(true);
        });
        adapter.report_finger_status(&device, true);
        adapter.image_captured(&device, sample_image(b"first"));
        reactor.drain_idle();
        assert!(capture_done.get());

        // The capture's own deactivate call is still hanging (the sensor
        // hasn't finished its teardown); a new verify started now must not
        // reach the driver yet, only queue behind the pending deactivation.
        let matched = Rc::new(RefCell::new(None));
        let matched2 = matched.clone();
        let mut template = Print::new("template");
        template.set_type(PrintType::Nbis);
        template.data = b"second".to_vec();
        device.verify(template, None, move |r| {
            *matched2.borrow_mut() = Some(r.unwrap().matched);
        });
        assert_eq!(adapter.inner.state.get(), ImageState::Inactive);

        // The driver now reports that the hardware teardown finished; the
        // queued verify begins activation immediately instead of waiting
        // out the rest of the grace timer.
        adapter.deactivate_complete(&device, None);
        assert_eq!(adapter.inner.state.get(), ImageState::AwaitFingerOn);

        adapter.report_finger_status(&device, true);
        adapter.image_captured(&device, sample_image(b"second"));
        reactor.drain_idle();
        assert_eq!(*matched.borrow(), Some(true));
    }

    #[test]
    fn capture_without_wait_for_finger_is_not_supported() {
        let reactor = Reactor::new();
        let minutiae = Rc::new(FakeMinutiaeEngine::new(reactor.clone()));
        let (device, _adapter) = new_device(reactor.clone(), minutiae);
        open(&device, &reactor);

        let error = Rc::new(RefCell::new(None));
        let error2 = error.clone();
        device.capture(false, None, move |r| *error2.borrow_mut() = Some(r.err()));
        reactor.drain_idle();
        assert_eq!(*error.borrow(), Some(Some(ActionError::Device(DeviceError::NotSupported))));
    }
}
