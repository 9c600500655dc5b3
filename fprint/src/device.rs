//! The device base (§4.1): a strictly serialized per-device state engine
//! that guarantees exactly one outstanding action, propagates driver
//! errors into the right completion path, handles cancellation, and
//! enforces the open/active/closed invariants.
//!
//! Grounded on `libfprint/fp-device.c` (kept in full in the retrieved
//! original sources) - the admission checks, the action-slot bookkeeping,
//! and the "*_complete always deferred, slot cleared first" rule below
//! follow that file's `fpi_device_*` implementations.

use crate::action::{
    ActionInput, ActionKind, ActionProgress, CompletionSink, EnrollOutcome, IdentifyOutcome,
    IdentifyReport, MatchResult, VerifyOutcome, VerifyReport,
};
use crate::driver::Driver;
use crate::error::{ActionError, DeviceError, DeviceRetry};
use crate::print::Print;
use common::CancellationToken;
use minutiae::Image;
use reactor::Reactor;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    Swipe,
    Press,
}

/// Capability bitset (§3 "Device"), plain booleans rather than a bitflags
/// type: there are only four of them and none are ever combined via
/// bitwise operators by callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Features {
    pub supports_identify: bool,
    pub supports_capture: bool,
    pub has_storage: bool,
    pub duplicates_check: bool,
}

/// Exactly one of these backs a device; which one is fixed for the
/// lifetime of the instance (§3 "exactly one ... is live").
#[derive(Clone)]
pub enum Transport {
    Usb(Rc<dyn usb::UsbTransport>),
    Virtual(String),
}

struct Observable<T: Copy> {
    value: Cell<T>,
    observers: RefCell<Vec<Box<dyn Fn(T)>>>,
}

impl<T: Copy> Observable<T> {
    fn new(value: T) -> Self {
        Self {
            value: Cell::new(value),
            observers: RefCell::new(Vec::new()),
        }
    }

    fn get(&self) -> T {
        self.value.get()
    }

    fn set(&self, value: T) {
        self.value.set(value);
        for observer in self.observers.borrow().iter() {
            observer(value);
        }
    }

    fn on_change(&self, observer: impl Fn(T) + 'static) {
        self.observers.borrow_mut().push(Box::new(observer));
    }
}

struct ActionSlot {
    kind: ActionKind,
    input: RefCell<ActionInput>,
    sink: RefCell<Option<CompletionSink>>,
    cancel: CancellationToken,
    cancelled_latch: Rc<Cell<bool>>,
    progress: RefCell<ActionProgress>,
}

struct Inner {
    driver_id: String,
    device_id: String,
    name: String,
    nr_enroll_stages: Observable<i32>,
    scan_type: Observable<ScanType>,
    features: Features,
    transport: Transport,
    driver_data: u64,
    reactor: Reactor,
    driver: Rc<dyn Driver>,
    is_open: Cell<bool>,
    slot: RefCell<Option<Rc<ActionSlot>>>,
}

/// One sensor (§3 "Device"). Cheap to clone (an `Rc` bump); every clone
/// refers to the same underlying state, the same way an SSM and the
/// device that owns its action share one device identity.
#[derive(Clone)]
pub struct Device {
    inner: Rc<Inner>,
}

pub struct DeviceParams {
    pub driver_id: String,
    pub device_id: String,
    pub name: String,
    pub nr_enroll_stages: i32,
    pub scan_type: ScanType,
    pub features: Features,
    pub transport: Transport,
    pub driver_data: u64,
    pub reactor: Reactor,
    pub driver: Rc<dyn Driver>,
}

impl Device {
    pub fn new(params: DeviceParams) -> Self {
        Device {
            inner: Rc::new(Inner {
                driver_id: params.driver_id,
                device_id: params.device_id,
                name: params.name,
                nr_enroll_stages: Observable::new(params.nr_enroll_stages),
                scan_type: Observable::new(params.scan_type),
                features: params.features,
                transport: params.transport,
                driver_data: params.driver_data,
                reactor: params.reactor,
                driver: params.driver,
                is_open: Cell::new(false),
                slot: RefCell::new(None),
            }),
        }
    }

    pub fn driver_id(&self) -> &str {
        &self.inner.driver_id
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn nr_enroll_stages(&self) -> i32 {
        self.inner.nr_enroll_stages.get()
    }

    /// Drivers may tune the enroll stage count after construction (§4.3
    /// "default 5, tunable by the driver"); observers registered with
    /// [`Device::on_nr_enroll_stages_changed`] see every update.
    pub fn set_nr_enroll_stages(&self, n: i32) {
        self.inner.nr_enroll_stages.set(n);
    }

    pub fn on_nr_enroll_stages_changed(&self, observer: impl Fn(i32) + 'static) {
        self.inner.nr_enroll_stages.on_change(observer);
    }

    pub fn scan_type(&self) -> ScanType {
        self.inner.scan_type.get()
    }

    pub fn set_scan_type(&self, scan_type: ScanType) {
        self.inner.scan_type.set(scan_type);
    }

    pub fn on_scan_type_changed(&self, observer: impl Fn(ScanType) + 'static) {
        self.inner.scan_type.on_change(observer);
    }

    pub fn features(&self) -> Features {
        self.inner.features
    }

    pub fn driver_data(&self) -> u64 {
        self.inner.driver_data
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open.get()
    }

    pub fn reactor(&self) -> Reactor {
        self.inner.reactor.clone()
    }

    fn driver(&self) -> Rc<dyn Driver> {
        self.inner.driver.clone()
    }

    /// The cancellation token of the current action, or a fresh
    /// (never-cancelled) one if no action is running. SSMs use this to
    /// tear down delayed transitions (§4.2 "next_state_delayed").
    pub fn cancellation(&self) -> CancellationToken {
        match self.inner.slot.borrow().as_ref() {
            Some(slot) => slot.cancel.clone(),
            None => CancellationToken::new(),
        }
    }

    /// True if the current action's cancellation token has fired, for
    /// drivers without a `cancel` vfunc to poll (§4.1 point 2). Mirrors
    /// the original's "misuse outside of an action counts as cancelled"
    /// behavior rather than panicking (§9 "no panics cross the library
    /// boundary").
    pub fn action_is_cancelled(&self) -> bool {
        match self.inner.slot.borrow().as_ref() {
            Some(slot) => slot.cancelled_latch.get(),
            None => true,
        }
    }

    pub fn current_action(&self) -> Option<ActionKind> {
        self.inner.slot.borrow().as_ref().map(|s| s.kind)
    }

    fn current_slot(&self) -> Option<Rc<ActionSlot>> {
        self.inner.slot.borrow().as_ref().cloned()
    }

    /// The caller-supplied enroll template, for drivers (or layers like
    /// [`crate::image_device`]) that need to read it back mid-action -
    /// mirrors `fpi_device_get_enroll_data`.
    pub fn enroll_template(&self) -> Option<Print> {
        let slot = self.current_slot()?;
        match (&slot.kind, &*slot.input.borrow()) {
            (ActionKind::Enroll, ActionInput::Enroll { template, .. }) => Some(template.clone()),
            _ => None,
        }
    }

    /// Mirrors `fpi_device_get_verify_data`.
    pub fn verify_template(&self) -> Option<Print> {
        let slot = self.current_slot()?;
        match (&slot.kind, &*slot.input.borrow()) {
            (ActionKind::Verify, ActionInput::Verify { print }) => Some(print.clone()),
            _ => None,
        }
    }

    /// Mirrors `fpi_device_get_identify_data`.
    pub fn identify_gallery(&self) -> Option<Vec<Print>> {
        let slot = self.current_slot()?;
        match (&slot.kind, &*slot.input.borrow()) {
            (ActionKind::Identify, ActionInput::Identify { gallery }) => Some(gallery.clone()),
            _ => None,
        }
    }

    /// Mirrors `fpi_device_get_capture_data`.
    pub fn capture_wait_for_finger(&self) -> Option<bool> {
        let slot = self.current_slot()?;
        match (&slot.kind, &*slot.input.borrow()) {
            (ActionKind::Capture, ActionInput::Capture { wait_for_finger }) => Some(*wait_for_finger),
            _ => None,
        }
    }

    // -- admission -----------------------------------------------------

    fn admit(&self, kind: ActionKind) -> Result<(), DeviceError> {
        match kind {
            ActionKind::Open => {
                if self.is_open() {
                    return Err(DeviceError::AlreadyOpen);
                }
            }
            ActionKind::Close => {
                if !self.is_open() {
                    return Err(DeviceError::NotOpen);
                }
            }
            _ => {
                if !self.is_open() {
                    return Err(DeviceError::NotOpen);
                }
            }
        }
        if self.inner.slot.borrow().is_some() {
            return Err(DeviceError::Busy);
        }
        Ok(())
    }

    fn start(&self, input: ActionInput, cancel: Option<CancellationToken>, sink: CompletionSink) {
        let kind = input.kind();
        if let Err(e) = self.admit(kind) {
            let r = self.reactor();
            r.defer_idle(move || sink.fail(ActionError::Device(e)));
            return;
        }
        if let Some(ref c) = cancel {
            if c.is_cancelled() {
                let r = self.reactor();
                r.defer_idle(move || sink.fail(ActionError::Device(DeviceError::Cancelled)));
                return;
            }
        }
        let cancel = cancel.unwrap_or_default();
        let latch = Rc::new(Cell::new(false));
        let slot = Rc::new(ActionSlot {
            kind,
            input: RefCell::new(input),
            sink: RefCell::new(Some(sink)),
            cancel: cancel.clone(),
            cancelled_latch: latch.clone(),
            progress: RefCell::new(ActionProgress::default()),
        });
        *self.inner.slot.borrow_mut() = Some(slot);

        let device = self.clone();
        let latch_for_observer = latch;
        cancel.on_cancel(move || {
            latch_for_observer.set(true);
            if device.slot_still_current(kind) && device.driver().supports_cancel() {
                let device_for_idle = device.clone();
                device.reactor().defer_idle(move || {
                    if device_for_idle.slot_still_current(kind) {
                        device_for_idle.driver().cancel(&device_for_idle);
                    }
                });
            }
        });

        self.dispatch(kind);
    }

    fn slot_still_current(&self, kind: ActionKind) -> bool {
        matches!(self.inner.slot.borrow().as_ref(), Some(s) if s.kind == kind)
    }

    fn dispatch(&self, kind: ActionKind) {
        let driver = self.driver();
        // Cloning the `Rc<ActionSlot>` out keeps it alive for the rest of
        // this call even though each branch below only holds the outer
        // `slot` RefCell borrow for the instant it takes to read `input`.
        let slot = self.current_slot().expect("dispatch called without an armed action");
        match kind {
            ActionKind::Probe => {
                if driver.supports_probe() {
                    driver.probe(self);
                } else {
                    self.probe_complete(None);
                }
            }
            ActionKind::Open => {
                if let Transport::Usb(transport) = self.transport() {
                    if let Err(e) = transport.reset().and_then(|_| transport.claim_interface(0)) {
                        log::warn!("transport open failed before driver open vfunc: {}", e);
                        self.open_complete(Some(DeviceError::General));
                        return;
                    }
                }
                driver.open(self);
            }
            ActionKind::Close => {
                driver.close(self);
            }
            ActionKind::Enroll => {
                let template = match &*slot.input.borrow() {
                    ActionInput::Enroll { template, .. } => template.clone(),
                    _ => unreachable!("enroll dispatch without enroll input"),
                };
                driver.enroll(self, template);
            }
            ActionKind::Verify => {
                let print = match &*slot.input.borrow() {
                    ActionInput::Verify { print } => print.clone(),
                    _ => unreachable!("verify dispatch without verify input"),
                };
                driver.verify(self, print);
            }
            ActionKind::Identify => {
                if !driver.supports_identify() {
                    self.identify_complete(Some(DeviceError::NotSupported));
                    return;
                }
                let gallery = match &*slot.input.borrow() {
                    ActionInput::Identify { gallery } => gallery.clone(),
                    _ => unreachable!("identify dispatch without identify input"),
                };
                driver.identify(self, gallery);
            }
            ActionKind::Capture => {
                if !driver.supports_capture() {
                    self.capture_complete(None, Some(DeviceError::NotSupported));
                    return;
                }
                let wait_for_finger = match &*slot.input.borrow() {
                    ActionInput::Capture { wait_for_finger } => *wait_for_finger,
                    _ => unreachable!("capture dispatch without capture input"),
                };
                driver.capture(self, wait_for_finger);
            }
            ActionKind::Delete => {
                if !driver.supports_delete() {
                    self.delete_complete(None);
                    return;
                }
                let print = match &*slot.input.borrow() {
                    ActionInput::Delete { print } => print.clone(),
                    _ => unreachable!("delete dispatch without delete input"),
                };
                driver.delete(self, print);
            }
            ActionKind::List => {
                if !driver.supports_list() {
                    self.list_complete(None, Some(DeviceError::NotSupported));
                    return;
                }
                driver.list(self);
            }
            ActionKind::Clear => {
                if !driver.supports_clear() {
                    self.clear_complete(Some(DeviceError::NotSupported));
                    return;
                }
                driver.clear(self);
            }
        }
    }

    // -- driver reporting (mid-action) ----------------------------------

    pub fn verify_report(&self, result: MatchResult, scanned_print: Option<Print>) {
        if let Some(slot) = self.inner.slot.borrow().as_ref() {
            if slot.kind == ActionKind::Verify {
                slot.progress.borrow_mut().verify_reports.push(VerifyReport {
                    result,
                    scanned_print,
                });
            }
        }
    }

    pub fn identify_report(
        &self,
        matched_print: Option<Print>,
        scanned_print: Option<Print>,
        retry: Option<DeviceRetry>,
    ) {
        if let Some(slot) = self.inner.slot.borrow().as_ref() {
            if slot.kind == ActionKind::Identify {
                slot.progress
                    .borrow_mut()
                    .identify_reports
                    .push(IdentifyReport {
                        matched_print,
                        scanned_print,
                        retry,
                    });
            }
        }
    }

    /// `enroll_progress` (§4.1 "Enroll additional inputs"): `stage` must
    /// be `<= nr_enroll_stages`; equality means the enroll is complete
    /// (the driver is still expected to follow up with `enroll_complete`,
    /// same as every other action).
    pub fn enroll_progress(&self, stage: i32, partial_print: Option<Print>, retry: Option<DeviceRetry>) {
        debug_assert!(
            stage <= self.nr_enroll_stages(),
            "enroll stage {} exceeds nr_enroll_stages {}",
            stage,
            self.nr_enroll_stages()
        );
        // Cloned out of the outer slot so the application's progress
        // callback - invoked synchronously below - can freely call back
        // into other `Device` methods without deadlocking on a held
        // `RefCell` borrow.
        let Some(slot) = self.current_slot() else { return };
        if slot.kind != ActionKind::Enroll {
            return;
        }
        slot.progress.borrow_mut().enroll_stage = stage;
        if let ActionInput::Enroll { progress, .. } = &mut *slot.input.borrow_mut() {
            progress(stage, partial_print, retry);
        }
    }

    // -- completions -----------------------------------------------------

    fn take_slot(&self, kind: ActionKind) -> Option<Rc<ActionSlot>> {
        let mut guard = self.inner.slot.borrow_mut();
        match guard.as_ref() {
            Some(slot) if slot.kind == kind => guard.take(),
            Some(slot) => {
                log::error!(
                    "driver called {:?}_complete while {:?} was in flight; ignoring",
                    kind,
                    slot.kind
                );
                None
            }
            None => {
                log::error!("driver called {:?}_complete with no action in flight; ignoring", kind);
                None
            }
        }
    }

    fn finish<T: 'static>(&self, slot: Rc<ActionSlot>, result: Result<T, ActionError>, fire: impl FnOnce(CompletionSink, Result<T, ActionError>) + 'static) {
        let sink = match Rc::try_unwrap(slot) {
            Ok(slot) => slot.sink.into_inner(),
            Err(slot) => slot.sink.borrow_mut().take(),
        };
        let Some(sink) = sink else { return };
        self.reactor().defer_idle(move || fire(sink, result));
    }

    /// An error always wins over a result (§4.1 point 4, §7): a driver
    /// that supplies both gets its result dropped with a logged warning.
    fn resolve<T>(data: Option<T>, error: Option<DeviceError>) -> Result<T, ActionError> {
        match (data, error) {
            (Some(d), None) => Ok(d),
            (Some(_), Some(e)) => {
                log::warn!("driver completed with both a result and an error; dropping the result");
                Err(ActionError::Device(e))
            }
            (None, Some(e)) => Err(ActionError::Device(e)),
            (None, None) => {
                log::warn!("driver completed an action with neither a result nor an error");
                Err(ActionError::Device(DeviceError::General))
            }
        }
    }

    pub fn probe_complete(&self, error: Option<DeviceError>) {
        if let Some(slot) = self.take_slot(ActionKind::Probe) {
            let result = Self::resolve(Some(()), error);
            self.finish(slot, result, |sink, result| {
                if let CompletionSink::Probe(f) = sink {
                    f(result);
                }
            });
        }
    }

    pub fn open_complete(&self, error: Option<DeviceError>) {
        if let Some(slot) = self.take_slot(ActionKind::Open) {
            if error.is_none() {
                self.inner.is_open.set(true);
            }
            let result = Self::resolve(Some(()), error);
            self.finish(slot, result, |sink, result| {
                if let CompletionSink::Open(f) = sink {
                    f(result);
                }
            });
        }
    }

    pub fn close_complete(&self, error: Option<DeviceError>) {
        if let Some(slot) = self.take_slot(ActionKind::Close) {
            if let Transport::Usb(transport) = self.transport() {
                if let Err(e) = transport.release_interface(0) {
                    log::warn!("releasing USB interface on close failed: {}", e);
                }
            }
            self.inner.is_open.set(false);
            let result = Self::resolve(Some(()), error);
            self.finish(slot, result, |sink, result| {
                if let CompletionSink::Close(f) = sink {
                    f(result);
                }
            });
        }
    }

    pub fn enroll_complete(&self, print: Option<Print>, error: Option<DeviceError>) {
        if let Some(slot) = self.take_slot(ActionKind::Enroll) {
            let result = Self::resolve(print.map(|print| EnrollOutcome { print }), error);
            self.finish(slot, result, |sink, result| {
                if let CompletionSink::Enroll(f) = sink {
                    f(result);
                }
            });
        }
    }

    pub fn verify_complete(&self, error: Option<DeviceError>) {
        if let Some(slot) = self.take_slot(ActionKind::Verify) {
            let reports = slot.progress.borrow_mut().verify_reports.drain(..).collect::<Vec<_>>();
            let matched = reports
                .iter()
                .rev()
                .find_map(|r| match r.result {
                    MatchResult::Match => Some(true),
                    MatchResult::NoMatch => Some(false),
                    MatchResult::Error(_) => None,
                })
                .unwrap_or(false);
            let result = match error {
                Some(e) => Err(ActionError::Device(e)),
                None => Ok(VerifyOutcome { matched, reports }),
            };
            self.finish(slot, result, |sink, result| {
                if let CompletionSink::Verify(f) = sink {
                    f(result);
                }
            });
        }
    }

    pub fn identify_complete(&self, error: Option<DeviceError>) {
        if let Some(slot) = self.take_slot(ActionKind::Identify) {
            let reports = slot
                .progress
                .borrow_mut()
                .identify_reports
                .drain(..)
                .collect::<Vec<_>>();
            let matched_print = reports.iter().rev().find_map(|r| r.matched_print.clone());
            let result = match error {
                Some(e) => Err(ActionError::Device(e)),
                None => Ok(IdentifyOutcome {
                    matched_print,
                    reports,
                }),
            };
            self.finish(slot, result, |sink, result| {
                if let CompletionSink::Identify(f) = sink {
                    f(result);
                }
            });
        }
    }

    pub fn capture_complete(&self, image: Option<Image>, error: Option<DeviceError>) {
        if let Some(slot) = self.take_slot(ActionKind::Capture) {
            let result = Self::resolve(image, error);
            self.finish(slot, result, |sink, result| {
                if let CompletionSink::Capture(f) = sink {
                    f(result);
                }
            });
        }
    }

    pub fn delete_complete(&self, error: Option<DeviceError>) {
        if let Some(slot) = self.take_slot(ActionKind::Delete) {
            let result = Self::resolve(Some(()), error);
            self.finish(slot, result, |sink, result| {
                if let CompletionSink::Delete(f) = sink {
                    f(result);
                }
            });
        }
    }

    pub fn list_complete(&self, prints: Option<Vec<Print>>, error: Option<DeviceError>) {
        if let Some(slot) = self.take_slot(ActionKind::List) {
            let result = Self::resolve(prints, error);
            self.finish(slot, result, |sink, result| {
                if let CompletionSink::List(f) = sink {
                    f(result);
                }
            });
        }
    }

    pub fn clear_complete(&self, error: Option<DeviceError>) {
        if let Some(slot) = self.take_slot(ActionKind::Clear) {
            let result = Self::resolve(Some(()), error);
            self.finish(slot, result, |sink, result| {
                if let CompletionSink::Clear(f) = sink {
                    f(result);
                }
            });
        }
    }

    /// Fallback completion (§4.1 point 5): dispatches `error` to whichever
    /// `*_complete` matches the current action. A retry-domain error
    /// reaching here (rather than through `verify_report`/
    /// `enroll_progress`) always terminates the action, so it is folded
    /// into `DeviceError::General` - retries that should not terminate
    /// the action must be reported through those channels instead.
    pub fn action_error(&self, error: ActionError) {
        let Some(kind) = self.current_action() else {
            log::error!("action_error called with no action in flight");
            return;
        };
        let device_error = match error {
            ActionError::Device(e) => e,
            ActionError::Retry(_) => DeviceError::General,
        };
        match kind {
            ActionKind::Probe => self.probe_complete(Some(device_error)),
            ActionKind::Open => self.open_complete(Some(device_error)),
            ActionKind::Close => self.close_complete(Some(device_error)),
            ActionKind::Enroll => self.enroll_complete(None, Some(device_error)),
            ActionKind::Verify => self.verify_complete(Some(device_error)),
            ActionKind::Identify => self.identify_complete(Some(device_error)),
            ActionKind::Capture => self.capture_complete(None, Some(device_error)),
            ActionKind::Delete => self.delete_complete(Some(device_error)),
            ActionKind::List => self.list_complete(None, Some(device_error)),
            ActionKind::Clear => self.clear_complete(Some(device_error)),
        }
    }

    // -- public entry points ---------------------------------------------

    pub fn probe(&self, cancel: Option<CancellationToken>, on_complete: impl FnOnce(Result<(), ActionError>) + 'static) {
        self.start(ActionInput::Probe, cancel, CompletionSink::Probe(Box::new(on_complete)));
    }

    pub fn open(&self, cancel: Option<CancellationToken>, on_complete: impl FnOnce(Result<(), ActionError>) + 'static) {
        self.start(ActionInput::Open, cancel, CompletionSink::Open(Box::new(on_complete)));
    }

    pub fn close(&self, cancel: Option<CancellationToken>, on_complete: impl FnOnce(Result<(), ActionError>) + 'static) {
        self.start(ActionInput::Close, cancel, CompletionSink::Close(Box::new(on_complete)));
    }

    pub fn enroll(
        &self,
        template: Print,
        progress: impl FnMut(i32, Option<Print>, Option<DeviceRetry>) + 'static,
        cancel: Option<CancellationToken>,
        on_complete: impl FnOnce(Result<EnrollOutcome, ActionError>) + 'static,
    ) {
        self.start(
            ActionInput::Enroll {
                template,
                progress: Box::new(progress),
            },
            cancel,
            CompletionSink::Enroll(Box::new(on_complete)),
        );
    }

    pub fn verify(
        &self,
        print: Print,
        cancel: Option<CancellationToken>,
        on_complete: impl FnOnce(Result<VerifyOutcome, ActionError>) + 'static,
    ) {
        self.start(
            ActionInput::Verify { print },
            cancel,
            CompletionSink::Verify(Box::new(on_complete)),
        );
    }

    pub fn identify(
        &self,
        gallery: Vec<Print>,
        cancel: Option<CancellationToken>,
        on_complete: impl FnOnce(Result<IdentifyOutcome, ActionError>) + 'static,
    ) {
        self.start(
            ActionInput::Identify { gallery },
            cancel,
            CompletionSink::Identify(Box::new(on_complete)),
        );
    }

    pub fn capture(
        &self,
        wait_for_finger: bool,
        cancel: Option<CancellationToken>,
        on_complete: impl FnOnce(Result<Image, ActionError>) + 'static,
    ) {
        self.start(
            ActionInput::Capture { wait_for_finger },
            cancel,
            CompletionSink::Capture(Box::new(on_complete)),
        );
    }

    pub fn delete(
        &self,
        print: Print,
        cancel: Option<CancellationToken>,
        on_complete: impl FnOnce(Result<(), ActionError>) + 'static,
    ) {
        self.start(
            ActionInput::Delete { print },
            cancel,
            CompletionSink::Delete(Box::new(on_complete)),
        );
    }

    pub fn list(
        &self,
        cancel: Option<CancellationToken>,
        on_complete: impl FnOnce(Result<Vec<Print>, ActionError>) + 'static,
    ) {
        self.start(ActionInput::List, cancel, CompletionSink::List(Box::new(on_complete)));
    }

    pub fn clear(
        &self,
        cancel: Option<CancellationToken>,
        on_complete: impl FnOnce(Result<(), ActionError>) + 'static,
    ) {
        self.start(ActionInput::Clear, cancel, CompletionSink::Clear(Box::new(on_complete)));
    }
}
