//! A scriptable driver for exercising [`fprint::device::Device`] without
//! real hardware. Grounded on `libfprint/drivers/virtual-device.c`: a
//! small command queue drives scan outcomes instead of a live sensor.
//!
//! The original talks to its command queue over a Unix socket fed by a
//! companion Python script; that I/O surface is an external collaborator
//! (the same way USB transport is, per the crate's non-goals) and is
//! left out here in favor of a direct, in-process `push_command` API -
//! the same test-double role, reached by a simpler door.

use fprint::driver::Driver;
use fprint::error::{DeviceError, DeviceRetry};
use fprint::print::{Print, PrintType};
use fprint::ScanType;
use reactor::Reactor;
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};

/// One scripted instruction, pushed ahead of time and consumed as the
/// driver's `enroll`/`verify` vfuncs run (mirrors the original's
/// `INSERT `/`REMOVE `/`SCAN `/`ERROR `/`RETRY `/`FINGER ` command
/// prefixes).
#[derive(Debug, Clone)]
pub enum Command {
    Insert(String),
    Remove(String),
    Scan(String),
    Error(DeviceError),
    Retry(DeviceRetry),
    Finger(bool),
}

struct Inner {
    reactor: Reactor,
    queue: RefCell<VecDeque<Command>>,
    storage: RefCell<HashSet<String>>,
    enroll_stages_passed: RefCell<i32>,
    device: RefCell<Option<fprint::device::Device>>,
}

/// The virtual driver itself (§4.1 "Drivers (collaborators)"). Implements
/// [`Driver`] directly rather than through [`fprint::image_device`],
/// matching the original: this device reports raw scan ids, not images.
pub struct VirtualDevice {
    inner: Inner,
}

impl VirtualDevice {
    pub fn new(reactor: Reactor) -> Self {
        VirtualDevice {
            inner: Inner {
                reactor,
                queue: RefCell::new(VecDeque::new()),
                storage: RefCell::new(HashSet::new()),
                enroll_stages_passed: RefCell::new(0),
                device: RefCell::new(None),
            },
        }
    }

    /// Scripts one more instruction. If an enroll or verify is already in
    /// flight and waiting on the queue, this wakes it back up - mirrors the
    /// original's `recv_instruction_cb` calling `maybe_continue_current_action`
    /// every time a new line arrives on the socket.
    pub fn push_command(&self, command: Command) {
        self.inner.queue.borrow_mut().push_back(command);
        self.maybe_continue_current_action();
    }

    fn maybe_continue_current_action(&self) {
        let Some(device) = self.inner.device.borrow().clone() else { return };
        match device.current_action() {
            Some(fprint::ActionKind::Enroll) => {
                if let Some(template) = device.enroll_template() {
                    self.enroll(&device, template);
                }
            }
            Some(fprint::ActionKind::Verify) => {
                if let Some(print) = device.verify_template() {
                    self.verify(&device, print);
                }
            }
            _ => {}
        }
    }

    pub fn stored_ids(&self) -> Vec<String> {
        self.inner.storage.borrow().iter().cloned().collect()
    }

    /// Drains `Insert`/`Remove` immediately (they apply regardless of
    /// whether a scan is in progress, per the original's `process_cmds`);
    /// returns the next scan-relevant command, if any.
    fn next_scan_command(&self) -> Option<Command> {
        loop {
            let next = self.inner.queue.borrow_mut().pop_front()?;
            match next {
                Command::Insert(id) => {
                    self.inner.storage.borrow_mut().insert(id);
                }
                Command::Remove(id) => {
                    if !self.inner.storage.borrow_mut().remove(&id) {
                        log::warn!("id {} was not found in storage", id);
                    }
                }
                other => return Some(other),
            }
        }
    }

    fn scan_print(&self, scan_id: &str) -> Print {
        let mut print = Print::new("virtual scan");
        print.set_type(PrintType::Raw);
        print.device_stored = self.inner.storage.borrow().contains(scan_id);
        print.data = scan_id.as_bytes().to_vec();
        print
    }
}

impl Driver for VirtualDevice {
    fn supports_delete(&self) -> bool {
        true
    }

    fn supports_list(&self) -> bool {
        true
    }

    fn supports_clear(&self) -> bool {
        true
    }

    fn open(&self, device: &fprint::device::Device) {
        *self.inner.device.borrow_mut() = Some(device.clone());
        device.open_complete(None);
    }

    fn close(&self, device: &fprint::device::Device) {
        *self.inner.enroll_stages_passed.borrow_mut() = 0;
        device.close_complete(None);
    }

    /// Consumes at most one scan-worthy command, the way the original's
    /// `dev_verify`/`dev_enroll` process one queued instruction per
    /// invocation. When the queue is empty this just returns, leaving the
    /// action in flight: a later [`VirtualDevice::push_command`] resumes it
    /// via `maybe_continue_current_action` instead of timing out, since
    /// there is no watchdog clock to drive here.
    fn verify(&self, device: &fprint::device::Device, print: Print) {
        match self.next_scan_command() {
            Some(Command::Scan(scan_id)) => {
                let scanned = self.scan_print(&scan_id);
                let matched = scanned == print;
                device.verify_report(
                    if matched {
                        fprint::MatchResult::Match
                    } else {
                        fprint::MatchResult::NoMatch
                    },
                    Some(scanned),
                );
                device.verify_complete(None);
            }
            Some(Command::Error(e)) => {
                device.verify_complete(Some(e));
            }
            Some(Command::Retry(r)) => {
                device.verify_report(fprint::MatchResult::Error(r), None);
                device.verify_complete(None);
            }
            Some(Command::Finger(present)) => {
                log::debug!("virtual device ignores a bare FINGER command during verify: {}", present);
                self.verify(device, print);
            }
            Some(Command::Insert(_)) | Some(Command::Remove(_)) => unreachable!("drained by next_scan_command"),
            None => {}
        }
    }

    /// Drains as many queued stages as are immediately available - a
    /// pre-scripted test can push all of an enrollment's scans up front and
    /// see it complete in one `device.enroll` round trip - then, same as
    /// `verify`, waits for `push_command` to resume it once the queue runs
    /// dry before the stage count is reached.
    fn enroll(&self, device: &fprint::device::Device, template: Print) {
        loop {
            match self.next_scan_command() {
                Some(Command::Scan(id)) => {
                    let mut stages = self.inner.enroll_stages_passed.borrow_mut();
                    *stages += 1;
                    let stage = *stages;
                    drop(stages);

                    let mut print = template.clone();
                    print.set_type(PrintType::Raw);
                    print.data = id.as_bytes().to_vec();

                    device.enroll_progress(stage, Some(print.clone()), None);
                    if stage == device.nr_enroll_stages() {
                        self.inner.storage.borrow_mut().insert(id);
                        print.device_stored = true;
                        *self.inner.enroll_stages_passed.borrow_mut() = 0;
                        device.enroll_complete(Some(print), None);
                        return;
                    }
                }
                Some(Command::Error(e)) => {
                    *self.inner.enroll_stages_passed.borrow_mut() = 0;
                    device.enroll_complete(None, Some(e));
                    return;
                }
                Some(Command::Retry(r)) => {
                    let stage = *self.inner.enroll_stages_passed.borrow();
                    device.enroll_progress(stage, None, Some(r));
                    return;
                }
                Some(Command::Finger(present)) => {
                    log::debug!("virtual device ignores a bare FINGER command during enroll: {}", present);
                }
                Some(Command::Insert(_)) | Some(Command::Remove(_)) => unreachable!("drained by next_scan_command"),
                None => return,
            }
        }
    }

    fn delete(&self, device: &fprint::device::Device, print: Print) {
        let id = String::from_utf8_lossy(&print.data).into_owned();
        self.inner.storage.borrow_mut().remove(&id);
        device.delete_complete(None);
    }

    fn list(&self, device: &fprint::device::Device) {
        let prints = self
            .inner
            .storage
            .borrow()
            .iter()
            .map(|id| {
                let mut print = Print::new("stored print");
                print.set_type(PrintType::Raw);
                print.device_stored = true;
                print.data = id.as_bytes().to_vec();
                print
            })
            .collect();
        device.list_complete(Some(prints), None);
    }

    fn clear(&self, device: &fprint::device::Device) {
        self.inner.storage.borrow_mut().clear();
        device.clear_complete(None);
    }
}

/// Builds a ready-to-use device on top of a [`VirtualDevice`], the way a
/// test would reach for `Device::new` with a real driver. Pulled out as
/// its own helper since every test needs the same boilerplate.
pub fn new_device(reactor: Reactor) -> (fprint::device::Device, std::rc::Rc<VirtualDevice>) {
    let driver = std::rc::Rc::new(VirtualDevice::new(reactor.clone()));
    let device = fprint::device::Device::new(fprint::device::DeviceParams {
        driver_id: "virtual_device".to_string(),
        device_id: "0".to_string(),
        name: "Virtual device for debugging".to_string(),
        nr_enroll_stages: 5,
        scan_type: ScanType::Press,
        features: fprint::device::Features {
            supports_identify: false,
            supports_capture: false,
            has_storage: true,
            duplicates_check: true,
        },
        transport: fprint::device::Transport::Virtual("FP_VIRTUAL_DEVICE".to_string()),
        driver_data: 0,
        reactor,
        driver: driver.clone(),
    });
    (device, driver)
}
