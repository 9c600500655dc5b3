//! The SDCP session layer (§4.4): ECDH handshake, claim verification,
//! fast reconnect, and MAC-authenticated enroll/identify/verify, built on
//! top of the device base the same way [`crate::image_device`] is -
//! [`SdcpAdapter`] implements [`Driver`] and delegates to a narrower
//! [`SdcpDriver`] a concrete sensor implements.
//!
//! Grounded on `libfprint/fpi-sdcp-device.c` / `fp-sdcp-device.c` for the
//! protocol sequencing; the cryptography itself lives in the `crypto`
//! crate (ECDH, the SP 800-108 KDF, HMAC tagging, claim verification).

use crate::device::Device;
use crate::driver::Driver;
use crate::error::DeviceError;
use crate::print::{Print, PrintType};
use crypto::{Claim, HostKeypair};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// What a concrete SDCP-speaking sensor implements. `adapter` is handed
/// back into every call so the driver can complete it asynchronously
/// once its own USB exchange (an SSM, typically) finishes.
pub trait SdcpDriver {
    fn open_transport(&self, device: &Device);
    fn close_transport(&self, device: &Device);

    /// Full handshake (§4.4 "Connect"): the driver sends `host_random`
    /// and the host's ephemeral public point, and must eventually call
    /// [`SdcpAdapter::connect_complete`].
    fn connect(&self, device: &Device, adapter: &Rc<SdcpAdapter>, host_random: [u8; 32], host_point: [u8; 65]);

    /// Fast path (§4.4 "Reconnect"): only invoked while a `mac_secret`
    /// from a prior connect is still held. The driver must eventually
    /// call [`SdcpAdapter::reconnect_complete`].
    fn reconnect(&self, device: &Device, adapter: &Rc<SdcpAdapter>, host_random: [u8; 32]);

    /// The driver captures and, exactly once during the action, must
    /// call [`SdcpAdapter::enroll_set_nonce`]; it then eventually calls
    /// [`SdcpAdapter::enroll_ready`].
    fn enroll(&self, device: &Device, adapter: &Rc<SdcpAdapter>, template: Print);

    /// Commits the enrollment with `id` (`None` if the base class
    /// rejected the enroll - see [`SdcpAdapter::enroll_ready`]); the
    /// driver must eventually call
    /// [`SdcpAdapter::enroll_commit_complete`].
    fn enroll_commit(&self, device: &Device, adapter: &Rc<SdcpAdapter>, id: Option<Vec<u8>>);

    /// Shared by verify and identify (§4.4 "Identify / verify"): the
    /// driver scans and must eventually call
    /// [`SdcpAdapter::identify_complete_raw`] or
    /// [`SdcpAdapter::identify_retry`].
    fn identify(&self, device: &Device, adapter: &Rc<SdcpAdapter>, host_random: [u8; 32]);

    fn cancel(&self, device: &Device) {
        let _ = device;
    }
}

enum PendingAction {
    Verify { target: Print },
    Identify { gallery: Vec<Print> },
}

struct Session {
    intermediate_cas: Vec<Vec<u8>>,
    keypair: RefCell<Option<HostKeypair>>,
    host_random: RefCell<Option<[u8; 32]>>,
    master_secret: RefCell<Option<Vec<u8>>>,
    mac_secret: RefCell<Option<Vec<u8>>>,
}

impl Drop for Session {
    /// Wipes the retained secrets rather than leaving them for the
    /// allocator to hand back unscrubbed - the one piece of key material
    /// in this session that outlives a single connect/reconnect round
    /// (§3 "master/MAC secrets persist until the next full connect").
    fn drop(&mut self) {
        use zeroize::Zeroize;
        if let Some(secret) = self.master_secret.get_mut() {
            secret.zeroize();
        }
        if let Some(secret) = self.mac_secret.get_mut() {
            secret.zeroize();
        }
    }
}

struct Inner {
    driver: Rc<dyn SdcpDriver>,
    session: Session,
    pending_nonce: RefCell<Option<Vec<u8>>>,
    pending_action: RefCell<Option<PendingAction>>,
    self_weak: RefCell<Weak<SdcpAdapter>>,
}

/// Wraps a driver's [`SdcpDriver`] implementation into the §4.4 session
/// protocol. Handed to [`Device::new`] as the device's driver.
pub struct SdcpAdapter {
    inner: Inner,
}

impl SdcpAdapter {
    pub fn new(driver: Rc<dyn SdcpDriver>, intermediate_cas: Vec<Vec<u8>>) -> Rc<Self> {
        let adapter = Rc::new(SdcpAdapter {
            inner: Inner {
                driver,
                session: Session {
                    intermediate_cas,
                    keypair: RefCell::new(None),
                    host_random: RefCell::new(None),
                    master_secret: RefCell::new(None),
                    mac_secret: RefCell::new(None),
                },
                pending_nonce: RefCell::new(None),
                pending_action: RefCell::new(None),
                self_weak: RefCell::new(Weak::new()),
            },
        });
        *adapter.inner.self_weak.borrow_mut() = Rc::downgrade(&adapter);
        adapter
    }

    fn rc(&self) -> Rc<Self> {
        self.inner
            .self_weak
            .borrow()
            .upgrade()
            .expect("SdcpAdapter used after being dropped")
    }

    fn begin_connect(self: &Rc<Self>, device: &Device) {
        let keypair = HostKeypair::generate();
        let host_random = crypto::random_host_random();
        let host_point = *keypair.public_point();
        *self.inner.session.keypair.borrow_mut() = Some(keypair);
        *self.inner.session.host_random.borrow_mut() = Some(host_random);
        self.inner.driver.connect(device, self, host_random, host_point);
    }

    /// Called by the driver once the transport has delivered the
    /// device's response to `connect` (§4.4 step 2-5).
    pub fn connect_complete(
        self: &Rc<Self>,
        device: &Device,
        device_random: Option<[u8; 32]>,
        claim: Option<Claim>,
        mac: Option<[u8; 32]>,
        error: Option<DeviceError>,
    ) {
        if let Some(e) = error {
            device.open_complete(Some(e));
            return;
        }
        let (device_random, claim, mac) = match (device_random, claim, mac) {
            (Some(r), Some(c), Some(m)) => (r, c, m),
            _ => {
                log::warn!("connect_complete missing required fields with no error");
                device.open_complete(Some(DeviceError::Proto));
                return;
            }
        };

        let keypair = match self.inner.session.keypair.borrow_mut().take() {
            Some(k) => k,
            None => {
                device.open_complete(Some(DeviceError::Proto));
                return;
            }
        };
        let host_random = match self.inner.session.host_random.borrow().clone() {
            Some(r) => r,
            None => {
                device.open_complete(Some(DeviceError::Proto));
                return;
            }
        };

        let shared = match keypair.shared_secret(&claim.pk_f) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("ECDH agreement with the firmware key failed: {}", e);
                device.open_complete(Some(DeviceError::Untrusted));
                return;
            }
        };
        let master = match crypto::derive_master_secret(&shared, &host_random, &device_random) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("master secret derivation failed: {}", e);
                device.open_complete(Some(DeviceError::General));
                return;
            }
        };
        let (_enc, mac_secret) = match crypto::derive_application_keys(&master) {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("application key derivation failed: {}", e);
                device.open_complete(Some(DeviceError::General));
                return;
            }
        };

        let claim_hash = claim.hash();
        if !crypto::mac_verify(&mac_secret, "connect", &[&claim_hash], &mac) {
            device.open_complete(Some(DeviceError::Untrusted));
            return;
        }

        if crypto::verify_claim(&claim, &self.inner.session.intermediate_cas).is_err() {
            device.open_complete(Some(DeviceError::Untrusted));
            return;
        }

        *self.inner.session.master_secret.borrow_mut() = Some(master);
        *self.inner.session.mac_secret.borrow_mut() = Some(mac_secret);
        device.open_complete(None);
    }

    /// Called by the driver once the transport has delivered the
    /// device's reconnect MAC (§4.4 "Reconnect"). A mismatch or error
    /// falls back to a full connect rather than failing the open.
    pub fn reconnect_complete(self: &Rc<Self>, device: &Device, mac: Option<[u8; 32]>, error: Option<DeviceError>) {
        let mac_secret = self.inner.session.mac_secret.borrow().clone();
        let host_random = self.inner.session.host_random.borrow().clone();
        let (mac_secret, host_random) = match (mac_secret, host_random, mac, error) {
            (Some(secret), Some(r_h), Some(mac), None) => (secret, r_h, mac),
            _ => {
                log::debug!("reconnect unavailable; falling back to full connect");
                self.begin_connect(device);
                return;
            }
        };
        if crypto::mac_verify(&mac_secret, "reconnect", &[&host_random], &mac) {
            device.open_complete(None);
        } else {
            log::debug!("reconnect MAC mismatch; falling back to full connect");
            self.begin_connect(device);
        }
    }

    /// The driver's one-shot nonce report during enroll (§4.4
    /// "Enroll"). A second call is a driver bug and is ignored with a
    /// logged warning, matching the base class's "driver misuse never
    /// panics" rule.
    pub fn enroll_set_nonce(&self, nonce: Vec<u8>) {
        let mut slot = self.inner.pending_nonce.borrow_mut();
        if slot.is_some() {
            log::warn!("enroll_set_nonce called more than once; ignoring the extra call");
            return;
        }
        *slot = Some(nonce);
    }

    /// Completes the nonce phase of enroll (§4.4 step "On
    /// enroll_ready(error)"). Computes the enrollment id and asks the
    /// driver to commit it, unless no nonce was ever set or the driver
    /// reported an error - in which case the commit proceeds with
    /// `id=None` and the action is ultimately failed with `Proto`.
    pub fn enroll_ready(self: &Rc<Self>, device: &Device, error: Option<DeviceError>) {
        let nonce = self.inner.pending_nonce.borrow_mut().take();
        match (nonce, error) {
            (Some(nonce), None) => {
                let mac_secret = self.inner.session.mac_secret.borrow().clone();
                let Some(mac_secret) = mac_secret else {
                    self.inner.driver.enroll_commit(device, self, None);
                    return;
                };
                let id = match crypto::mac_tag(&mac_secret, "enroll", &[&nonce]) {
                    Ok(tag) => tag.to_vec(),
                    Err(e) => {
                        log::warn!("enroll id tag failed: {}", e);
                        self.inner.driver.enroll_commit(device, self, None);
                        return;
                    }
                };
                self.inner.driver.enroll_commit(device, self, Some(id));
            }
            _ => {
                self.inner.driver.enroll_commit(device, self, None);
            }
        }
    }

    /// Completes the commit phase (§4.4 "Enroll"). `id=None` always
    /// surfaces a latched `Proto` error, regardless of what the driver
    /// reports, since that path only exists for the
    /// no-nonce-or-errored case.
    pub fn enroll_commit_complete(&self, device: &Device, committed_id: Option<Vec<u8>>, error: Option<DeviceError>) {
        match (committed_id, error) {
            (Some(id), None) => {
                let mut print = device.enroll_template().unwrap_or_else(|| Print::new("sdcp enrolled print"));
                print.set_type(PrintType::Sdcp);
                print.device_stored = true;
                print.data = id;
                device.enroll_complete(Some(print), None);
            }
            (_, Some(e)) => device.enroll_complete(None, Some(e)),
            (None, None) => device.enroll_complete(None, Some(DeviceError::Proto)),
        }
    }

    fn begin_identify(self: &Rc<Self>, device: &Device) {
        let host_random = crypto::random_host_random();
        *self.inner.session.host_random.borrow_mut() = Some(host_random);
        self.inner.driver.identify(device, self, host_random);
    }

    /// Completes the verify/identify driver round (§4.4 "Identify /
    /// verify"): MAC-verifies `id` against the round's `host_random`,
    /// then compares the resulting print against whichever target
    /// (verify's single print, or identify's gallery) started the
    /// action.
    pub fn identify_complete_raw(
        self: &Rc<Self>,
        device: &Device,
        id: Option<Vec<u8>>,
        mac: Option<[u8; 32]>,
        error: Option<DeviceError>,
    ) {
        use crate::action::MatchResult;
        let pending = self.inner.pending_action.borrow_mut().take();

        if let Some(e) = error {
            self.finish_identify(device, pending, MatchResult::Error(crate::error::DeviceRetry::General), None, Some(e));
            return;
        }
        let (Some(id), Some(mac)) = (id, mac) else {
            self.finish_identify(device, pending, MatchResult::Error(crate::error::DeviceRetry::General), None, Some(DeviceError::Proto));
            return;
        };
        let Some(mac_secret) = self.inner.session.mac_secret.borrow().clone() else {
            self.finish_identify(device, pending, MatchResult::Error(crate::error::DeviceRetry::General), None, Some(DeviceError::Untrusted));
            return;
        };
        let Some(host_random) = self.inner.session.host_random.borrow().clone() else {
            self.finish_identify(device, pending, MatchResult::Error(crate::error::DeviceRetry::General), None, Some(DeviceError::Proto));
            return;
        };
        if !crypto::mac_verify(&mac_secret, "identify", &[&host_random, &id], &mac) {
            self.finish_identify(device, pending, MatchResult::Error(crate::error::DeviceRetry::General), None, Some(DeviceError::Untrusted));
            return;
        }

        let mut scanned = Print::new("sdcp scan");
        scanned.set_type(PrintType::Sdcp);
        scanned.device_stored = true;
        scanned.data = id;

        match pending {
            Some(PendingAction::Verify { target }) => {
                let matched = scanned == target;
                device.verify_report(
                    if matched { MatchResult::Match } else { MatchResult::NoMatch },
                    Some(scanned),
                );
                device.verify_complete(None);
            }
            Some(PendingAction::Identify { gallery }) => {
                let matched_print = gallery.into_iter().find(|candidate| *candidate == scanned);
                device.identify_report(matched_print, Some(scanned), None);
                device.identify_complete(None);
            }
            None => {
                log::error!("identify_complete_raw fired with no pending verify/identify action");
            }
        }
    }

    fn finish_identify(
        &self,
        device: &Device,
        pending: Option<PendingAction>,
        result: crate::action::MatchResult,
        scanned: Option<Print>,
        error: Option<DeviceError>,
    ) {
        match pending {
            Some(PendingAction::Verify { .. }) => {
                device.verify_report(result, scanned);
                device.verify_complete(error);
            }
            Some(PendingAction::Identify { .. }) => {
                let retry = match result {
                    crate::action::MatchResult::Error(r) => Some(r),
                    _ => None,
                };
                device.identify_report(None, scanned, retry);
                device.identify_complete(error);
            }
            None => {
                log::error!("identify/verify failed with no pending action to report through");
            }
        }
    }

    /// Reports a non-terminal retry during verify/identify (§4.4
    /// "identify_retry(error) surfaces a retry without completing the
    /// action").
    pub fn identify_retry(&self, device: &Device, retry: crate::error::DeviceRetry) {
        match self.inner.pending_action.borrow().as_ref() {
            Some(PendingAction::Verify { .. }) => {
                device.verify_report(crate::action::MatchResult::Error(retry), None);
            }
            Some(PendingAction::Identify { .. }) => {
                device.identify_report(None, None, Some(retry));
            }
            None => {}
        }
    }
}

impl Driver for SdcpAdapter {
    fn supports_identify(&self) -> bool {
        true
    }

    fn supports_cancel(&self) -> bool {
        true
    }

    fn open(&self, device: &Device) {
        self.inner.driver.open_transport(device);
        let rc = self.rc();
        if rc.inner.session.mac_secret.borrow().is_some() {
            let host_random = crypto::random_host_random();
            *rc.inner.session.host_random.borrow_mut() = Some(host_random);
            rc.inner.driver.reconnect(device, &rc, host_random);
        } else {
            rc.begin_connect(device);
        }
    }

    fn close(&self, device: &Device) {
        // `master_secret`/`mac_secret` deliberately survive close (§3 "SDCP
        // session": they persist until the next full connect) so a later
        // open can reconnect instead of repeating the full handshake.
        self.inner.driver.close_transport(device);
    }

    fn enroll(&self, device: &Device, template: Print) {
        self.inner.driver.enroll(device, &self.rc(), template);
    }

    fn verify(&self, device: &Device, print: Print) {
        *self.inner.pending_action.borrow_mut() = Some(PendingAction::Verify { target: print });
        self.rc().begin_identify(device);
    }

    fn identify(&self, device: &Device, gallery: Vec<Print>) {
        *self.inner.pending_action.borrow_mut() = Some(PendingAction::Identify { gallery });
        self.rc().begin_identify(device);
    }

    fn cancel(&self, device: &Device) {
        self.inner.driver.cancel(device);
    }
}
