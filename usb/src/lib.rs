//! The USB transport collaborator (§6). Driver protocol payload encodings
//! and the platform-specific submission of transfers are explicitly out of
//! scope (§1) - this crate only pins down the trait boundary a driver's SSMs
//! program against, plus a deterministic fake used in tests.

use common::errors::Result;
use reactor::Reactor;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

#[derive(Debug, Clone, Copy)]
pub struct ControlSetup {
    pub direction: Direction,
    pub recipient: Recipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

/// Transport-level failure. A cancelled transfer surfaces as
/// [`TransferError::Cancelled`] which the device base class maps to a
/// generic `Cancelled` completion (§7).
#[derive(Debug, Clone)]
pub enum TransferError {
    Cancelled,
    Timeout,
    Stall,
    NoDevice,
    Io(String),
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::Cancelled => write!(f, "transfer cancelled"),
            TransferError::Timeout => write!(f, "transfer timed out"),
            TransferError::Stall => write!(f, "endpoint stalled"),
            TransferError::NoDevice => write!(f, "device disconnected"),
            TransferError::Io(msg) => write!(f, "usb i/o error: {}", msg),
        }
    }
}

impl std::error::Error for TransferError {}

pub struct TransferResult {
    pub data: Vec<u8>,
    pub error: Option<TransferError>,
}

impl TransferResult {
    pub fn ok(data: Vec<u8>) -> Self {
        Self { data, error: None }
    }

    pub fn failed(error: TransferError) -> Self {
        Self {
            data: Vec::new(),
            error: Some(error),
        }
    }
}

pub type TransferCallback = Box<dyn FnOnce(TransferResult)>;

/// Submits bulk/control/interrupt transfers against one claimed USB
/// interface. Every `submit_*` call delivers its result through `callback`
/// on a later reactor iteration, never synchronously - SSMs rely on this to
/// avoid reentrancy the same way action completions do (§5).
pub trait UsbTransport {
    fn claim_interface(&self, number: u8) -> Result<()>;
    fn release_interface(&self, number: u8) -> Result<()>;
    fn reset(&self) -> Result<()>;

    fn submit_bulk(
        &self,
        endpoint: u8,
        buffer: Vec<u8>,
        timeout_ms: u32,
        cancel: Option<common::CancellationToken>,
        callback: TransferCallback,
    );

    fn submit_control(
        &self,
        setup: ControlSetup,
        buffer: Vec<u8>,
        timeout_ms: u32,
        callback: TransferCallback,
    );

    fn submit_interrupt(
        &self,
        endpoint: u8,
        length: usize,
        timeout_ms: u32,
        cancel: Option<common::CancellationToken>,
        callback: TransferCallback,
    );
}

/// A USB id-table entry: the (vid, pid) a driver claims to handle, plus the
/// opaque `driver_data` passed through to the constructed device (§6,
/// "Device identification").
#[derive(Debug, Clone, Copy)]
pub struct IdEntry {
    pub vendor_id: u16,
    pub product_id: u16,
    pub driver_data: u64,
}

/// A scripted, in-process transport used by driver tests. Every submission
/// is queued; [`FakeTransport::respond_next`] completes the oldest pending
/// one on the next reactor idle iteration, mirroring how a real transport
/// only ever resolves asynchronously.
#[derive(Clone)]
pub struct FakeTransport {
    reactor: Reactor,
    state: Rc<RefCell<FakeState>>,
}

#[derive(Default)]
struct FakeState {
    claimed: Vec<u8>,
    pending: std::collections::VecDeque<TransferCallback>,
    reset_count: u32,
}

impl FakeTransport {
    pub fn new(reactor: Reactor) -> Self {
        Self {
            reactor,
            state: Rc::new(RefCell::new(FakeState::default())),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn reset_count(&self) -> u32 {
        self.state.borrow().reset_count
    }

    /// Completes the oldest queued transfer with `result`, deferred to the
    /// next reactor iteration.
    pub fn respond_next(&self, result: TransferResult) {
        let cb = self.state.borrow_mut().pending.pop_front();
        if let Some(cb) = cb {
            self.reactor.defer_idle(move || cb(result));
        }
    }

    fn enqueue(
        &self,
        cancel: Option<common::CancellationToken>,
        callback: TransferCallback,
    ) {
        if let Some(cancel) = cancel {
            if cancel.is_cancelled() {
                self.reactor
                    .defer_idle(move || callback(TransferResult::failed(TransferError::Cancelled)));
                return;
            }
        }
        self.state.borrow_mut().pending.push_back(callback);
    }
}

impl UsbTransport for FakeTransport {
    fn claim_interface(&self, number: u8) -> Result<()> {
        self.state.borrow_mut().claimed.push(number);
        Ok(())
    }

    fn release_interface(&self, number: u8) -> Result<()> {
        self.state.borrow_mut().claimed.retain(|n| *n != number);
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        self.state.borrow_mut().reset_count += 1;
        Ok(())
    }

    fn submit_bulk(
        &self,
        _endpoint: u8,
        _buffer: Vec<u8>,
        _timeout_ms: u32,
        cancel: Option<common::CancellationToken>,
        callback: TransferCallback,
    ) {
        self.enqueue(cancel, callback);
    }

    fn submit_control(
        &self,
        _setup: ControlSetup,
        _buffer: Vec<u8>,
        _timeout_ms: u32,
        callback: TransferCallback,
    ) {
        self.enqueue(None, callback);
    }

    fn submit_interrupt(
        &self,
        _endpoint: u8,
        _length: usize,
        _timeout_ms: u32,
        cancel: Option<common::CancellationToken>,
        callback: TransferCallback,
    ) {
        self.enqueue(cancel, callback);
    }
}
