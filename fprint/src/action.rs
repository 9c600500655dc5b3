//! The action slot (§3 "Action slot"): the one in-flight operation a
//! [`Device`](crate::device::Device) may hold at a time, its kind, its
//! driver-facing input, and the completion sink that eventually carries a
//! result back out to the application.

use crate::error::{ActionError, DeviceRetry};
use crate::print::Print;
use minutiae::Image;

/// The ten action kinds the base class dispatches (§3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Probe,
    Open,
    Close,
    Enroll,
    Verify,
    Identify,
    Capture,
    Delete,
    List,
    Clear,
}

/// One `verify_report` call (§4.1 "Verify / identify result reporting").
/// A retry-domain error during verify is delivered as `result =
/// MatchResult::Error` carrying the retry reason, per §7.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub result: MatchResult,
    pub scanned_print: Option<Print>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Match,
    NoMatch,
    Error(DeviceRetry),
}

/// One `identify_report` call.
#[derive(Debug, Clone)]
pub struct IdentifyReport {
    pub matched_print: Option<Print>,
    pub scanned_print: Option<Print>,
    pub retry: Option<DeviceRetry>,
}

/// What `enroll_complete` eventually hands back: the aggregated template
/// plus every progress report observed along the way.
pub struct EnrollOutcome {
    pub print: Print,
}

pub struct VerifyOutcome {
    pub matched: bool,
    pub reports: Vec<VerifyReport>,
}

pub struct IdentifyOutcome {
    pub matched_print: Option<Print>,
    pub reports: Vec<IdentifyReport>,
}

pub type ProgressCallback = Box<dyn FnMut(i32, Option<Print>, Option<DeviceRetry>)>;

/// Per-kind input a caller supplies when starting an action (§3 "Action
/// slot").
pub enum ActionInput {
    Probe,
    Open,
    Close,
    Enroll {
        template: Print,
        progress: ProgressCallback,
    },
    Verify {
        print: Print,
    },
    Identify {
        gallery: Vec<Print>,
    },
    Capture {
        wait_for_finger: bool,
    },
    Delete {
        print: Print,
    },
    List,
    Clear,
}

impl ActionInput {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionInput::Probe => ActionKind::Probe,
            ActionInput::Open => ActionKind::Open,
            ActionInput::Close => ActionKind::Close,
            ActionInput::Enroll { .. } => ActionKind::Enroll,
            ActionInput::Verify { .. } => ActionKind::Verify,
            ActionInput::Identify { .. } => ActionKind::Identify,
            ActionInput::Capture { .. } => ActionKind::Capture,
            ActionInput::Delete { .. } => ActionKind::Delete,
            ActionInput::List => ActionKind::List,
            ActionInput::Clear => ActionKind::Clear,
        }
    }
}

/// The completion sink for one in-flight action: a single `FnOnce`,
/// already specialized to the result type the action kind produces. The
/// base class fires exactly one of these per action. `fail` itself runs
/// the closure synchronously, so every call site is required to reach it
/// from inside a [`reactor::Reactor::defer_idle`] callback, never
/// straight from the caller's stack (§5, §8.2).
pub enum CompletionSink {
    Probe(Box<dyn FnOnce(Result<(), ActionError>)>),
    Open(Box<dyn FnOnce(Result<(), ActionError>)>),
    Close(Box<dyn FnOnce(Result<(), ActionError>)>),
    Enroll(Box<dyn FnOnce(Result<EnrollOutcome, ActionError>)>),
    Verify(Box<dyn FnOnce(Result<VerifyOutcome, ActionError>)>),
    Identify(Box<dyn FnOnce(Result<IdentifyOutcome, ActionError>)>),
    Capture(Box<dyn FnOnce(Result<Image, ActionError>)>),
    Delete(Box<dyn FnOnce(Result<(), ActionError>)>),
    List(Box<dyn FnOnce(Result<Vec<Print>, ActionError>)>),
    Clear(Box<dyn FnOnce(Result<(), ActionError>)>),
}

impl CompletionSink {
    pub fn kind(&self) -> ActionKind {
        match self {
            CompletionSink::Probe(_) => ActionKind::Probe,
            CompletionSink::Open(_) => ActionKind::Open,
            CompletionSink::Close(_) => ActionKind::Close,
            CompletionSink::Enroll(_) => ActionKind::Enroll,
            CompletionSink::Verify(_) => ActionKind::Verify,
            CompletionSink::Identify(_) => ActionKind::Identify,
            CompletionSink::Capture(_) => ActionKind::Capture,
            CompletionSink::Delete(_) => ActionKind::Delete,
            CompletionSink::List(_) => ActionKind::List,
            CompletionSink::Clear(_) => ActionKind::Clear,
        }
    }

    /// Fires the sink with `error`, dropping whatever success payload a
    /// more specific completion would have carried. Used by
    /// `action_error` (§4.1 point 5) and by every admission-check
    /// rejection.
    pub fn fail(self, error: ActionError) {
        match self {
            CompletionSink::Probe(f) => f(Err(error)),
            CompletionSink::Open(f) => f(Err(error)),
            CompletionSink::Close(f) => f(Err(error)),
            CompletionSink::Enroll(f) => f(Err(error)),
            CompletionSink::Verify(f) => f(Err(error)),
            CompletionSink::Identify(f) => f(Err(error)),
            CompletionSink::Capture(f) => f(Err(error)),
            CompletionSink::Delete(f) => f(Err(error)),
            CompletionSink::List(f) => f(Err(error)),
            CompletionSink::Clear(f) => f(Err(error)),
        }
    }
}

/// Driver-accumulated state for the currently running action, kept
/// alongside the [`ActionInput`] so `verify_report`/`identify_report`
/// calls have somewhere to land before the terminal completion (§4.1
/// "Verify / identify result reporting").
#[derive(Default)]
pub struct ActionProgress {
    pub verify_reports: Vec<VerifyReport>,
    pub identify_reports: Vec<IdentifyReport>,
    pub enroll_stage: i32,
}
