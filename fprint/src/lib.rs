//! A cooperative, single-threaded fingerprint-device library: device
//! lifecycle and action serialization (§4.1), the Sequential State
//! Machine engine drivers compose protocols from (§4.2), a ready-made
//! image-sensor pipeline (§4.3), and an SDCP secure-session layer
//! (§4.4). Everything below the driver boundary runs on one [`reactor::Reactor`]
//! - no threads, no locks, every asynchronous result delivered through a
//! callback on the next reactor iteration.

pub mod action;
pub mod device;
pub mod driver;
pub mod error;
pub mod image_device;
pub mod print;
pub mod sdcp;
pub mod ssm;

pub use action::{
    ActionInput, ActionKind, ActionProgress, CompletionSink, EnrollOutcome, IdentifyOutcome,
    IdentifyReport, MatchResult, ProgressCallback, VerifyOutcome, VerifyReport,
};
pub use device::{Device, DeviceParams, Features, ScanType, Transport};
pub use driver::Driver;
pub use error::{ActionError, DeviceError, DeviceRetry};
pub use image_device::{ImageDeviceAdapter, ImageDriver, ImageState};
pub use print::{Finger, Print, PrintType};
pub use sdcp::{SdcpAdapter, SdcpDriver};
pub use ssm::{usb_transfer_callback, Ssm};
