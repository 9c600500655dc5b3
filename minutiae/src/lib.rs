//! The minutiae-comparison collaborator (§6). NBIS/SIGFM numerics are
//! explicitly out of scope (§1) - this crate only pins down the boundary the
//! image-device pipeline (fprint::image_device) programs against, plus a
//! deterministic fake used in tests.

use common::errors::Result;
use reactor::Reactor;
use std::cell::RefCell;
use std::rc::Rc;

/// A raw capture from an image-based sensor.
#[derive(Debug, Clone)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Ridge-detail features extracted from an [`Image`]. Opaque to every layer
/// above the minutiae engine; carried around as a driver-owned blob once
/// computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Minutiae(pub Vec<u8>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Success,
    Fail,
}

pub type DetectCallback = Box<dyn FnOnce(Result<Minutiae>)>;

/// Detects minutiae from an image and scores a probe against a template
/// with the classical Bozorth3 algorithm. Both operations are async because
/// real implementations (NBIS) are CPU-heavy enough to want to run off the
/// reactor thread and post back; the result still only ever arrives via
/// `callback`, deferred like every other asynchronous boundary (§5).
pub trait MinutiaeEngine {
    fn detect_minutiae(&self, image: Image, callback: DetectCallback);

    fn bozorth3_match(
        &self,
        template: &Minutiae,
        probe: &Minutiae,
        threshold: u32,
    ) -> Result<MatchOutcome>;
}

/// A scripted fake: `detect_minutiae` just echoes the image bytes back as
/// the minutiae blob (deferred via the reactor, so callers still observe
/// the §5 "never synchronously" rule), and `bozorth3_match` succeeds iff the
/// two blobs are bytewise equal.
#[derive(Clone)]
pub struct FakeMinutiaeEngine {
    reactor: Reactor,
    fail_next_detect: Rc<RefCell<bool>>,
}

impl FakeMinutiaeEngine {
    pub fn new(reactor: Reactor) -> Self {
        Self {
            reactor,
            fail_next_detect: Rc::new(RefCell::new(false)),
        }
    }

    pub fn fail_next_detect(&self) {
        *self.fail_next_detect.borrow_mut() = true;
    }
}

impl MinutiaeEngine for FakeMinutiaeEngine {
    fn detect_minutiae(&self, image: Image, callback: DetectCallback) {
        let should_fail = std::mem::replace(&mut *self.fail_next_detect.borrow_mut(), false);
        self.reactor.defer_idle(move || {
            if should_fail {
                callback(Err(common::errors::err_msg("minutiae detection failed")));
            } else {
                callback(Ok(Minutiae(image.pixels)));
            }
        });
    }

    fn bozorth3_match(
        &self,
        template: &Minutiae,
        probe: &Minutiae,
        _threshold: u32,
    ) -> Result<MatchOutcome> {
        Ok(if template == probe {
            MatchOutcome::Success
        } else {
            MatchOutcome::Fail
        })
    }
}
