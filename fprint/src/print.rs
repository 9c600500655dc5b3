//! `Print`: an opaque matchable fingerprint record (§3 "Print").

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintType {
    Undefined,
    Raw,
    Nbis,
    Sdcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finger {
    LeftThumb,
    LeftIndex,
    LeftMiddle,
    LeftRing,
    LeftLittle,
    RightThumb,
    RightIndex,
    RightMiddle,
    RightRing,
    RightLittle,
}

#[derive(Debug, Clone, Default)]
pub struct Print {
    pub print_type: PrintTypeSlot,
    pub device_stored: bool,
    pub description: String,
    pub username: Option<String>,
    pub finger: Option<Finger>,
    pub data: Vec<u8>,
}

/// Wraps `PrintType` so `Print` can derive `Default` without requiring
/// every driver to spell out `PrintType::Undefined` by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintTypeSlot(pub PrintType);

impl Default for PrintTypeSlot {
    fn default() -> Self {
        PrintTypeSlot(PrintType::Undefined)
    }
}

impl Print {
    pub fn new(description: impl Into<String>) -> Self {
        Print {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn print_type(&self) -> PrintType {
        self.print_type.0
    }

    pub fn set_type(&mut self, t: PrintType) {
        self.print_type = PrintTypeSlot(t);
    }
}

impl PartialEq for Print {
    /// Two prints are equal iff their `(type, data)` match per the
    /// type-specific rule (§3): raw/nbis/sdcp prints compare their opaque
    /// `data` blobs byte-for-byte; an `undefined` print never matches
    /// anything, including another undefined print, since it is a
    /// caller-supplied enroll template rather than a comparable record.
    fn eq(&self, other: &Self) -> bool {
        match (self.print_type(), other.print_type()) {
            (PrintType::Undefined, _) | (_, PrintType::Undefined) => false,
            (a, b) if a == b => self.data == other.data,
            _ => false,
        }
    }
}
