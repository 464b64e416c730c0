//! Transfer assembly: turning raw client fields into a mailable package

pub mod assembler;

pub use assembler::TransferAssembler;

/// A decoded file riding along with the transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Normalized payload of one submission. Both halves may be absent; such a
/// package still goes out with the boilerplate body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPackage {
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
}

impl TransferPackage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            attachment: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.attachment.is_none()
    }

    /// Text bytes plus decoded attachment bytes
    pub fn size(&self) -> usize {
        self.text.as_ref().map_or(0, |t| t.len())
            + self.attachment.as_ref().map_or(0, |a| a.bytes.len())
    }
}
