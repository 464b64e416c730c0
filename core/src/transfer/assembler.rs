//! Transfer Assembler: validates and decodes submitted payloads

use super::{Attachment, TransferPackage};
use crate::config::TransferConfig;
use crate::{Result, TransferError};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use tracing::debug;

/// Name used when the client sends bytes without a usable file name
pub const DEFAULT_ATTACHMENT_NAME: &str = "attachment.bin";

const MAX_FILENAME_CHARS: usize = 255;

/// Standard alphabet; trailing `=` optional
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone)]
pub struct TransferAssembler {
    max_payload_bytes: usize,
}

impl TransferAssembler {
    pub fn new(config: &TransferConfig) -> Self {
        Self::with_limit(config.max_payload_bytes)
    }

    pub fn with_limit(max_payload_bytes: usize) -> Self {
        Self { max_payload_bytes }
    }

    pub fn limit(&self) -> usize {
        self.max_payload_bytes
    }

    /// Build a [`TransferPackage`] from the raw client fields.
    ///
    /// `raw_file_data` is base64, optionally behind a `data:<mime>;base64,`
    /// header. Empty strings count as absent. Text plus decoded bytes may not
    /// exceed the configured limit; exactly the limit is accepted.
    pub fn assemble(
        &self,
        raw_text: Option<&str>,
        raw_file_data: Option<&str>,
        raw_file_name: Option<&str>,
    ) -> Result<TransferPackage> {
        let text = raw_text.filter(|t| !t.is_empty()).map(str::to_string);
        let text_len = text.as_ref().map_or(0, |t| t.len());
        self.check_size(text_len)?;

        let attachment = match raw_file_data.filter(|d| !d.trim().is_empty()) {
            Some(data) => self.decode_attachment(data, raw_file_name, text_len)?,
            None => {
                if raw_file_name.is_some() {
                    debug!("Ignoring file name without file data");
                }
                None
            }
        };

        let package = TransferPackage { text, attachment };
        self.check_size(package.size())?;
        Ok(package)
    }

    fn decode_attachment(
        &self,
        data: &str,
        raw_file_name: Option<&str>,
        text_len: usize,
    ) -> Result<Option<Attachment>> {
        let encoded: String = strip_data_uri_header(data)?
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();

        let filename = sanitize_filename(raw_file_name.unwrap_or_default());

        // A zero-byte file still travels as an attachment
        if encoded.is_empty() {
            debug!("Attachment {} is empty", filename);
            return Ok(Some(Attachment {
                filename,
                bytes: Vec::new(),
            }));
        }

        // Every 4 encoded chars yield at least 3 bytes minus padding; refuse
        // before decoding when even that cannot fit.
        let min_decoded = (encoded.len() / 4 * 3).saturating_sub(2);
        self.check_size(text_len + min_decoded)?;

        let bytes = LENIENT_BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| TransferError::InvalidAttachment(e.to_string()))?;

        debug!("Decoded attachment {} ({} bytes)", filename, bytes.len());

        Ok(Some(Attachment { filename, bytes }))
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_payload_bytes {
            return Err(TransferError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }
        Ok(())
    }
}

impl Default for TransferAssembler {
    fn default() -> Self {
        Self::new(&TransferConfig::default())
    }
}

/// Everything after the first `,` when a data-URI header is present
fn strip_data_uri_header(data: &str) -> Result<&str> {
    match data.split_once(',') {
        Some((header, body)) => {
            if !header.ends_with(";base64") {
                return Err(TransferError::InvalidAttachment(format!(
                    "unsupported data URI header: {}",
                    header
                )));
            }
            Ok(body)
        }
        None => Ok(data),
    }
}

/// Keep only the final path component, minus control characters
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_FILENAME_CHARS)
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        DEFAULT_ATTACHMENT_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use proptest::prelude::*;

    fn assembler(limit: usize) -> TransferAssembler {
        TransferAssembler::with_limit(limit)
    }

    #[test]
    fn test_text_only() {
        let package = TransferAssembler::default()
            .assemble(Some("hello"), None, None)
            .unwrap();

        assert_eq!(package.text.as_deref(), Some("hello"));
        assert!(package.attachment.is_none());
    }

    #[test]
    fn test_empty_package_is_accepted() {
        let package = TransferAssembler::default()
            .assemble(None, None, None)
            .unwrap();
        assert!(package.is_empty());

        let package = TransferAssembler::default()
            .assemble(Some(""), Some("  "), Some("ignored.txt"))
            .unwrap();
        assert!(package.is_empty());
    }

    #[test]
    fn test_plain_base64_attachment() {
        let encoded = STANDARD.encode(b"file contents");
        let package = TransferAssembler::default()
            .assemble(None, Some(&encoded), Some("notes.txt"))
            .unwrap();

        let attachment = package.attachment.unwrap();
        assert_eq!(attachment.filename, "notes.txt");
        assert_eq!(attachment.bytes, b"file contents");
    }

    #[test]
    fn test_data_uri_header_is_stripped() {
        let data = format!("data:application/pdf;base64,{}", STANDARD.encode([0u8, 1, 2, 255]));
        let package = TransferAssembler::default()
            .assemble(Some("see attached"), Some(&data), Some("scan.pdf"))
            .unwrap();

        assert_eq!(package.attachment.unwrap().bytes, vec![0u8, 1, 2, 255]);
    }

    #[test]
    fn test_missing_padding_and_whitespace_are_tolerated() {
        let package = TransferAssembler::default()
            .assemble(None, Some("aGVs\nbG8"), Some("a.txt"))
            .unwrap();
        assert_eq!(package.attachment.unwrap().bytes, b"hello");
    }

    #[test]
    fn test_malformed_base64_is_invalid_attachment() {
        let result = TransferAssembler::default().assemble(None, Some("not*base64!"), Some("x.bin"));
        assert!(matches!(result, Err(TransferError::InvalidAttachment(_))));
    }

    #[test]
    fn test_non_base64_data_uri_is_invalid_attachment() {
        let result =
            TransferAssembler::default().assemble(None, Some("data:text/plain,hello"), None);
        assert!(matches!(result, Err(TransferError::InvalidAttachment(_))));
    }

    #[test]
    fn test_zero_byte_file_is_kept() {
        let package = TransferAssembler::default()
            .assemble(None, Some("data:text/plain;base64,"), Some("empty.txt"))
            .unwrap();
        assert!(!package.is_empty());

        let attachment = package.attachment.expect("empty file kept");
        assert_eq!(attachment.filename, "empty.txt");
        assert!(attachment.bytes.is_empty());
    }

    #[test]
    fn test_missing_file_name_gets_default() {
        let encoded = STANDARD.encode(b"x");
        let package = TransferAssembler::default()
            .assemble(None, Some(&encoded), None)
            .unwrap();
        assert_eq!(package.attachment.unwrap().filename, DEFAULT_ATTACHMENT_NAME);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\report.docx"), "report.docx");
        assert_eq!(sanitize_filename("bad\u{0}name\n.txt"), "badname.txt");
        assert_eq!(sanitize_filename(".."), DEFAULT_ATTACHMENT_NAME);
        assert_eq!(sanitize_filename(""), DEFAULT_ATTACHMENT_NAME);
    }

    #[test]
    fn test_attachment_exactly_at_limit() {
        let bytes = vec![7u8; 10];
        let encoded = STANDARD.encode(&bytes);
        let package = assembler(10).assemble(None, Some(&encoded), Some("a.bin")).unwrap();
        assert_eq!(package.size(), 10);
    }

    #[test]
    fn test_attachment_one_over_limit() {
        let encoded = STANDARD.encode(vec![7u8; 11]);
        let result = assembler(10).assemble(None, Some(&encoded), Some("a.bin"));
        assert_eq!(
            result.unwrap_err(),
            TransferError::PayloadTooLarge { size: 11, limit: 10 }
        );
    }

    #[test]
    fn test_text_and_attachment_share_the_limit() {
        let encoded = STANDARD.encode(vec![1u8; 6]);
        assert!(assembler(10).assemble(Some("abcd"), Some(&encoded), None).is_ok());

        let result = assembler(10).assemble(Some("abcde"), Some(&encoded), None);
        assert!(matches!(result, Err(TransferError::PayloadTooLarge { size: 11, .. })));
    }

    #[test]
    fn test_oversized_text_alone() {
        let result = assembler(4).assemble(Some("hello"), None, None);
        assert!(matches!(result, Err(TransferError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_huge_blob_rejected_before_decoding() {
        // Invalid characters, but size is checked first
        let blob = "!".repeat(4_000);
        let result = assembler(100).assemble(None, Some(&blob), None);
        assert!(matches!(result, Err(TransferError::PayloadTooLarge { .. })));
    }

    proptest! {
        #[test]
        fn prop_size_bound_is_exact(len in 0usize..512, limit in 0usize..512) {
            let encoded = STANDARD.encode(vec![0xABu8; len]);
            let result = assembler(limit).assemble(None, Some(&encoded), Some("f.bin"));
            if len <= limit {
                prop_assert!(result.is_ok());
            } else {
                let is_too_large = matches!(result, Err(TransferError::PayloadTooLarge { .. }));
                prop_assert!(is_too_large);
            }
        }

        #[test]
        fn prop_text_only_never_fails_on_attachment(text in ".{0,64}") {
            let result = TransferAssembler::default().assemble(Some(&text), None, None);
            prop_assert!(result.is_ok());
            prop_assert!(result.unwrap().attachment.is_none());
        }
    }
}
