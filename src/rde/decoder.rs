//! BEJ decoder abstraction.
//!
//! The command handler only needs one capability: given the schema and
//! annotation dictionaries plus an encoded payload, produce the decoded JSON
//! text. Production decoders wrap a real BEJ implementation behind
//! [`BejDecoder`]; [`PassthroughDecoder`] covers loopback setups where the
//! producer ships plain JSON.

use thiserror::Error;

/// Dictionary set handed to the decoder for one payload.
#[derive(Debug, Clone, Copy)]
pub struct BejDictionaries<'a> {
    /// Schema dictionary of the payload's resource.
    pub schema: &'a [u8],
    /// Annotation dictionary (resource ID 0).
    pub annotation: &'a [u8],
    /// Error dictionary; not used by this service.
    pub error: Option<&'a [u8]>,
}

/// Failure to decode a BEJ payload.
#[derive(Debug, Error)]
#[error("BEJ decode failed: {0}")]
pub struct BejDecodeError(pub String);

/// Decodes BEJ-encoded payloads into JSON text.
pub trait BejDecoder: Send {
    /// Decode `encoded` against the given dictionaries.
    fn decode(
        &mut self,
        dictionaries: &BejDictionaries<'_>,
        encoded: &[u8],
    ) -> Result<String, BejDecodeError>;
}

/// Decoder for payloads that are already JSON text.
///
/// Validates that the payload parses as JSON and returns it unchanged. The
/// dictionaries are ignored.
#[derive(Debug, Default)]
pub struct PassthroughDecoder;

impl BejDecoder for PassthroughDecoder {
    fn decode(
        &mut self,
        _dictionaries: &BejDictionaries<'_>,
        encoded: &[u8],
    ) -> Result<String, BejDecodeError> {
        let text = std::str::from_utf8(encoded)
            .map_err(|e| BejDecodeError(format!("payload is not UTF-8: {e}")))?;
        serde_json::from_str::<serde_json::Value>(text)
            .map_err(|e| BejDecodeError(format!("payload is not JSON: {e}")))?;
        Ok(text.to_string())
    }
}
