//! Small helpers shared by the modules that touch the local filesystem and the AWS SDK.
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

pub(crate) mod aws_sdk;

/// Encode an upload ID into a string that's safe to use as (part of) a file name.
///
/// Upload IDs are opaque and routinely contain `/`, so they can't be used directly.  The URL-safe
/// base64 alphabet has no `.`, which lets the encoded ID be followed by dot-separated suffixes.
pub(crate) fn encode_id(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

/// Reverse of [`encode_id`].  `None` if `encoded` isn't something [`encode_id`] produced.
pub(crate) fn decode_id(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}
