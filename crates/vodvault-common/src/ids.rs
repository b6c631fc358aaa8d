//! Typed identifier wrappers used across vodvault.
//!
//! Users and upload requests come from the original identity provider as
//! plain 32-bit integers; resources are identified by a short printable
//! opaque string chosen by the uploader. Newtypes keep the three from being
//! mixed up and centralize the validation and rendering rules.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum length of a resource id in bytes.
pub const RESOURCE_ID_MAX_LEN: usize = 16;

/// Maximum length of a version (variant) code in bytes.
pub const VERSION_ID_MAX_LEN: usize = 8;

/// Unique identifier for a user profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u32);

impl UserId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for UserId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence number identifying one upload request of a user.
///
/// Rendered as 8 lowercase hex digits in storage paths and query strings,
/// and as a plain integer in JSON bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReqSeq(u32);

impl ReqSeq {
    /// Wrap an existing sequence number. Zero is reserved.
    pub fn new(seq: u32) -> Result<Self> {
        if seq == 0 {
            return Err(Error::invalid_input("req_seq must be non-zero"));
        }
        Ok(Self(seq))
    }

    /// Draw a random non-zero sequence number.
    pub fn random<R: rand::Rng>(rng: &mut R) -> Self {
        loop {
            let seq: u32 = rng.gen();
            if seq != 0 {
                return Self(seq);
            }
        }
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Lowercase 8-digit hex rendering used in storage paths and query
    /// strings.
    pub fn to_hex(&self) -> String {
        format!("{:08x}", self.0)
    }

    /// Parse the hex rendering produced by [`ReqSeq::to_hex`].
    pub fn from_hex(s: &str) -> Result<Self> {
        let seq = u32::from_str_radix(s, 16)
            .map_err(|_| Error::invalid_input(format!("invalid req_seq: {s}")))?;
        Self::new(seq)
    }
}

impl std::fmt::Display for ReqSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Printable opaque handle for a committed media file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Validate and wrap a resource id.
    ///
    /// Resource ids are 1..=[`RESOURCE_ID_MAX_LEN`] bytes of printable
    /// ASCII, no whitespace or control characters.
    pub fn parse<S: Into<String>>(raw: S) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > RESOURCE_ID_MAX_LEN {
            return Err(Error::invalid_input(format!(
                "resource id length must be 1..={RESOURCE_ID_MAX_LEN}"
            )));
        }
        if !raw.bytes().all(|b| (0x21..=0x7e).contains(&b)) {
            return Err(Error::invalid_input(
                "resource id contains non-printable characters",
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Short code naming one encoded rendition of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    /// Validate and wrap a version code: 1..=[`VERSION_ID_MAX_LEN`]
    /// alphanumeric ASCII characters.
    pub fn parse<S: Into<String>>(raw: S) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > VERSION_ID_MAX_LEN {
            return Err(Error::invalid_input(format!(
                "version id length must be 1..={VERSION_ID_MAX_LEN}"
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::invalid_input("version id must be alphanumeric"));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_req_seq_hex_round_trip() {
        let seq = ReqSeq::new(0x1f).unwrap();
        assert_eq!(seq.to_hex(), "0000001f");
        assert_eq!(ReqSeq::from_hex("0000001f").unwrap(), seq);
    }

    #[test]
    fn test_req_seq_zero_rejected() {
        assert!(ReqSeq::new(0).is_err());
        assert!(ReqSeq::from_hex("00000000").is_err());
    }

    #[test]
    fn test_req_seq_random_non_zero() {
        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            assert_ne!(ReqSeq::random(&mut rng).as_u32(), 0);
        }
    }

    #[test]
    fn test_resource_id_validation() {
        assert!(ResourceId::parse("r8fj3Il").is_ok());
        assert!(ResourceId::parse("").is_err());
        assert!(ResourceId::parse("a".repeat(17)).is_err());
        assert!(ResourceId::parse("has space").is_err());
        assert!(ResourceId::parse("ctrl\x01char").is_err());
    }

    #[test]
    fn test_version_id_validation() {
        assert!(VersionId::parse("Id").is_ok());
        assert!(VersionId::parse("De").is_ok());
        assert!(VersionId::parse("").is_err());
        assert!(VersionId::parse("too-long-1").is_err());
        assert!(VersionId::parse("no/slash").is_err());
    }
}
