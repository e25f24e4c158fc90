//! SAML artifacts
//!
//! An artifact is a short opaque token: two type-code bytes followed by a
//! type-specific remainder, base64-encoded on the wire. Parsing decodes the
//! base64 and dispatches on the type code.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::error::SamlError;
use crate::model::consts;

pub const TYPECODE_LENGTH: usize = 2;

const SOURCEID_LENGTH: usize = 20;
const HANDLE_LENGTH: usize = 20;

/// SAML 1.x type 0x0001 artifact: SourceID then a message handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saml1Artifact {
    raw: Vec<u8>,
}

/// SAML 1.x type 0x0002 artifact: a message handle then a source location
/// URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saml1ArtifactType0002 {
    raw: Vec<u8>,
}

/// SAML 2.0 type 0x0004 artifact: endpoint index, SourceID, message handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saml2Artifact {
    raw: Vec<u8>,
}

/// A parsed artifact of any recognized type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamlArtifact {
    Saml1(Saml1Artifact),
    Saml1Url(Saml1ArtifactType0002),
    Saml2(Saml2Artifact),
}

impl SamlArtifact {
    /// Decode the wire form and dispatch on the leading type code.
    pub fn parse(encoded: &str) -> Result<SamlArtifact, SamlError> {
        let raw = BASE64
            .decode(encoded.trim().as_bytes())
            .map_err(|_| SamlError::Artifact("unable to decode base64 artifact".to_string()))?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: Vec<u8>) -> Result<SamlArtifact, SamlError> {
        if raw.len() < TYPECODE_LENGTH {
            return Err(SamlError::Artifact(
                "artifact is shorter than its type code".to_string(),
            ));
        }
        match [raw[0], raw[1]] {
            consts::ARTIFACT_TYPECODE_0001 => {
                if raw.len() != TYPECODE_LENGTH + SOURCEID_LENGTH + HANDLE_LENGTH {
                    return Err(SamlError::Artifact(
                        "type 0x0001 artifact is of incorrect length".to_string(),
                    ));
                }
                Ok(SamlArtifact::Saml1(Saml1Artifact { raw }))
            }
            consts::ARTIFACT_TYPECODE_0002 => {
                if raw.len() <= TYPECODE_LENGTH + HANDLE_LENGTH {
                    return Err(SamlError::Artifact(
                        "type 0x0002 artifact lacks a source location".to_string(),
                    ));
                }
                Ok(SamlArtifact::Saml1Url(Saml1ArtifactType0002 { raw }))
            }
            consts::ARTIFACT_TYPECODE_0004 => {
                if raw.len() != TYPECODE_LENGTH + 2 + SOURCEID_LENGTH + HANDLE_LENGTH {
                    return Err(SamlError::Artifact(
                        "type 0x0004 artifact is of incorrect length".to_string(),
                    ));
                }
                Ok(SamlArtifact::Saml2(Saml2Artifact { raw }))
            }
            code => Err(SamlError::Artifact(format!(
                "no parser registered for artifact type code 0x{}",
                hex::encode(code)
            ))),
        }
    }

    pub fn raw(&self) -> &[u8] {
        match self {
            SamlArtifact::Saml1(a) => &a.raw,
            SamlArtifact::Saml1Url(a) => &a.raw,
            SamlArtifact::Saml2(a) => &a.raw,
        }
    }

    pub fn type_code(&self) -> [u8; 2] {
        let raw = self.raw();
        [raw[0], raw[1]]
    }

    pub fn remaining(&self) -> &[u8] {
        &self.raw()[TYPECODE_LENGTH..]
    }

    /// Base64 wire form.
    pub fn encode(&self) -> String {
        BASE64.encode(self.raw())
    }

    /// The artifact's source string, used for reverse metadata lookup: the
    /// hex SourceID for SourceID-bearing types, the location URL for type
    /// 0x0002.
    pub fn source(&self) -> String {
        match self {
            SamlArtifact::Saml1(a) => {
                hex::encode(&a.raw[TYPECODE_LENGTH..TYPECODE_LENGTH + SOURCEID_LENGTH])
            }
            SamlArtifact::Saml1Url(a) => {
                String::from_utf8_lossy(&a.raw[TYPECODE_LENGTH + HANDLE_LENGTH..]).into_owned()
            }
            SamlArtifact::Saml2(a) => {
                hex::encode(&a.raw[TYPECODE_LENGTH + 2..TYPECODE_LENGTH + 2 + SOURCEID_LENGTH])
            }
        }
    }

    /// The opaque message handle.
    pub fn message_handle(&self) -> &[u8] {
        match self {
            SamlArtifact::Saml1(a) => &a.raw[TYPECODE_LENGTH + SOURCEID_LENGTH..],
            SamlArtifact::Saml1Url(a) => {
                &a.raw[TYPECODE_LENGTH..TYPECODE_LENGTH + HANDLE_LENGTH]
            }
            SamlArtifact::Saml2(a) => &a.raw[TYPECODE_LENGTH + 2 + SOURCEID_LENGTH..],
        }
    }

    pub fn is_saml2(&self) -> bool {
        matches!(self, SamlArtifact::Saml2(_))
    }
}

impl Saml2Artifact {
    pub fn endpoint_index(&self) -> u16 {
        u16::from_be_bytes([self.raw[2], self.raw[3]])
    }
}

/// Build a SAML 2.0 artifact from its parts.
pub fn build_saml2_artifact(
    endpoint_index: u16,
    source_id: &[u8; SOURCEID_LENGTH],
    handle: &[u8; HANDLE_LENGTH],
) -> SamlArtifact {
    let mut raw = Vec::with_capacity(44);
    raw.extend_from_slice(&consts::ARTIFACT_TYPECODE_0004);
    raw.extend_from_slice(&endpoint_index.to_be_bytes());
    raw.extend_from_slice(source_id);
    raw.extend_from_slice(handle);
    SamlArtifact::Saml2(Saml2Artifact { raw })
}

/// Build a SAML 1.x type 0x0001 artifact from its parts.
pub fn build_saml1_artifact(
    source_id: &[u8; SOURCEID_LENGTH],
    handle: &[u8; HANDLE_LENGTH],
) -> SamlArtifact {
    let mut raw = Vec::with_capacity(42);
    raw.extend_from_slice(&consts::ARTIFACT_TYPECODE_0001);
    raw.extend_from_slice(source_id);
    raw.extend_from_slice(handle);
    SamlArtifact::Saml1(Saml1Artifact { raw })
}

/// Short-lived map from issued artifacts to their messages, consumed by
/// artifact resolution. Retrieval is single-use.
#[derive(Default)]
pub struct ArtifactMap {
    entries: std::sync::Mutex<std::collections::HashMap<String, (String, DateTime<Utc>)>>,
}

impl ArtifactMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, artifact: &SamlArtifact, message: String, expires: DateTime<Utc>) {
        self.entries
            .lock()
            .unwrap()
            .insert(artifact.encode(), (message, expires));
    }

    /// Remove and return the message bound to the artifact, if any and not
    /// expired.
    pub fn retrieve(&self, artifact: &SamlArtifact) -> Option<String> {
        let mut entries = self.entries.lock().unwrap();
        let (message, expires) = entries.remove(&artifact.encode())?;
        if expires < Utc::now() {
            return None;
        }
        Some(message)
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}
