//! SAML assertion and protocol data model
//!
//! Plain bean types for the subset of the SAML 1.x and 2.0 schemas the
//! messaging core consumes. XML unmarshalling lives in `crate::xml`; these
//! types carry no DOM state.

use chrono::{DateTime, Utc};

use crate::model::consts;
use crate::model::xmlsec::{EncryptedElement, Signature};

/// Issuer of an assertion or protocol message (a saml2:NameIDType).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuer {
    pub name: String,
    pub format: Option<String>,
    pub name_qualifier: Option<String>,
    pub sp_name_qualifier: Option<String>,
}

impl Issuer {
    pub fn entity(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: None,
            name_qualifier: None,
            sp_name_qualifier: None,
        }
    }

    /// Effective format, defaulted to the entity format.
    pub fn effective_format(&self) -> &str {
        self.format.as_deref().unwrap_or(consts::NAMEID_FORMAT_ENTITY)
    }
}

/// Subject NameID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameId {
    pub value: String,
    pub format: Option<String>,
    pub name_qualifier: Option<String>,
    pub sp_name_qualifier: Option<String>,
}

/// SubjectConfirmationData bean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectConfirmationData {
    pub recipient: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub in_response_to: Option<String>,
    pub address: Option<String>,
}

/// SubjectConfirmation bean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectConfirmation {
    pub method: String,
    pub name_id: Option<NameId>,
    pub data: Option<SubjectConfirmationData>,
}

/// Subject bean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    pub name_id: Option<NameId>,
    pub confirmations: Vec<SubjectConfirmation>,
}

/// A delegate entry within a DelegationRestriction condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delegate {
    pub name: String,
    pub format: Option<String>,
    pub delegation_instant: Option<DateTime<Utc>>,
    pub confirmation_method: Option<String>,
}

/// A single condition within a Conditions element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    AudienceRestriction { audiences: Vec<String> },
    OneTimeUse,
    ProxyRestriction { count: Option<u32>, audiences: Vec<String> },
    DelegationRestriction { delegates: Vec<Delegate> },
    /// SAML 1.x DoNotCacheCondition.
    DoNotCache,
    /// An extension condition identified by its element or xsi:type QName.
    Other { namespace: String, local_name: String },
}

impl Condition {
    /// QName-ish display form used in policy failure messages.
    pub fn type_name(&self) -> String {
        match self {
            Condition::AudienceRestriction { .. } => "AudienceRestriction".to_string(),
            Condition::OneTimeUse => "OneTimeUse".to_string(),
            Condition::ProxyRestriction { .. } => "ProxyRestriction".to_string(),
            Condition::DelegationRestriction { .. } => "DelegationRestriction".to_string(),
            Condition::DoNotCache => "DoNotCacheCondition".to_string(),
            Condition::Other {
                namespace,
                local_name,
            } => format!("{{{}}}{}", namespace, local_name),
        }
    }
}

/// Conditions bean with its validity window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions {
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub conditions: Vec<Condition>,
}

impl Conditions {
    pub fn audience_restrictions(&self) -> impl Iterator<Item = &Condition> {
        self.conditions
            .iter()
            .filter(|c| matches!(c, Condition::AudienceRestriction { .. }))
    }
}

/// SAML 2.0 AuthnStatement (subset).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthnStatement {
    pub authn_instant: Option<DateTime<Utc>>,
    pub session_index: Option<String>,
    pub authn_context_class_ref: Option<String>,
}

/// SAML attribute bean, shared with the metadata EntityAttributes extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub name_format: Option<String>,
    pub values: Vec<String>,
}

impl Attribute {
    /// Effective NameFormat, defaulted to unspecified.
    pub fn effective_name_format(&self) -> &str {
        self.name_format
            .as_deref()
            .unwrap_or("urn:oasis:names:tc:SAML:2.0:attrname-format:unspecified")
    }
}

/// SAML 2.0 statement variants the core distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Authn(AuthnStatement),
    Attribute { attributes: Vec<Attribute> },
}

/// SAML 2.0 Assertion.
#[derive(Debug, Clone, Default)]
pub struct Assertion {
    pub id: String,
    pub issue_instant: Option<DateTime<Utc>>,
    pub issuer: Option<Issuer>,
    pub subject: Option<Subject>,
    pub conditions: Option<Conditions>,
    pub statements: Vec<Statement>,
    pub signature: Option<Signature>,
}

impl Assertion {
    /// Replaces any existing enveloped signature.
    pub fn set_signature(&mut self, signature: Signature) {
        self.signature = Some(signature);
    }
}

/// StatusCode with optional nested sub-code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCode {
    pub value: String,
    pub nested: Option<Box<StatusCode>>,
}

impl StatusCode {
    pub fn success() -> Self {
        Self {
            value: consts::STATUS_SUCCESS.to_string(),
            nested: None,
        }
    }
}

/// Protocol Status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: StatusCode,
    pub message: Option<String>,
    pub detail: Option<String>,
}

impl Status {
    pub fn success() -> Self {
        Self {
            code: StatusCode::success(),
            message: None,
            detail: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code.value == consts::STATUS_SUCCESS
    }
}

/// SAML 2.0 Response (samlp:Response, a StatusResponseType).
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub id: String,
    pub in_response_to: Option<String>,
    pub issue_instant: Option<DateTime<Utc>>,
    pub destination: Option<String>,
    pub issuer: Option<Issuer>,
    pub status: Option<Status>,
    pub assertions: Vec<Assertion>,
    pub encrypted_assertions: Vec<EncryptedElement>,
    pub signature: Option<Signature>,
}

/// SAML 2.0 ArtifactResponse wrapping a dereferenced message.
#[derive(Debug, Clone, Default)]
pub struct ArtifactResponse {
    pub id: String,
    pub in_response_to: Option<String>,
    pub issue_instant: Option<DateTime<Utc>>,
    pub issuer: Option<Issuer>,
    pub status: Option<Status>,
    pub message: Option<Box<SamlMessage>>,
}

/// SAML 2.0 request (RequestAbstractType subset, covers AuthnRequest and
/// ArtifactResolve shapes the decoders see).
#[derive(Debug, Clone, Default)]
pub struct RequestAbstract {
    pub id: String,
    pub issue_instant: Option<DateTime<Utc>>,
    pub destination: Option<String>,
    pub issuer: Option<Issuer>,
    pub signature: Option<Signature>,
}

// ---------- SAML 1.x ----------

/// SAML 1.x statement: every statement kind carries an optional
/// SubjectConfirmation through its Subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Saml1Statement {
    pub confirmation_methods: Vec<String>,
}

/// SAML 1.x Conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Saml1Conditions {
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub conditions: Vec<Condition>,
}

/// SAML 1.x Assertion.
#[derive(Debug, Clone, Default)]
pub struct Saml1Assertion {
    pub assertion_id: String,
    pub issuer: String,
    pub issue_instant: Option<DateTime<Utc>>,
    pub minor_version: u32,
    pub conditions: Option<Saml1Conditions>,
    pub statements: Vec<Saml1Statement>,
    pub signature: Option<Signature>,
}

/// SAML 1.x Response.
#[derive(Debug, Clone, Default)]
pub struct Saml1Response {
    pub response_id: String,
    pub in_response_to: Option<String>,
    pub issue_instant: Option<DateTime<Utc>>,
    pub minor_version: u32,
    pub recipient: Option<String>,
    pub status: Option<Status>,
    pub assertions: Vec<Saml1Assertion>,
    pub signature: Option<Signature>,
}

impl Saml1Response {
    pub fn protocol(&self) -> &'static str {
        if self.minor_version == 0 {
            consts::SAML10_PROTOCOL_ENUM
        } else {
            consts::SAML11_PROTOCOL_ENUM
        }
    }
}

/// SAML 1.x Request (samlp:Request as seen over SOAP).
#[derive(Debug, Clone, Default)]
pub struct Saml1Request {
    pub request_id: String,
    pub issue_instant: Option<DateTime<Utc>>,
    pub minor_version: u32,
    pub artifacts: Vec<String>,
    pub signature: Option<Signature>,
}

/// A SOAP 1.1 envelope carrying SAML body content.
#[derive(Debug, Clone, Default)]
pub struct SoapEnvelope {
    pub body: Vec<SamlMessage>,
}

/// A decoded SAML message in any of the shapes the policy engine evaluates.
#[derive(Debug, Clone)]
pub enum SamlMessage {
    Saml1Response(Saml1Response),
    Saml1Request(Saml1Request),
    Saml1Assertion(Saml1Assertion),
    Response(Response),
    Request(RequestAbstract),
    ArtifactResponse(ArtifactResponse),
    Assertion(Assertion),
    Envelope(SoapEnvelope),
}

impl SamlMessage {
    /// Message identifier attribute.
    pub fn id(&self) -> Option<&str> {
        match self {
            SamlMessage::Saml1Response(m) => Some(&m.response_id),
            SamlMessage::Saml1Request(m) => Some(&m.request_id),
            SamlMessage::Saml1Assertion(m) => Some(&m.assertion_id),
            SamlMessage::Response(m) => Some(&m.id),
            SamlMessage::Request(m) => Some(&m.id),
            SamlMessage::ArtifactResponse(m) => Some(&m.id),
            SamlMessage::Assertion(m) => Some(&m.id),
            SamlMessage::Envelope(_) => None,
        }
    }

    pub fn issue_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            SamlMessage::Saml1Response(m) => m.issue_instant,
            SamlMessage::Saml1Request(m) => m.issue_instant,
            SamlMessage::Saml1Assertion(m) => m.issue_instant,
            SamlMessage::Response(m) => m.issue_instant,
            SamlMessage::Request(m) => m.issue_instant,
            SamlMessage::ArtifactResponse(m) => m.issue_instant,
            SamlMessage::Assertion(m) => m.issue_instant,
            SamlMessage::Envelope(_) => None,
        }
    }

    /// InResponseTo of a status response, when the message is one.
    pub fn in_response_to(&self) -> Option<&str> {
        match self {
            SamlMessage::Response(m) => m.in_response_to.as_deref(),
            SamlMessage::ArtifactResponse(m) => m.in_response_to.as_deref(),
            SamlMessage::Saml1Response(m) => m.in_response_to.as_deref(),
            _ => None,
        }
    }

    /// The message's own Issuer element, if any.
    pub fn issuer(&self) -> Option<&Issuer> {
        match self {
            SamlMessage::Response(m) => m.issuer.as_ref(),
            SamlMessage::Request(m) => m.issuer.as_ref(),
            SamlMessage::ArtifactResponse(m) => m.issuer.as_ref(),
            SamlMessage::Assertion(m) => m.issuer.as_ref(),
            _ => None,
        }
    }

    /// Enveloped signature, when the message kind carries one.
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            SamlMessage::Saml1Response(m) => m.signature.as_ref(),
            SamlMessage::Saml1Request(m) => m.signature.as_ref(),
            SamlMessage::Saml1Assertion(m) => m.signature.as_ref(),
            SamlMessage::Response(m) => m.signature.as_ref(),
            SamlMessage::Request(m) => m.signature.as_ref(),
            SamlMessage::ArtifactResponse(_) => None,
            SamlMessage::Assertion(m) => m.signature.as_ref(),
            SamlMessage::Envelope(_) => None,
        }
    }

    /// Identifier of the signable object, for signature reference checks.
    pub fn signable_id(&self) -> Option<&str> {
        self.id()
    }

    pub fn as_saml2_assertion(&self) -> Option<&Assertion> {
        match self {
            SamlMessage::Assertion(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_saml1_assertion(&self) -> Option<&Saml1Assertion> {
        match self {
            SamlMessage::Saml1Assertion(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_saml2_response(&self) -> Option<&Response> {
        match self {
            SamlMessage::Response(r) => Some(r),
            _ => None,
        }
    }
}
