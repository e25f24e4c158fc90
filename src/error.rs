//! Error types and handling

use std::collections::BTreeMap;

use thiserror::Error;

use crate::model::metadata::{ContactPerson, EntityDescriptor, RoleDescriptor};
use crate::model::saml::Status;

/// Library error types
#[derive(Debug, Error)]
pub enum SamlError {
    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("binding error: {0}")]
    Binding(String),

    #[error("security policy violation: {0}")]
    SecurityPolicy(String),

    #[error("fatal profile error: {0}")]
    FatalProfile(String),

    #[error("retryable profile error: {0}")]
    RetryableProfile(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("metadata filter error: {0}")]
    MetadataFilter(String),
}

impl SamlError {
    /// Whether the failure may be retried against another endpoint.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SamlError::RetryableProfile(_))
    }
}

impl From<std::io::Error> for SamlError {
    fn from(err: std::io::Error) -> Self {
        SamlError::Metadata(err.to_string())
    }
}

impl From<reqwest::Error> for SamlError {
    fn from(err: reqwest::Error) -> Self {
        SamlError::Metadata(err.to_string())
    }
}

/// An error enriched with properties pulled from the peer's metadata,
/// suitable for rendering a useful operator-facing failure.
#[derive(Debug)]
pub struct AnnotatedError {
    pub inner: SamlError,
    pub properties: BTreeMap<&'static str, String>,
}

impl std::fmt::Display for AnnotatedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::error::Error for AnnotatedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

/// Attach entityID, contact, errorURL and status properties to an error by
/// walking the metadata for the current peer role.
///
/// Contact selection walks the configured contact-type priority list (default
/// "support" then "technical") over the role's contacts, falling back to the
/// owning entity's contacts.
pub fn annotate_error(
    err: SamlError,
    entity: Option<&EntityDescriptor>,
    role: Option<&RoleDescriptor>,
    status: Option<&Status>,
) -> AnnotatedError {
    let mut properties = BTreeMap::new();

    if let Some(entity) = entity {
        properties.insert("entityID", entity.entity_id.clone());
    }

    if let Some(role) = role {
        let contact = crate::config::SamlConfig::global()
            .contact_person(role.contact_persons.iter())
            .or_else(|| {
                entity.and_then(|e| {
                    crate::config::SamlConfig::global().contact_person(e.contact_persons.iter())
                })
            });
        if let Some(cp) = contact {
            if let Some(name) = contact_name(cp) {
                properties.insert("contactName", name);
            }
            if let Some(email) = cp.email_addresses.first() {
                let addr = if email.starts_with("mailto:") {
                    email.clone()
                } else {
                    format!("mailto:{}", email)
                };
                properties.insert("contactEmail", addr);
            }
        }

        if let Some(ref url) = role.error_url {
            properties.insert("errorURL", url.clone());
        }
    } else if let Some(entity) = entity {
        let contact =
            crate::config::SamlConfig::global().contact_person(entity.contact_persons.iter());
        if let Some(cp) = contact {
            if let Some(name) = contact_name(cp) {
                properties.insert("contactName", name);
            }
            if let Some(email) = cp.email_addresses.first() {
                let addr = if email.starts_with("mailto:") {
                    email.clone()
                } else {
                    format!("mailto:{}", email)
                };
                properties.insert("contactEmail", addr);
            }
        }
    }

    if let Some(status) = status {
        if !status.code.value.is_empty() {
            properties.insert("statusCode", status.code.value.clone());
        }
        if let Some(ref nested) = status.code.nested {
            properties.insert("statusCode2", nested.value.clone());
        }
        if let Some(ref message) = status.message {
            if !message.is_empty() {
                properties.insert("statusMessage", message.clone());
            }
        }
    }

    AnnotatedError {
        inner: err,
        properties,
    }
}

fn contact_name(cp: &ContactPerson) -> Option<String> {
    match (cp.given_name.as_deref(), cp.sur_name.as_deref()) {
        (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
        (Some(first), None) => Some(first.to_string()),
        (None, Some(last)) => Some(last.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SamlError::SecurityPolicy("Assertion is not yet valid.".to_string());
        assert_eq!(
            err.to_string(),
            "security policy violation: Assertion is not yet valid."
        );
    }

    #[test]
    fn test_retryable() {
        assert!(SamlError::RetryableProfile("endpoint down".to_string()).is_retryable());
        assert!(!SamlError::FatalProfile("no".to_string()).is_retryable());
        assert!(!SamlError::Binding("bad method".to_string()).is_retryable());
    }
}
