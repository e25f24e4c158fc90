//! SAML signature profile validation
//!
//! The SAML subset of XML-DSig: a signature is acceptable only with exactly
//! one reference pointing at the enclosing object (or the whole document),
//! carrying at most two transforms, one of which must be the enveloped
//! signature transform and the rest canonicalization.

use crate::error::SamlError;
use crate::model::consts;
use crate::model::xmlsec::Signature;

/// Validate the SAML profile restrictions on an enveloped signature.
///
/// `signable_id` is the identifier of the SAML object carrying the
/// signature; a fragment reference must point exactly at it.
pub fn validate_signature_profile(
    signature: &Signature,
    signable_id: Option<&str>,
) -> Result<(), SamlError> {
    if signature.references.len() != 1 {
        return Err(SamlError::SecurityPolicy(
            "invalid signature profile for SAML object".to_string(),
        ));
    }

    let reference = &signature.references[0];

    let uri_ok = match reference.uri.as_deref() {
        None | Some("") => true,
        Some(uri) => match (uri.strip_prefix('#'), signable_id) {
            (Some(fragment), Some(id)) => fragment == id,
            _ => false,
        },
    };
    if !uri_ok {
        return Err(SamlError::SecurityPolicy(
            "invalid signature profile for SAML object".to_string(),
        ));
    }

    if reference.transforms.len() > 2 {
        return Err(SamlError::SecurityPolicy(
            "invalid signature profile for SAML object".to_string(),
        ));
    }

    let mut has_enveloped = false;
    for transform in &reference.transforms {
        match transform.as_str() {
            consts::TRANSFORM_ENVELOPED_SIGNATURE => has_enveloped = true,
            consts::TRANSFORM_C14N_EXCL
            | consts::TRANSFORM_C14N_EXCL_COMMENTS
            | consts::TRANSFORM_C14N
            | consts::TRANSFORM_C14N_COMMENTS => {}
            _ => {
                return Err(SamlError::SecurityPolicy(
                    "invalid signature profile for SAML object".to_string(),
                ))
            }
        }
    }
    if !has_enveloped {
        return Err(SamlError::SecurityPolicy(
            "invalid signature profile for SAML object".to_string(),
        ));
    }

    Ok(())
}
