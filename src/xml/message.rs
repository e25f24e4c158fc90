//! Protocol message reader
//!
//! Unmarshals decoded XML into `SamlMessage` beans: SAML 1.x and 2.0
//! responses, requests, assertions, SOAP envelopes, and the signature and
//! encryption structures they embed.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::SamlError;
use crate::model::consts;
use crate::model::saml::*;
use crate::model::xmlsec::*;
use crate::xml::{check_id_uniqueness, parse_datetime, XmlNode};

/// Read a protocol message or assertion from raw XML.
pub fn read_message(input: &[u8]) -> Result<SamlMessage, SamlError> {
    let root = super::parse_document(input)?;
    check_id_uniqueness(&root)?;
    read_message_node(&root)
}

pub fn read_message_node(node: &XmlNode) -> Result<SamlMessage, SamlError> {
    let ns = node.namespace.as_deref().unwrap_or("");
    match (ns, node.local_name.as_str()) {
        (consts::SAML20P_NS, "Response") => Ok(SamlMessage::Response(read_response(node)?)),
        (consts::SAML20P_NS, "ArtifactResponse") => {
            Ok(SamlMessage::ArtifactResponse(read_artifact_response(node)?))
        }
        (consts::SAML20P_NS, _) => Ok(SamlMessage::Request(read_request_abstract(node)?)),
        (consts::SAML20_NS, "Assertion") => Ok(SamlMessage::Assertion(read_assertion(node)?)),
        (consts::SAML1P_NS, "Response") => Ok(SamlMessage::Saml1Response(read_saml1_response(node)?)),
        (consts::SAML1P_NS, "Request") => Ok(SamlMessage::Saml1Request(read_saml1_request(node)?)),
        (consts::SAML1_NS, "Assertion") => {
            Ok(SamlMessage::Saml1Assertion(read_saml1_assertion(node)?))
        }
        (consts::SOAP11ENV_NS, "Envelope") => Ok(SamlMessage::Envelope(read_envelope(node)?)),
        _ => Err(SamlError::Binding(format!(
            "unrecognized message root: {{{}}}{}",
            ns, node.local_name
        ))),
    }
}

fn read_envelope(node: &XmlNode) -> Result<SoapEnvelope, SamlError> {
    let body = node
        .child(consts::SOAP11ENV_NS, "Body")
        .ok_or_else(|| SamlError::Binding("SOAP envelope missing Body".to_string()))?;
    let mut messages = Vec::new();
    for child in &body.children {
        messages.push(read_message_node(child)?);
    }
    Ok(SoapEnvelope { body: messages })
}

fn read_response(node: &XmlNode) -> Result<Response, SamlError> {
    let mut response = Response {
        id: required_attr(node, "ID")?,
        in_response_to: node.attr("InResponseTo").map(str::to_string),
        issue_instant: node.attr("IssueInstant").and_then(parse_datetime),
        destination: node.attr("Destination").map(str::to_string),
        ..Default::default()
    };

    for child in &node.children {
        let ns = child.namespace.as_deref().unwrap_or("");
        match (ns, child.local_name.as_str()) {
            (consts::SAML20_NS, "Issuer") => response.issuer = Some(read_issuer(child)),
            (consts::SAML20P_NS, "Status") => response.status = Some(read_status(child)),
            (consts::SAML20_NS, "Assertion") => response.assertions.push(read_assertion(child)?),
            (consts::SAML20_NS, "EncryptedAssertion") => {
                response.encrypted_assertions.push(read_encrypted_element(child)?)
            }
            (consts::XMLSIG_NS, "Signature") => response.signature = Some(read_signature(child)?),
            _ => {}
        }
    }

    Ok(response)
}

fn read_artifact_response(node: &XmlNode) -> Result<ArtifactResponse, SamlError> {
    let mut response = ArtifactResponse {
        id: required_attr(node, "ID")?,
        in_response_to: node.attr("InResponseTo").map(str::to_string),
        issue_instant: node.attr("IssueInstant").and_then(parse_datetime),
        ..Default::default()
    };

    for child in &node.children {
        let ns = child.namespace.as_deref().unwrap_or("");
        match (ns, child.local_name.as_str()) {
            (consts::SAML20_NS, "Issuer") => response.issuer = Some(read_issuer(child)),
            (consts::SAML20P_NS, "Status") => response.status = Some(read_status(child)),
            (consts::XMLSIG_NS, "Signature") => {}
            _ => {
                // The dereferenced message rides as the remaining child.
                if response.message.is_none() {
                    if let Ok(inner) = read_message_node(child) {
                        response.message = Some(Box::new(inner));
                    }
                }
            }
        }
    }

    Ok(response)
}

fn read_request_abstract(node: &XmlNode) -> Result<RequestAbstract, SamlError> {
    let mut request = RequestAbstract {
        id: required_attr(node, "ID")?,
        issue_instant: node.attr("IssueInstant").and_then(parse_datetime),
        destination: node.attr("Destination").map(str::to_string),
        ..Default::default()
    };

    for child in &node.children {
        let ns = child.namespace.as_deref().unwrap_or("");
        match (ns, child.local_name.as_str()) {
            (consts::SAML20_NS, "Issuer") => request.issuer = Some(read_issuer(child)),
            (consts::XMLSIG_NS, "Signature") => request.signature = Some(read_signature(child)?),
            _ => {}
        }
    }

    Ok(request)
}

pub(crate) fn read_assertion(node: &XmlNode) -> Result<Assertion, SamlError> {
    let mut assertion = Assertion {
        id: required_attr(node, "ID")?,
        issue_instant: node.attr("IssueInstant").and_then(parse_datetime),
        ..Default::default()
    };

    for child in &node.children {
        let ns = child.namespace.as_deref().unwrap_or("");
        match (ns, child.local_name.as_str()) {
            (consts::SAML20_NS, "Issuer") => assertion.issuer = Some(read_issuer(child)),
            (consts::SAML20_NS, "Subject") => assertion.subject = Some(read_subject(child)),
            (consts::SAML20_NS, "Conditions") => {
                assertion.conditions = Some(read_conditions(child))
            }
            (consts::SAML20_NS, "AuthnStatement") => {
                assertion.statements.push(Statement::Authn(AuthnStatement {
                    authn_instant: child.attr("AuthnInstant").and_then(parse_datetime),
                    session_index: child.attr("SessionIndex").map(str::to_string),
                    authn_context_class_ref: child
                        .child(consts::SAML20_NS, "AuthnContext")
                        .and_then(|ac| ac.child_text(consts::SAML20_NS, "AuthnContextClassRef")),
                }))
            }
            (consts::SAML20_NS, "AttributeStatement") => {
                let attributes = child
                    .children_named(consts::SAML20_NS, "Attribute")
                    .filter_map(|a| {
                        a.attr("Name").map(|name| Attribute {
                            name: name.to_string(),
                            name_format: a.attr("NameFormat").map(str::to_string),
                            values: a
                                .children_named(consts::SAML20_NS, "AttributeValue")
                                .map(|v| v.text.clone())
                                .collect(),
                        })
                    })
                    .collect();
                assertion.statements.push(Statement::Attribute { attributes });
            }
            (consts::XMLSIG_NS, "Signature") => assertion.signature = Some(read_signature(child)?),
            _ => {}
        }
    }

    Ok(assertion)
}

fn read_issuer(node: &XmlNode) -> Issuer {
    Issuer {
        name: node.text.trim().to_string(),
        format: node.attr("Format").map(str::to_string),
        name_qualifier: node.attr("NameQualifier").map(str::to_string),
        sp_name_qualifier: node.attr("SPNameQualifier").map(str::to_string),
    }
}

fn read_name_id(node: &XmlNode) -> NameId {
    NameId {
        value: node.text.trim().to_string(),
        format: node.attr("Format").map(str::to_string),
        name_qualifier: node.attr("NameQualifier").map(str::to_string),
        sp_name_qualifier: node.attr("SPNameQualifier").map(str::to_string),
    }
}

fn read_subject(node: &XmlNode) -> Subject {
    let mut subject = Subject::default();
    for child in &node.children {
        if child.is(consts::SAML20_NS, "NameID") {
            subject.name_id = Some(read_name_id(child));
        } else if child.is(consts::SAML20_NS, "SubjectConfirmation") {
            let data = child
                .child(consts::SAML20_NS, "SubjectConfirmationData")
                .map(|d| SubjectConfirmationData {
                    recipient: d.attr("Recipient").map(str::to_string),
                    not_before: d.attr("NotBefore").and_then(parse_datetime),
                    not_on_or_after: d.attr("NotOnOrAfter").and_then(parse_datetime),
                    in_response_to: d.attr("InResponseTo").map(str::to_string),
                    address: d.attr("Address").map(str::to_string),
                });
            subject.confirmations.push(SubjectConfirmation {
                method: child.attr("Method").unwrap_or("").to_string(),
                name_id: child.child(consts::SAML20_NS, "NameID").map(read_name_id),
                data,
            });
        }
    }
    subject
}

pub(crate) fn read_conditions(node: &XmlNode) -> Conditions {
    let mut conditions = Conditions {
        not_before: node.attr("NotBefore").and_then(parse_datetime),
        not_on_or_after: node.attr("NotOnOrAfter").and_then(parse_datetime),
        ..Default::default()
    };

    for child in &node.children {
        let ns = child.namespace.as_deref().unwrap_or("");
        let condition = match (ns, child.local_name.as_str()) {
            (consts::SAML20_NS, "AudienceRestriction")
            | (consts::SAML1_NS, "AudienceRestrictionCondition") => {
                Condition::AudienceRestriction {
                    audiences: child
                        .children_named(ns, "Audience")
                        .map(|a| a.text.trim().to_string())
                        .filter(|a| !a.is_empty())
                        .collect(),
                }
            }
            (consts::SAML20_NS, "OneTimeUse") => Condition::OneTimeUse,
            (consts::SAML20_NS, "ProxyRestriction") => Condition::ProxyRestriction {
                count: child.attr("Count").and_then(|c| c.parse().ok()),
                audiences: child
                    .children_named(consts::SAML20_NS, "Audience")
                    .map(|a| a.text.trim().to_string())
                    .collect(),
            },
            (consts::SAML20DEL_NS, "Condition") | (consts::SAML20DEL_NS, "DelegationRestrictionType") => {
                Condition::DelegationRestriction {
                    delegates: child
                        .children_named(consts::SAML20DEL_NS, "Delegate")
                        .map(|d| Delegate {
                            name: d
                                .child(consts::SAML20_NS, "NameID")
                                .map(|n| n.text.trim().to_string())
                                .unwrap_or_default(),
                            format: d
                                .child(consts::SAML20_NS, "NameID")
                                .and_then(|n| n.attr("Format").map(str::to_string)),
                            delegation_instant: d
                                .attr("DelegationInstant")
                                .and_then(parse_datetime),
                            confirmation_method: d.attr("ConfirmationMethod").map(str::to_string),
                        })
                        .collect(),
                }
            }
            (consts::SAML1_NS, "DoNotCacheCondition") => Condition::DoNotCache,
            (consts::SAML20_NS, "Condition") | (consts::SAML1_NS, "Condition") => {
                // Typed via xsi:type; keep the raw type as the discriminator.
                Condition::Other {
                    namespace: ns.to_string(),
                    local_name: child
                        .attr("type")
                        .map(str::to_string)
                        .unwrap_or_else(|| "Condition".to_string()),
                }
            }
            _ => Condition::Other {
                namespace: ns.to_string(),
                local_name: child.local_name.clone(),
            },
        };
        conditions.conditions.push(condition);
    }

    conditions
}

// ---------- SAML 1.x ----------

fn read_saml1_response(node: &XmlNode) -> Result<Saml1Response, SamlError> {
    let mut response = Saml1Response {
        response_id: required_attr(node, "ResponseID")?,
        in_response_to: node.attr("InResponseTo").map(str::to_string),
        issue_instant: node.attr("IssueInstant").and_then(parse_datetime),
        minor_version: node
            .attr("MinorVersion")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1),
        recipient: node.attr("Recipient").map(str::to_string),
        ..Default::default()
    };

    for child in &node.children {
        let ns = child.namespace.as_deref().unwrap_or("");
        match (ns, child.local_name.as_str()) {
            (consts::SAML1P_NS, "Status") => response.status = Some(read_saml1_status(child)),
            (consts::SAML1_NS, "Assertion") => {
                response.assertions.push(read_saml1_assertion(child)?)
            }
            (consts::XMLSIG_NS, "Signature") => response.signature = Some(read_signature(child)?),
            _ => {}
        }
    }

    Ok(response)
}

fn read_saml1_request(node: &XmlNode) -> Result<Saml1Request, SamlError> {
    let mut request = Saml1Request {
        request_id: required_attr(node, "RequestID")?,
        issue_instant: node.attr("IssueInstant").and_then(parse_datetime),
        minor_version: node
            .attr("MinorVersion")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1),
        ..Default::default()
    };

    for child in &node.children {
        if child.is(consts::SAML1P_NS, "AssertionArtifact") {
            let artifact = child.text.trim();
            if !artifact.is_empty() {
                request.artifacts.push(artifact.to_string());
            }
        } else if child.is(consts::XMLSIG_NS, "Signature") {
            request.signature = Some(read_signature(child)?);
        }
    }

    Ok(request)
}

fn read_saml1_assertion(node: &XmlNode) -> Result<Saml1Assertion, SamlError> {
    let mut assertion = Saml1Assertion {
        assertion_id: required_attr(node, "AssertionID")?,
        issuer: node.attr("Issuer").unwrap_or("").to_string(),
        issue_instant: node.attr("IssueInstant").and_then(parse_datetime),
        minor_version: node
            .attr("MinorVersion")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1),
        ..Default::default()
    };

    for child in &node.children {
        let ns = child.namespace.as_deref().unwrap_or("");
        match (ns, child.local_name.as_str()) {
            (consts::SAML1_NS, "Conditions") => {
                let parsed = read_conditions(child);
                assertion.conditions = Some(Saml1Conditions {
                    not_before: parsed.not_before,
                    not_on_or_after: parsed.not_on_or_after,
                    conditions: parsed.conditions,
                });
            }
            (consts::SAML1_NS, "AuthenticationStatement")
            | (consts::SAML1_NS, "AttributeStatement")
            | (consts::SAML1_NS, "AuthorizationDecisionStatement")
            | (consts::SAML1_NS, "SubjectStatement") => {
                let confirmation_methods = child
                    .child(consts::SAML1_NS, "Subject")
                    .and_then(|s| s.child(consts::SAML1_NS, "SubjectConfirmation"))
                    .map(|sc| {
                        sc.children_named(consts::SAML1_NS, "ConfirmationMethod")
                            .map(|m| m.text.trim().to_string())
                            .collect()
                    })
                    .unwrap_or_default();
                assertion.statements.push(Saml1Statement {
                    confirmation_methods,
                });
            }
            (consts::XMLSIG_NS, "Signature") => {
                assertion.signature = Some(read_signature(child)?)
            }
            _ => {}
        }
    }

    Ok(assertion)
}

fn read_saml1_status(node: &XmlNode) -> Status {
    let code = node
        .child(consts::SAML1P_NS, "StatusCode")
        .and_then(|c| c.attr("Value"))
        .unwrap_or("")
        .to_string();
    Status {
        code: StatusCode {
            value: code,
            nested: None,
        },
        message: node.child_text(consts::SAML1P_NS, "StatusMessage"),
        detail: None,
    }
}

fn read_status(node: &XmlNode) -> Status {
    let code = node
        .child(consts::SAML20P_NS, "StatusCode")
        .map(read_status_code)
        .unwrap_or(StatusCode {
            value: String::new(),
            nested: None,
        });
    Status {
        code,
        message: node.child_text(consts::SAML20P_NS, "StatusMessage"),
        detail: node.child_text(consts::SAML20P_NS, "StatusDetail"),
    }
}

fn read_status_code(node: &XmlNode) -> StatusCode {
    StatusCode {
        value: node.attr("Value").unwrap_or("").to_string(),
        nested: node
            .child(consts::SAML20P_NS, "StatusCode")
            .map(|n| Box::new(read_status_code(n))),
    }
}

// ---------- XML-DSig / XML-Enc ----------

pub(crate) fn read_signature(node: &XmlNode) -> Result<Signature, SamlError> {
    let mut signature = Signature::default();

    if let Some(signed_info) = node.child(consts::XMLSIG_NS, "SignedInfo") {
        signature.signed_info = signed_info.raw.clone();
        signature.canonicalization_method = signed_info
            .child(consts::XMLSIG_NS, "CanonicalizationMethod")
            .and_then(|c| c.attr("Algorithm"))
            .unwrap_or("")
            .to_string();
        signature.algorithm = signed_info
            .child(consts::XMLSIG_NS, "SignatureMethod")
            .and_then(|c| c.attr("Algorithm"))
            .unwrap_or("")
            .to_string();

        for reference in signed_info.children_named(consts::XMLSIG_NS, "Reference") {
            let transforms = reference
                .child(consts::XMLSIG_NS, "Transforms")
                .map(|t| {
                    t.children_named(consts::XMLSIG_NS, "Transform")
                        .filter_map(|tr| tr.attr("Algorithm"))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let digest_value = reference
                .child_text(consts::XMLSIG_NS, "DigestValue")
                .and_then(|v| BASE64.decode(v.replace(['\n', '\r', ' '], "")).ok())
                .unwrap_or_default();
            signature.references.push(SignatureReference {
                uri: reference.attr("URI").map(str::to_string),
                transforms,
                digest_algorithm: reference
                    .child(consts::XMLSIG_NS, "DigestMethod")
                    .and_then(|d| d.attr("Algorithm"))
                    .unwrap_or("")
                    .to_string(),
                digest_value,
            });
        }
    }

    if let Some(value) = node.child_text(consts::XMLSIG_NS, "SignatureValue") {
        signature.signature_value = BASE64
            .decode(value.replace(['\n', '\r', ' '], ""))
            .map_err(|_| SamlError::Binding("malformed SignatureValue".to_string()))?;
    }

    if let Some(key_info) = node.child(consts::XMLSIG_NS, "KeyInfo") {
        signature.key_info = Some(read_key_info(key_info));
    }

    Ok(signature)
}

pub(crate) fn read_key_info(node: &XmlNode) -> KeyInfo {
    let mut info = KeyInfo::default();
    for child in &node.children {
        if child.is(consts::XMLSIG_NS, "KeyName") {
            let name = child.text.trim();
            if !name.is_empty() {
                info.key_names.push(name.to_string());
            }
        } else if child.is(consts::XMLSIG_NS, "X509Data") {
            for cert in child.children_named(consts::XMLSIG_NS, "X509Certificate") {
                if let Ok(der) = BASE64.decode(cert.text.replace(['\n', '\r', ' '], "")) {
                    info.x509_certificates.push(der);
                }
            }
        } else if child.is(consts::XMLSIG_NS, "KeyValue") {
            // DER SPKI smuggled in a DEREncodedKeyValue-style child.
            for der in child.children.iter() {
                if let Ok(bytes) = BASE64.decode(der.text.replace(['\n', '\r', ' '], "")) {
                    if !bytes.is_empty() {
                        info.public_keys.push(bytes);
                    }
                }
            }
        } else if child.local_name == "DEREncodedKeyValue" {
            if let Ok(bytes) = BASE64.decode(child.text.replace(['\n', '\r', ' '], "")) {
                info.public_keys.push(bytes);
            }
        }
    }
    info
}

pub(crate) fn read_encrypted_element(node: &XmlNode) -> Result<EncryptedElement, SamlError> {
    let mut element = EncryptedElement::default();
    for child in &node.children {
        if child.is(consts::XMLENC_NS, "EncryptedData") {
            element.encrypted_data = Some(read_encrypted_data(child)?);
        } else if child.is(consts::XMLENC_NS, "EncryptedKey") {
            element.encrypted_keys.push(read_encrypted_key(child)?);
        }
    }
    Ok(element)
}

fn read_cipher_value(node: &XmlNode) -> Result<Vec<u8>, SamlError> {
    node.child(consts::XMLENC_NS, "CipherData")
        .and_then(|cd| cd.child_text(consts::XMLENC_NS, "CipherValue"))
        .and_then(|v| BASE64.decode(v.replace(['\n', '\r', ' '], "")).ok())
        .ok_or_else(|| SamlError::Binding("missing or malformed CipherValue".to_string()))
}

fn read_encrypted_data(node: &XmlNode) -> Result<EncryptedData, SamlError> {
    Ok(EncryptedData {
        id: node.attr("Id").map(str::to_string),
        algorithm: node
            .child(consts::XMLENC_NS, "EncryptionMethod")
            .and_then(|m| m.attr("Algorithm"))
            .unwrap_or("")
            .to_string(),
        key_info: node.child(consts::XMLSIG_NS, "KeyInfo").map(read_key_info),
        ciphertext: read_cipher_value(node)?,
    })
}

fn read_encrypted_key(node: &XmlNode) -> Result<EncryptedKey, SamlError> {
    Ok(EncryptedKey {
        id: node.attr("Id").map(str::to_string),
        algorithm: node
            .child(consts::XMLENC_NS, "EncryptionMethod")
            .and_then(|m| m.attr("Algorithm"))
            .unwrap_or("")
            .to_string(),
        recipient: node.attr("Recipient").map(str::to_string),
        key_info: node.child(consts::XMLSIG_NS, "KeyInfo").map(read_key_info),
        ciphertext: read_cipher_value(node)?,
        carried_key_name: node.child_text(consts::XMLENC_NS, "CarriedKeyName"),
        data_references: node
            .child(consts::XMLENC_NS, "ReferenceList")
            .map(|rl| {
                rl.children_named(consts::XMLENC_NS, "DataReference")
                    .filter_map(|d| d.attr("URI"))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    })
}

fn required_attr(node: &XmlNode, name: &str) -> Result<String, SamlError> {
    node.attr(name)
        .map(str::to_string)
        .ok_or_else(|| SamlError::Binding(format!("{} missing {} attribute", node.local_name, name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_resp1" InResponseTo="_req1" IssueInstant="2026-08-01T12:00:00Z" Version="2.0">
  <saml:Issuer>https://idp.example.org</saml:Issuer>
  <samlp:Status>
    <samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/>
  </samlp:Status>
  <saml:Assertion ID="_a1" IssueInstant="2026-08-01T12:00:00Z" Version="2.0">
    <saml:Issuer>https://idp.example.org</saml:Issuer>
    <saml:Subject>
      <saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">user@example.org</saml:NameID>
      <saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">
        <saml:SubjectConfirmationData Recipient="https://sp.example.org/ACS" InResponseTo="_req1" NotOnOrAfter="2026-08-01T12:05:00Z"/>
      </saml:SubjectConfirmation>
    </saml:Subject>
    <saml:Conditions NotBefore="2026-08-01T11:55:00Z" NotOnOrAfter="2026-08-01T12:05:00Z">
      <saml:AudienceRestriction>
        <saml:Audience>https://sp.example.org</saml:Audience>
      </saml:AudienceRestriction>
      <saml:OneTimeUse/>
    </saml:Conditions>
    <saml:AuthnStatement AuthnInstant="2026-08-01T12:00:00Z" SessionIndex="_s1"/>
  </saml:Assertion>
</samlp:Response>"#;

    #[test]
    fn test_read_response() {
        let msg = read_message(RESPONSE.as_bytes()).unwrap();
        let SamlMessage::Response(response) = msg else {
            panic!("expected Response");
        };
        assert_eq!(response.id, "_resp1");
        assert_eq!(response.in_response_to.as_deref(), Some("_req1"));
        assert!(response.status.as_ref().unwrap().is_success());
        assert_eq!(response.assertions.len(), 1);

        let assertion = &response.assertions[0];
        assert_eq!(
            assertion.issuer.as_ref().unwrap().name,
            "https://idp.example.org"
        );
        let subject = assertion.subject.as_ref().unwrap();
        assert_eq!(subject.confirmations.len(), 1);
        assert_eq!(
            subject.confirmations[0].method,
            consts::CONFIRMATION_BEARER
        );
        let conditions = assertion.conditions.as_ref().unwrap();
        assert_eq!(conditions.conditions.len(), 2);
        assert!(matches!(
            conditions.conditions[1],
            Condition::OneTimeUse
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let xml = RESPONSE.replace("_a1", "_resp1");
        let err = read_message(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, SamlError::Binding(_)));
    }

    #[test]
    fn test_read_saml1_response() {
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:1.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:1.0:assertion" ResponseID="_r1" IssueInstant="2026-08-01T12:00:00Z" MajorVersion="1" MinorVersion="1" Recipient="https://sp.example.org/SSO">
  <samlp:Status><samlp:StatusCode Value="samlp:Success"/></samlp:Status>
  <saml:Assertion AssertionID="_a1" Issuer="https://idp.example.org" IssueInstant="2026-08-01T12:00:00Z" MajorVersion="1" MinorVersion="1">
    <saml:Conditions NotBefore="2026-08-01T11:55:00Z" NotOnOrAfter="2026-08-01T12:05:00Z"/>
    <saml:AuthenticationStatement AuthenticationInstant="2026-08-01T12:00:00Z">
      <saml:Subject>
        <saml:SubjectConfirmation>
          <saml:ConfirmationMethod>urn:oasis:names:tc:SAML:1.0:cm:bearer</saml:ConfirmationMethod>
        </saml:SubjectConfirmation>
      </saml:Subject>
    </saml:AuthenticationStatement>
  </saml:Assertion>
</samlp:Response>"#;
        let msg = read_message(xml.as_bytes()).unwrap();
        let SamlMessage::Saml1Response(response) = msg else {
            panic!("expected SAML 1 Response");
        };
        assert_eq!(response.response_id, "_r1");
        assert_eq!(response.protocol(), consts::SAML11_PROTOCOL_ENUM);
        assert_eq!(response.assertions.len(), 1);
        assert_eq!(
            response.assertions[0].statements[0].confirmation_methods,
            vec![consts::SAML1_CONFIRMATION_BEARER.to_string()]
        );
    }

    #[test]
    fn test_read_soap_envelope() {
        let xml = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/">
  <S:Body>
    <samlp:Request xmlns:samlp="urn:oasis:names:tc:SAML:1.0:protocol" RequestID="_q1" IssueInstant="2026-08-01T12:00:00Z" MajorVersion="1" MinorVersion="1">
      <samlp:AssertionArtifact>AAEAAAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8gISIj</samlp:AssertionArtifact>
    </samlp:Request>
  </S:Body>
</S:Envelope>"#;
        let msg = read_message(xml.as_bytes()).unwrap();
        let SamlMessage::Envelope(envelope) = msg else {
            panic!("expected Envelope");
        };
        assert_eq!(envelope.body.len(), 1);
        let SamlMessage::Saml1Request(request) = &envelope.body[0] else {
            panic!("expected SAML 1 Request in body");
        };
        assert_eq!(request.request_id, "_q1");
        assert_eq!(request.artifacts.len(), 1);
    }
}
