//! Metadata tree reader
//!
//! Turns an EntityDescriptor / EntitiesDescriptor document into the bean
//! model. Unrecognized roles are kept (as `RoleType::Other`) so the
//! role-whitelist filter can still evict them by name.

use crate::error::SamlError;
use crate::model::consts;
use crate::model::metadata::*;
use crate::model::saml::Attribute;
use crate::xml::{parse_datetime, parse_duration, XmlNode};

use super::message::read_signature;

/// Read a metadata document from raw XML.
pub fn read_metadata(input: &[u8]) -> Result<MetadataRoot, SamlError> {
    let root = super::parse_document(input)?;
    read_metadata_root(&root)
}

/// Read a metadata document from an already-parsed tree.
pub fn read_metadata_root(root: &XmlNode) -> Result<MetadataRoot, SamlError> {
    if root.is(consts::SAML20MD_NS, "EntitiesDescriptor") {
        Ok(MetadataRoot::Entities(read_entities(root)?))
    } else if root.is(consts::SAML20MD_NS, "EntityDescriptor") {
        Ok(MetadataRoot::Entity(read_entity(root)?))
    } else {
        Err(SamlError::Metadata(format!(
            "root of metadata instance not recognized: {{{}}}{}",
            root.namespace.as_deref().unwrap_or(""),
            root.local_name
        )))
    }
}

fn read_entities(node: &XmlNode) -> Result<EntitiesDescriptor, SamlError> {
    let mut group = EntitiesDescriptor {
        name: node.attr("Name").map(str::to_string),
        id: node.attr("ID").map(str::to_string),
        valid_until: node.attr("validUntil").and_then(parse_datetime),
        cache_duration: node.attr("cacheDuration").and_then(parse_duration),
        ..Default::default()
    };

    for child in &node.children {
        if child.is(consts::SAML20MD_NS, "EntitiesDescriptor") {
            group.groups.push(read_entities(child)?);
        } else if child.is(consts::SAML20MD_NS, "EntityDescriptor") {
            group.entities.push(read_entity(child)?);
        } else if child.is(consts::SAML20MD_NS, "Extensions") {
            group.extensions = Some(read_extensions(child));
        } else if child.is(consts::XMLSIG_NS, "Signature") {
            group.signature = Some(read_signature(child)?);
        }
    }

    Ok(group)
}

pub(crate) fn read_entity(node: &XmlNode) -> Result<EntityDescriptor, SamlError> {
    let entity_id = node
        .attr("entityID")
        .ok_or_else(|| SamlError::Metadata("EntityDescriptor missing entityID".to_string()))?
        .to_string();

    let mut entity = EntityDescriptor {
        entity_id,
        id: node.attr("ID").map(str::to_string),
        valid_until: node.attr("validUntil").and_then(parse_datetime),
        cache_duration: node.attr("cacheDuration").and_then(parse_duration),
        ..Default::default()
    };

    for child in &node.children {
        let Some(ns) = child.namespace.as_deref() else {
            continue;
        };
        if ns == consts::SAML20MD_NS {
            match child.local_name.as_str() {
                "IDPSSODescriptor" => entity.roles.push(read_role(child, RoleType::IdpSso)?),
                "SPSSODescriptor" => entity.roles.push(read_role(child, RoleType::SpSso)?),
                "AuthnAuthorityDescriptor" => {
                    entity.roles.push(read_role(child, RoleType::AuthnAuthority)?)
                }
                "AttributeAuthorityDescriptor" => entity
                    .roles
                    .push(read_role(child, RoleType::AttributeAuthority)?),
                "PDPDescriptor" => entity.roles.push(read_role(child, RoleType::Pdp)?),
                "RoleDescriptor" => {
                    // Typed query descriptors arrive as RoleDescriptor with an
                    // xsi:type; anything else is retained by element name.
                    let role_type = match child.attr("type").map(|t| t.rsplit(':').next().unwrap_or(t))
                    {
                        Some("AuthnQueryDescriptorType") => RoleType::AuthnQuery,
                        Some("AttributeQueryDescriptorType") => RoleType::AttributeQuery,
                        Some("AuthzDecisionQueryDescriptorType") => RoleType::AuthzQuery,
                        Some(other) => RoleType::Other(other.to_string()),
                        None => RoleType::Other("RoleDescriptor".to_string()),
                    };
                    entity.roles.push(read_role(child, role_type)?);
                }
                "AffiliationDescriptor" => {
                    entity.affiliation = Some(read_affiliation(child)?);
                }
                "Organization" => entity.organization = Some(read_organization(child)),
                "ContactPerson" => entity.contact_persons.push(read_contact(child)),
                "Extensions" => entity.extensions = Some(read_extensions(child)),
                _ => {}
            }
        } else if child.is(consts::XMLSIG_NS, "Signature") {
            entity.signature = Some(read_signature(child)?);
        }
    }

    Ok(entity)
}

fn read_role(node: &XmlNode, role_type: RoleType) -> Result<RoleDescriptor, SamlError> {
    let mut role = RoleDescriptor {
        role_type: Some(role_type),
        protocol_support_enumeration: node
            .attr("protocolSupportEnumeration")
            .unwrap_or("")
            .to_string(),
        error_url: node.attr("errorURL").map(str::to_string),
        valid_until: node.attr("validUntil").and_then(parse_datetime),
        cache_duration: node.attr("cacheDuration").and_then(parse_duration),
        want_authn_requests_signed: node.attr("WantAuthnRequestsSigned").and_then(parse_bool),
        authn_requests_signed: node.attr("AuthnRequestsSigned").and_then(parse_bool),
        ..Default::default()
    };

    for child in &node.children {
        let Some(ns) = child.namespace.as_deref() else {
            continue;
        };
        if ns == consts::SAML20MD_NS {
            match child.local_name.as_str() {
                "KeyDescriptor" => role.key_descriptors.push(read_key_descriptor(child)),
                "Extensions" => role.extensions = Some(read_extensions(child)),
                "Organization" => role.organization = Some(read_organization(child)),
                "ContactPerson" => role.contact_persons.push(read_contact(child)),
                "SingleSignOnService" => role.single_sign_on_services.push(read_endpoint(child)),
                "ArtifactResolutionService" => role
                    .artifact_resolution_services
                    .push(read_indexed_endpoint(child)),
                "AssertionConsumerService" => role
                    .assertion_consumer_services
                    .push(read_indexed_endpoint(child)),
                _ => {}
            }
        } else if child.is(consts::XMLSIG_NS, "Signature") {
            role.signature = Some(read_signature(child)?);
        }
    }

    Ok(role)
}

fn read_affiliation(node: &XmlNode) -> Result<AffiliationDescriptor, SamlError> {
    let mut affiliation = AffiliationDescriptor {
        affiliation_owner_id: node
            .attr("affiliationOwnerID")
            .unwrap_or("")
            .to_string(),
        ..Default::default()
    };
    for child in node.children_named(consts::SAML20MD_NS, "AffiliateMember") {
        let member = child.text.trim();
        if !member.is_empty() {
            affiliation.members.push(member.to_string());
        }
    }
    for child in node.children_named(consts::SAML20MD_NS, "KeyDescriptor") {
        affiliation.key_descriptors.push(read_key_descriptor(child));
    }
    Ok(affiliation)
}

fn read_key_descriptor(node: &XmlNode) -> KeyDescriptor {
    let key_use = match node.attr("use") {
        Some("signing") => Some(KeyUse::Signing),
        Some("encryption") => Some(KeyUse::Encryption),
        _ => None,
    };

    let key_info = node
        .child(consts::XMLSIG_NS, "KeyInfo")
        .map(super::message::read_key_info);

    let encryption_methods = node
        .children_named(consts::SAML20MD_NS, "EncryptionMethod")
        .filter_map(|m| m.attr("Algorithm"))
        .map(|a| EncryptionMethod {
            algorithm: a.to_string(),
        })
        .collect();

    KeyDescriptor {
        key_use,
        key_info,
        encryption_methods,
    }
}

fn read_endpoint(node: &XmlNode) -> Endpoint {
    Endpoint {
        binding: node.attr("Binding").unwrap_or("").to_string(),
        location: node.attr("Location").unwrap_or("").to_string(),
        response_location: node.attr("ResponseLocation").map(str::to_string),
    }
}

fn read_indexed_endpoint(node: &XmlNode) -> IndexedEndpoint {
    IndexedEndpoint {
        endpoint: read_endpoint(node),
        index: node.attr("index").and_then(|i| i.parse().ok()),
        is_default: node.attr("isDefault").and_then(parse_bool),
    }
}

fn read_organization(node: &XmlNode) -> Organization {
    Organization {
        display_names: node
            .children_named(consts::SAML20MD_NS, "OrganizationDisplayName")
            .map(read_localized)
            .collect(),
    }
}

fn read_contact(node: &XmlNode) -> ContactPerson {
    ContactPerson {
        contact_type: node.attr("contactType").unwrap_or("").to_string(),
        given_name: node.child_text(consts::SAML20MD_NS, "GivenName"),
        sur_name: node.child_text(consts::SAML20MD_NS, "SurName"),
        email_addresses: node
            .children_named(consts::SAML20MD_NS, "EmailAddress")
            .map(|c| c.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
    }
}

fn read_localized(node: &XmlNode) -> LocalizedString {
    LocalizedString {
        value: node.text.trim().to_string(),
        lang: node.attr("lang").map(str::to_string),
    }
}

fn read_extensions(node: &XmlNode) -> Extensions {
    let mut ext = Extensions::default();
    for child in &node.children {
        let Some(ns) = child.namespace.as_deref() else {
            continue;
        };
        match (ns, child.local_name.as_str()) {
            (consts::SAML1MD_NS, "SourceID") => {
                if let Ok(bytes) = hex::decode(child.text.trim()) {
                    ext.source_id = Some(bytes);
                }
            }
            (consts::SAML20MDUI_NS, "UIInfo") => ext.ui_info = Some(read_ui_info(child)),
            (consts::SAML20MDUI_NS, "DiscoHints") => {
                ext.disco_hints = Some(read_disco_hints(child))
            }
            (consts::SAML20MDATTR_NS, "EntityAttributes") => {
                ext.entity_attributes = Some(read_entity_attributes(child))
            }
            (consts::SAML20MDRPI_NS, "RegistrationInfo") => {
                ext.registration_info = Some(RegistrationInfo {
                    registration_authority: child
                        .attr("registrationAuthority")
                        .unwrap_or("")
                        .to_string(),
                    registration_instant: child
                        .attr("registrationInstant")
                        .and_then(parse_datetime),
                })
            }
            (consts::SAML20ALG_NS, "DigestMethod") => {
                if let Some(alg) = child.attr("Algorithm") {
                    ext.digest_methods.push(alg.to_string());
                }
            }
            (consts::SAML20ALG_NS, "SigningMethod") => {
                if let Some(alg) = child.attr("Algorithm") {
                    ext.signing_methods.push(alg.to_string());
                }
            }
            _ => {}
        }
    }
    ext
}

fn read_ui_info(node: &XmlNode) -> UiInfo {
    let mut ui = UiInfo::default();
    for child in &node.children {
        if child.namespace.as_deref() != Some(consts::SAML20MDUI_NS) {
            continue;
        }
        match child.local_name.as_str() {
            "DisplayName" => ui.display_names.push(read_localized(child)),
            "Description" => ui.descriptions.push(read_localized(child)),
            "Keywords" => ui.keywords.push(read_localized(child)),
            "InformationURL" => ui.information_urls.push(read_localized(child)),
            "PrivacyStatementURL" => ui.privacy_statement_urls.push(read_localized(child)),
            "Logo" => ui.logos.push(Logo {
                value: child.text.trim().to_string(),
                height: child.attr("height").and_then(|v| v.parse().ok()).unwrap_or(0),
                width: child.attr("width").and_then(|v| v.parse().ok()).unwrap_or(0),
                lang: child.attr("lang").map(str::to_string),
            }),
            _ => {}
        }
    }
    ui
}

fn read_disco_hints(node: &XmlNode) -> DiscoHints {
    let mut hints = DiscoHints::default();
    for child in &node.children {
        if child.namespace.as_deref() != Some(consts::SAML20MDUI_NS) {
            continue;
        }
        let text = child.text.trim().to_string();
        if text.is_empty() {
            continue;
        }
        match child.local_name.as_str() {
            "IPHint" => hints.ip_hints.push(text),
            "DomainHint" => hints.domain_hints.push(text),
            "GeolocationHint" => hints.geolocation_hints.push(text),
            _ => {}
        }
    }
    hints
}

fn read_entity_attributes(node: &XmlNode) -> EntityAttributes {
    let mut attrs = EntityAttributes::default();
    for child in node.children_named(consts::SAML20_NS, "Attribute") {
        let Some(name) = child.attr("Name") else {
            continue;
        };
        attrs.attributes.push(Attribute {
            name: name.to_string(),
            name_format: child.attr("NameFormat").map(str::to_string),
            values: child
                .children_named(consts::SAML20_NS, "AttributeValue")
                .map(|v| v.text.clone())
                .collect(),
        });
    }
    attrs
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
