//! Discovery feed generation
//!
//! Emits a JSON array with one object per IdP-SSO-capable entity, sourced
//! from the role's UIInfo extension (with an optional legacy fallback to the
//! organization display names). The feed cache tag is a random 4-byte hex
//! string regenerated on every change event.

use rand::RngCore;
use serde::Serialize;

use crate::model::metadata::{EntityDescriptor, LocalizedString, RoleType, UiInfo};

/// Localized value as the feed represents it.
#[derive(Debug, Clone, Serialize)]
pub struct FeedValue {
    pub value: String,
    pub lang: String,
}

impl From<&LocalizedString> for FeedValue {
    fn from(ls: &LocalizedString) -> Self {
        Self {
            value: ls.value.clone(),
            lang: ls.lang.clone().unwrap_or_default(),
        }
    }
}

/// Logo entry in the feed.
#[derive(Debug, Clone, Serialize)]
pub struct FeedLogo {
    pub value: String,
    pub height: u32,
    pub width: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// One feed entry.
#[derive(Debug, Clone, Serialize)]
pub struct FeedEntity {
    #[serde(rename = "entityID")]
    pub entity_id: String,
    #[serde(rename = "DisplayNames", skip_serializing_if = "Vec::is_empty")]
    pub display_names: Vec<FeedValue>,
    #[serde(rename = "Descriptions", skip_serializing_if = "Vec::is_empty")]
    pub descriptions: Vec<FeedValue>,
    #[serde(rename = "Keywords", skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<FeedValue>,
    #[serde(rename = "InformationURLs", skip_serializing_if = "Vec::is_empty")]
    pub information_urls: Vec<FeedValue>,
    #[serde(rename = "PrivacyStatementURLs", skip_serializing_if = "Vec::is_empty")]
    pub privacy_statement_urls: Vec<FeedValue>,
    #[serde(rename = "Logos", skip_serializing_if = "Vec::is_empty")]
    pub logos: Vec<FeedLogo>,
}

fn ui_entry(entity_id: &str, ui: &UiInfo) -> FeedEntity {
    FeedEntity {
        entity_id: entity_id.to_string(),
        display_names: ui.display_names.iter().map(FeedValue::from).collect(),
        descriptions: ui.descriptions.iter().map(FeedValue::from).collect(),
        keywords: ui.keywords.iter().map(FeedValue::from).collect(),
        information_urls: ui.information_urls.iter().map(FeedValue::from).collect(),
        privacy_statement_urls: ui
            .privacy_statement_urls
            .iter()
            .map(FeedValue::from)
            .collect(),
        logos: ui
            .logos
            .iter()
            .map(|l| FeedLogo {
                value: l.value.clone(),
                height: l.height,
                width: l.width,
                lang: l.lang.clone(),
            })
            .collect(),
    }
}

/// Feed entry for a single entity, or None when it advertises no IdP SSO
/// role.
pub fn feed_entity(entity: &EntityDescriptor, legacy_org_names: bool) -> Option<FeedEntity> {
    let idp = entity
        .roles
        .iter()
        .find(|r| r.role_type == Some(RoleType::IdpSso))?;

    if let Some(ui) = idp.extensions.as_ref().and_then(|e| e.ui_info.as_ref()) {
        return Some(ui_entry(&entity.entity_id, ui));
    }

    if legacy_org_names {
        let org = idp
            .organization
            .as_ref()
            .or(entity.organization.as_ref())?;
        if !org.display_names.is_empty() {
            return Some(FeedEntity {
                entity_id: entity.entity_id.clone(),
                display_names: org.display_names.iter().map(FeedValue::from).collect(),
                descriptions: Vec::new(),
                keywords: Vec::new(),
                information_urls: Vec::new(),
                privacy_statement_urls: Vec::new(),
                logos: Vec::new(),
            });
        }
        return None;
    }

    Some(FeedEntity {
        entity_id: entity.entity_id.clone(),
        display_names: Vec::new(),
        descriptions: Vec::new(),
        keywords: Vec::new(),
        information_urls: Vec::new(),
        privacy_statement_urls: Vec::new(),
        logos: Vec::new(),
    })
}

/// Serialize a complete feed (UTF-8 JSON array).
pub fn generate_feed<'a>(
    entities: impl Iterator<Item = &'a EntityDescriptor>,
    legacy_org_names: bool,
) -> String {
    let entries: Vec<FeedEntity> = entities
        .filter_map(|e| feed_entity(e, legacy_org_names))
        .collect();
    serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
}

/// Fresh feed cache tag: 4 random bytes as lowercase hex.
pub fn generate_feed_tag() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A provider able to serve the discovery feed.
pub trait DiscoverableMetadata: Send + Sync {
    /// Current feed content, when generated.
    fn feed(&self) -> Option<String>;

    /// Cache tag regenerated on change events.
    fn feed_tag(&self) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::metadata::{
        Extensions, Logo, Organization, RoleDescriptor,
    };

    fn idp_entity(id: &str, ui: Option<UiInfo>) -> EntityDescriptor {
        EntityDescriptor {
            entity_id: id.to_string(),
            roles: vec![RoleDescriptor {
                role_type: Some(RoleType::IdpSso),
                extensions: ui.map(|u| Extensions {
                    ui_info: Some(u),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_feed_from_ui_info() {
        let ui = UiInfo {
            display_names: vec![LocalizedString {
                value: "Example IdP".to_string(),
                lang: Some("en".to_string()),
            }],
            logos: vec![Logo {
                value: "https://idp/logo.png".to_string(),
                height: 32,
                width: 32,
                lang: None,
            }],
            ..Default::default()
        };
        let entity = idp_entity("https://idp.example.org", Some(ui));
        let feed = generate_feed([&entity].into_iter(), false);

        let parsed: serde_json::Value = serde_json::from_str(&feed).unwrap();
        assert_eq!(parsed[0]["entityID"], "https://idp.example.org");
        assert_eq!(parsed[0]["DisplayNames"][0]["value"], "Example IdP");
        assert_eq!(parsed[0]["DisplayNames"][0]["lang"], "en");
        assert_eq!(parsed[0]["Logos"][0]["height"], 32);
    }

    #[test]
    fn test_non_idp_entities_excluded() {
        let entity = EntityDescriptor {
            entity_id: "https://sp.example.org".to_string(),
            roles: vec![RoleDescriptor {
                role_type: Some(RoleType::SpSso),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(feed_entity(&entity, false).is_none());
    }

    #[test]
    fn test_legacy_org_names_fallback() {
        let mut entity = idp_entity("https://idp.example.org", None);
        entity.organization = Some(Organization {
            display_names: vec![LocalizedString {
                value: "Example Org".to_string(),
                lang: Some("en".to_string()),
            }],
        });

        let with_legacy = feed_entity(&entity, true).unwrap();
        assert_eq!(with_legacy.display_names[0].value, "Example Org");

        let without = feed_entity(&entity, false).unwrap();
        assert!(without.display_names.is_empty());
    }

    #[test]
    fn test_feed_tag_format() {
        let tag = generate_feed_tag();
        assert_eq!(tag.len(), 8);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_feed_escapes_json() {
        let ui = UiInfo {
            display_names: vec![LocalizedString {
                value: "quote \" and \\ backslash".to_string(),
                lang: None,
            }],
            ..Default::default()
        };
        let entity = idp_entity("https://idp.example.org", Some(ui));
        let feed = generate_feed([&entity].into_iter(), false);
        let parsed: serde_json::Value = serde_json::from_str(&feed).unwrap();
        assert_eq!(
            parsed[0]["DisplayNames"][0]["value"],
            "quote \" and \\ backslash"
        );
    }
}
