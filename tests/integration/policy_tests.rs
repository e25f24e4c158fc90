//! End-to-end policy pipeline tests

use std::sync::Arc;

use chrono::{Duration, Utc};

use saml_core::model::saml::{Issuer, Response, SamlMessage};
use saml_core::policy::rules::{
    BearerConfirmationConfig, BearerConfirmationRule, ConditionsRule, MessageFlowConfig,
    MessageFlowRule,
};
use saml_core::policy::SecurityPolicy;
use saml_core::InMemoryReplayCache;

use crate::common::*;

fn decoded_response(id: &str) -> SamlMessage {
    SamlMessage::Response(Response {
        id: id.to_string(),
        issue_instant: Some(Utc::now()),
        issuer: Some(Issuer::entity(IDP_ENTITY_ID)),
        ..Default::default()
    })
}

#[tokio::test]
async fn replay_is_idempotent_across_policies() {
    let cache: Arc<InMemoryReplayCache> = Arc::new(InMemoryReplayCache::new());
    let message = decoded_response("_replay1");

    for expected_ok in [true, false] {
        let mut policy = SecurityPolicy::new(None, None, None, false);
        policy.set_replay_cache(cache.clone());
        policy.add_rule(Box::new(MessageFlowRule::default()));
        policy.set_message_id(Some("_replay1".to_string()));
        policy.set_issue_instant(Some(Utc::now()));

        let outcome = policy.evaluate(&message, None).await;
        assert_eq!(outcome.is_ok(), expected_ok);
        if let Err(e) = outcome {
            assert!(matches!(e, saml_core::SamlError::SecurityPolicy(_)));
        }
    }
}

// If the rule accepts at time t, it accepts anywhere within
// [issue - skew, issue + skew + expires] modulo replay.
#[rstest::rstest]
#[case(-29, true)]
#[case(0, true)]
#[case(45, true)]
#[case(89, true)]
#[case(-31, false)]
#[case(91, false)]
#[tokio::test]
async fn freshness_window_is_monotonic(#[case] offset_secs: i64, #[case] accepted: bool) {
    crate::common::init_tracing();
    let issue = Utc::now();
    let message = decoded_response("_window1");

    let mut policy = SecurityPolicy::new(None, None, None, false);
    policy.set_clock_skew(Duration::seconds(30));
    policy.set_time(issue + Duration::seconds(offset_secs));
    policy.set_issue_instant(Some(issue));
    policy.add_rule(Box::new(MessageFlowRule::new(MessageFlowConfig {
        check_replay: false,
        ..Default::default()
    })));

    assert_eq!(
        policy.evaluate(&message, None).await.is_ok(),
        accepted,
        "offset {}",
        offset_secs
    );
}

#[tokio::test]
async fn conflicting_issuers_between_rules_are_fatal() {
    let mut policy = SecurityPolicy::new(None, None, None, false);
    policy.set_issuer(Issuer::entity(IDP_ENTITY_ID)).unwrap();
    assert!(policy.set_issuer(Issuer::entity("https://evil.example.org")).is_err());
}

#[tokio::test]
async fn full_browser_sso_pipeline_on_decoded_assertion() {
    // Conditions + Bearer against a fully-populated assertion.
    let xml = saml2_response_xml("_pipeline1", Some("_req1"));
    let message = saml_core::xml::message::read_message(xml.as_bytes()).unwrap();
    let SamlMessage::Response(response) = message else {
        panic!("expected response");
    };
    let assertion = SamlMessage::Assertion(response.assertions[0].clone());

    let request = saml_core::binding::HttpRequest::builder()
        .method("POST")
        .url(&format!("{}?client=1", ACS_URL))
        .build();

    let mut policy = SecurityPolicy::new(None, None, None, false);
    policy.audiences_mut().push(SP_ENTITY_ID.to_string());
    policy.set_correlation_id(Some("_req1".to_string()));
    policy.add_rule(Box::new(ConditionsRule::with_default_rules()));
    policy.add_rule(Box::new(BearerConfirmationRule::new(
        BearerConfirmationConfig {
            check_correlation: true,
            ..Default::default()
        },
    )));

    policy.evaluate(&assertion, Some(&request)).await.unwrap();
    assert!(policy.subject_confirmation().is_some());

    // The wrong audience makes the Conditions rule fatal.
    let mut policy = SecurityPolicy::new(None, None, None, false);
    policy.audiences_mut().push("https://other.example.org".to_string());
    policy.add_rule(Box::new(ConditionsRule::with_default_rules()));
    assert!(policy.evaluate(&assertion, Some(&request)).await.is_err());
}

#[tokio::test]
async fn error_annotation_carries_contact_details() {
    let root = saml_core::xml::metadata::read_metadata(idp_metadata_xml().as_bytes()).unwrap();
    let saml_core::model::metadata::MetadataRoot::Entity(entity) = root else {
        panic!("expected entity root");
    };

    let err = saml_core::annotate_error(
        saml_core::SamlError::SecurityPolicy("Assertion is no longer valid.".to_string()),
        Some(&entity),
        Some(&entity.roles[0]),
        None,
    );

    assert_eq!(
        err.properties.get("entityID").map(String::as_str),
        Some(IDP_ENTITY_ID)
    );
    assert_eq!(
        err.properties.get("contactName").map(String::as_str),
        Some("Federation Support")
    );
    assert_eq!(
        err.properties.get("contactEmail").map(String::as_str),
        Some("mailto:support@example.org")
    );
}
