//! Metadata provider integration tests

use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use saml_core::metadata::chaining::{ChainingProviderBuilder, Precedence};
use saml_core::metadata::dynamic::{DynamicProvider, DynamicProviderConfig, MdqFetcher};
use saml_core::metadata::{
    DiscoverableMetadata, LookupCriteria, MetadataObserver, MetadataProvider, XmlProvider,
    XmlProviderConfig,
};
use saml_core::model::consts;
use saml_core::model::metadata::{KeyUse, RoleType};
use saml_core::security::MetadataCredentialCriteria;

use crate::common::*;

fn entity_xml(id: &str) -> String {
    format!(
        r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:Extensions xmlns:mdui="urn:oasis:names:tc:SAML:metadata:ui">
      <mdui:UIInfo>
        <mdui:DisplayName xml:lang="en">Example IdP</mdui:DisplayName>
      </mdui:UIInfo>
    </md:Extensions>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
        id
    )
}

struct CountingObserver(std::sync::atomic::AtomicUsize);

impl MetadataObserver for CountingObserver {
    fn on_change(&self, _provider_id: &str) {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[tokio::test]
async fn remote_provider_loads_and_serves_feed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metadata.xml"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(entity_xml("https://remote.example.org")),
        )
        .mount(&server)
        .await;

    let provider = XmlProvider::new(XmlProviderConfig::for_source(format!(
        "{}/metadata.xml",
        server.uri()
    )))
    .unwrap();
    provider.initialize().await.unwrap();

    let mut guard = provider.lock().await;
    assert!(provider
        .entity(
            &mut guard,
            &LookupCriteria::entity_id("https://remote.example.org")
        )
        .await
        .unwrap()
        .is_some());
    drop(guard);

    let feed = provider.feed().unwrap();
    assert!(feed.contains("Example IdP"));
    let tag = provider.feed_tag().unwrap();
    assert_eq!(tag.len(), 8);
}

#[tokio::test]
async fn remote_failure_backs_off_and_uses_backup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let backing = temp_file("backup.xml", &entity_xml("https://backup.example.org"));

    let mut config = XmlProviderConfig::for_source(format!("{}/metadata.xml", server.uri()));
    config.backing_file = Some(backing.clone());
    config.min_refresh_delay = 60;
    let provider = XmlProvider::new(config).unwrap();

    // Load fails remotely but falls back to the backup instance.
    provider.initialize().await.unwrap();

    let mut guard = provider.lock().await;
    assert!(provider
        .entity(
            &mut guard,
            &LookupCriteria::entity_id("https://backup.example.org")
        )
        .await
        .unwrap()
        .is_some());
    drop(guard);

    // Backoff landed on the minimum interval after one failure.
    assert_eq!(provider.reload_interval(), 60);

    std::fs::remove_file(backing).ok();
}

#[tokio::test]
async fn mdq_provider_queries_and_caches() {
    let server = MockServer::start().await;
    let encoded = urlencoding::encode(IDP_ENTITY_ID).into_owned();
    Mock::given(method("GET"))
        .and(path(format!("/entities/{}", encoded)))
        .respond_with(ResponseTemplate::new(200).set_body_string(idp_metadata_xml()))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = MdqFetcher::new(server.uri(), false, 5).unwrap();
    let provider = DynamicProvider::new(DynamicProviderConfig::default(), Box::new(fetcher));

    let criteria = LookupCriteria::entity_id(IDP_ENTITY_ID)
        .with_role(RoleType::IdpSso, consts::SAML20P_PROTOCOL_ENUM);

    let mut guard = provider.lock().await;
    let first = provider.entity(&mut guard, &criteria).await.unwrap();
    assert!(first.is_some());

    // Within the cache interval the second lookup never re-fetches; the
    // mock's expectation of one request enforces it.
    let second = provider.entity(&mut guard, &criteria).await.unwrap();
    assert!(second.unwrap().role.is_some());
    drop(guard);
}

#[tokio::test]
async fn credentials_resolve_through_provider_and_invalidate() {
    let path = temp_file("cred-metadata.xml", &idp_metadata_xml());
    let provider = XmlProvider::new(XmlProviderConfig::for_source(
        path.to_string_lossy().to_string(),
    ))
    .unwrap();
    let observer = Arc::new(CountingObserver(Default::default()));
    provider.add_observer(observer.clone());
    provider.initialize().await.unwrap();

    let mut guard = provider.lock().await;
    let criteria = LookupCriteria::entity_id(IDP_ENTITY_ID)
        .with_role(RoleType::IdpSso, consts::SAML20P_PROTOCOL_ENUM);
    let lookup = provider.entity(&mut guard, &criteria).await.unwrap().unwrap();
    let role = lookup.role.unwrap();

    let creds = provider
        .resolve(
            &guard,
            &MetadataCredentialCriteria::new(role).with_usage(KeyUse::Signing),
        )
        .await
        .unwrap();
    assert_eq!(creds.len(), 1);
    assert!(creds[0].has_key_name("idp-signing"));
    assert!(creds[0].public_key.is_some());
    drop(guard);

    // A reload with content change emits a change event.
    provider.refresh().await.unwrap();
    assert!(observer.0.load(std::sync::atomic::Ordering::SeqCst) >= 1);

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn chaining_first_match_lock_discipline() {
    let f1 = temp_file("chain-a.xml", &entity_xml("https://shared.example.org"));
    let f2 = temp_file("chain-b.xml", &entity_xml("https://shared.example.org"));

    let p1 = Arc::new(
        XmlProvider::new(XmlProviderConfig::for_source(f1.to_string_lossy().to_string())).unwrap(),
    );
    let p2 = Arc::new(
        XmlProvider::new(XmlProviderConfig::for_source(f2.to_string_lossy().to_string())).unwrap(),
    );

    let chain = ChainingProviderBuilder::new(Precedence::First)
        .push_discoverable(p1)
        .push_discoverable(p2)
        .build();
    chain.initialize().await.unwrap();

    let mut guard = chain.lock().await;
    let lookup = chain
        .entity(
            &mut guard,
            &LookupCriteria::entity_id("https://shared.example.org"),
        )
        .await
        .unwrap();
    assert!(lookup.is_some());
    // Only the first child's lock is held at unlock time.
    assert_eq!(guard.held_children(), vec![0]);
    drop(guard);

    // The merged discovery feed sees both children.
    let feed = chain.feed().unwrap();
    assert_eq!(feed.matches("https://shared.example.org").count(), 2);

    std::fs::remove_file(f1).ok();
    std::fs::remove_file(f2).ok();
}

#[tokio::test]
async fn filters_apply_through_registry_configuration() {
    let config = saml_core::SamlConfig::global();
    config.init();

    let group_xml = format!(
        r#"<md:EntitiesDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" Name="urn:example:federation">
{}
{}
</md:EntitiesDescriptor>"#,
        entity_xml("https://keep.example.org"),
        entity_xml("https://drop.example.org"),
    );
    let path = temp_file("filtered.xml", &group_xml);

    let provider = config
        .build_provider(
            "XML",
            &serde_json::json!({
                "source": path.to_string_lossy(),
                "filters": [
                    {"type": "Whitelist", "entities": ["https://keep.example.org"]}
                ]
            }),
        )
        .unwrap();
    provider.initialize().await.unwrap();

    let mut guard = provider.lock().await;
    assert!(provider
        .entity(&mut guard, &LookupCriteria::entity_id("https://keep.example.org"))
        .await
        .unwrap()
        .is_some());
    assert!(provider
        .entity(&mut guard, &LookupCriteria::entity_id("https://drop.example.org"))
        .await
        .unwrap()
        .is_none());
    drop(guard);

    std::fs::remove_file(path).ok();
    config.term();
}
