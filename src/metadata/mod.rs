//! Metadata resolution layer
//!
//! Providers look entity descriptors up (by entityID or artifact source),
//! refresh them from their backing sources, filter them on load, and expose
//! the credentials their roles advertise.

pub mod chaining;
pub mod discovery;
pub mod dynamic;
pub mod filters;
pub mod matchers;
pub mod null_provider;
pub mod provider;
pub mod store;
pub mod xml_provider;

pub use chaining::{ChainingProvider, ChainingProviderBuilder, FolderProvider, Precedence};
pub use discovery::DiscoverableMetadata;
pub use dynamic::{DynamicProvider, DynamicProviderConfig, EntityFetcher};
pub use filters::{FilterContext, MetadataFilter};
pub use matchers::EntityMatcher;
pub use null_provider::NullProvider;
pub use provider::{
    EntityLookup, LookupCriteria, LookupKey, MetadataObserver, MetadataProvider, ProviderGuard,
};
pub use store::MetadataStore;
pub use xml_provider::{XmlProvider, XmlProviderConfig};
