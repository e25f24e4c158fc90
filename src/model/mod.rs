//! SAML data model and wire constants

pub mod consts;
pub mod metadata;
pub mod saml;
pub mod xmlsec;
