//! SAML wire constants
//!
//! Protocol, namespace, binding and status URIs emitted and recognized
//! bit-exact, plus the XML-DSig/XML-Enc algorithm identifiers the core
//! works with.

// ---------- Namespaces ----------

pub const SOAP11ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const PAOS_NS: &str = "urn:liberty:paos:2003-08";

pub const SAML1_NS: &str = "urn:oasis:names:tc:SAML:1.0:assertion";
pub const SAML1P_NS: &str = "urn:oasis:names:tc:SAML:1.0:protocol";

pub const SAML20_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const SAML20P_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const SAML20MD_NS: &str = "urn:oasis:names:tc:SAML:2.0:metadata";

pub const SAML20MDUI_NS: &str = "urn:oasis:names:tc:SAML:metadata:ui";
pub const SAML20MDATTR_NS: &str = "urn:oasis:names:tc:SAML:metadata:attribute";
pub const SAML20MDRPI_NS: &str = "urn:oasis:names:tc:SAML:metadata:rpi";
pub const SAML20ALG_NS: &str = "urn:oasis:names:tc:SAML:metadata:algsupport";
pub const SAML1MD_NS: &str = "urn:oasis:names:tc:SAML:profiles:v1metadata";
pub const SAML20DEL_NS: &str = "urn:oasis:names:tc:SAML:2.0:conditions:delegation";

pub const XMLSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const XMLENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";

// ---------- Protocol support enumeration tokens ----------

pub const SAML10_PROTOCOL_ENUM: &str = "urn:oasis:names:tc:SAML:1.0:protocol";
pub const SAML11_PROTOCOL_ENUM: &str = "urn:oasis:names:tc:SAML:1.1:protocol";
pub const SAML20P_PROTOCOL_ENUM: &str = "urn:oasis:names:tc:SAML:2.0:protocol";

// ---------- SAML 1.x bindings and profiles ----------

pub const SAML1_BINDING_SOAP: &str = "urn:oasis:names:tc:SAML:1.0:bindings:SOAP-binding";
pub const SAML1_PROFILE_BROWSER_POST: &str = "urn:oasis:names:tc:SAML:1.0:profiles:browser-post";
pub const SAML1_PROFILE_BROWSER_ARTIFACT: &str =
    "urn:oasis:names:tc:SAML:1.0:profiles:artifact-01";

// ---------- SAML 2.0 bindings ----------

pub const SAML20_BINDING_SOAP: &str = "urn:oasis:names:tc:SAML:2.0:bindings:SOAP";
pub const SAML20_BINDING_PAOS: &str = "urn:oasis:names:tc:SAML:2.0:bindings:PAOS";
pub const SAML20_BINDING_HTTP_REDIRECT: &str =
    "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
pub const SAML20_BINDING_HTTP_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
pub const SAML20_BINDING_HTTP_POST_SIMPLESIGN: &str =
    "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST-SimpleSign";
pub const SAML20_BINDING_HTTP_ARTIFACT: &str =
    "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Artifact";
pub const SAML20_BINDING_URI: &str = "urn:oasis:names:tc:SAML:2.0:bindings:URI";

// ---------- SAML 2.0 profiles ----------

pub const SAML20_PROFILE_SSO_BROWSER: &str = "urn:oasis:names:tc:SAML:2.0:profiles:SSO:browser";
pub const SAML20_PROFILE_SSO_ECP: &str = "urn:oasis:names:tc:SAML:2.0:profiles:SSO:ecp";

// ---------- NameID formats ----------

pub const NAMEID_FORMAT_UNSPECIFIED: &str =
    "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";
pub const NAMEID_FORMAT_EMAIL: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";
pub const NAMEID_FORMAT_ENTITY: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:entity";
pub const NAMEID_FORMAT_PERSISTENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent";
pub const NAMEID_FORMAT_TRANSIENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:transient";

// ---------- Subject confirmation methods ----------

pub const CONFIRMATION_BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";
pub const CONFIRMATION_HOLDER_OF_KEY: &str = "urn:oasis:names:tc:SAML:2.0:cm:holder-of-key";
pub const CONFIRMATION_SENDER_VOUCHES: &str = "urn:oasis:names:tc:SAML:2.0:cm:sender-vouches";

pub const SAML1_CONFIRMATION_BEARER: &str = "urn:oasis:names:tc:SAML:1.0:cm:bearer";
pub const SAML1_CONFIRMATION_ARTIFACT: &str = "urn:oasis:names:tc:SAML:1.0:cm:artifact";
pub const SAML1_CONFIRMATION_ARTIFACT01: &str = "urn:oasis:names:tc:SAML:1.0:cm:artifact-01";

// ---------- SAML 2.0 status codes ----------

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
pub const STATUS_REQUESTER: &str = "urn:oasis:names:tc:SAML:2.0:status:Requester";
pub const STATUS_RESPONDER: &str = "urn:oasis:names:tc:SAML:2.0:status:Responder";
pub const STATUS_VERSION_MISMATCH: &str = "urn:oasis:names:tc:SAML:2.0:status:VersionMismatch";
pub const STATUS_AUTHN_FAILED: &str = "urn:oasis:names:tc:SAML:2.0:status:AuthnFailed";
pub const STATUS_INVALID_NAMEID_POLICY: &str =
    "urn:oasis:names:tc:SAML:2.0:status:InvalidNameIDPolicy";
pub const STATUS_NO_AUTHN_CONTEXT: &str = "urn:oasis:names:tc:SAML:2.0:status:NoAuthnContext";
pub const STATUS_NO_AVAILABLE_IDP: &str = "urn:oasis:names:tc:SAML:2.0:status:NoAvailableIDP";
pub const STATUS_NO_PASSIVE: &str = "urn:oasis:names:tc:SAML:2.0:status:NoPassive";
pub const STATUS_NO_SUPPORTED_IDP: &str = "urn:oasis:names:tc:SAML:2.0:status:NoSupportedIDP";
pub const STATUS_PARTIAL_LOGOUT: &str = "urn:oasis:names:tc:SAML:2.0:status:PartialLogout";
pub const STATUS_PROXY_COUNT_EXCEEDED: &str =
    "urn:oasis:names:tc:SAML:2.0:status:ProxyCountExceeded";
pub const STATUS_REQUEST_DENIED: &str = "urn:oasis:names:tc:SAML:2.0:status:RequestDenied";
pub const STATUS_REQUEST_UNSUPPORTED: &str =
    "urn:oasis:names:tc:SAML:2.0:status:RequestUnsupported";
pub const STATUS_REQUEST_VERSION_DEPRECATED: &str =
    "urn:oasis:names:tc:SAML:2.0:status:RequestVersionDeprecated";
pub const STATUS_REQUEST_VERSION_TOO_HIGH: &str =
    "urn:oasis:names:tc:SAML:2.0:status:RequestVersionTooHigh";
pub const STATUS_REQUEST_VERSION_TOO_LOW: &str =
    "urn:oasis:names:tc:SAML:2.0:status:RequestVersionTooLow";
pub const STATUS_RESOURCE_NOT_RECOGNIZED: &str =
    "urn:oasis:names:tc:SAML:2.0:status:ResourceNotRecognized";
pub const STATUS_TOO_MANY_RESPONSES: &str =
    "urn:oasis:names:tc:SAML:2.0:status:TooManyResponses";
pub const STATUS_UNKNOWN_ATTR_PROFILE: &str =
    "urn:oasis:names:tc:SAML:2.0:status:UnknownAttrProfile";
pub const STATUS_UNKNOWN_PRINCIPAL: &str =
    "urn:oasis:names:tc:SAML:2.0:status:UnknownPrincipal";
pub const STATUS_UNSUPPORTED_BINDING: &str =
    "urn:oasis:names:tc:SAML:2.0:status:UnsupportedBinding";

// ---------- XML-DSig algorithm and transform URIs ----------

pub const TRANSFORM_ENVELOPED_SIGNATURE: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const TRANSFORM_C14N_EXCL: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const TRANSFORM_C14N_EXCL_COMMENTS: &str =
    "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";
pub const TRANSFORM_C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const TRANSFORM_C14N_COMMENTS: &str =
    "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";

pub const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

pub const SIG_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const SIG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

// ---------- XML-Enc algorithm URIs ----------

pub const ENC_AES128_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";
pub const ENC_AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";
pub const ENC_3DES_CBC: &str = "http://www.w3.org/2001/04/xmlenc#tripledes-cbc";
pub const ENC_RSA_1_5: &str = "http://www.w3.org/2001/04/xmlenc#rsa-1_5";
pub const ENC_RSA_OAEP_MGF1P: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";

// ---------- Artifact type codes ----------

pub const ARTIFACT_TYPECODE_0001: [u8; 2] = [0x00, 0x01];
pub const ARTIFACT_TYPECODE_0002: [u8; 2] = [0x00, 0x02];
pub const ARTIFACT_TYPECODE_0004: [u8; 2] = [0x00, 0x04];
