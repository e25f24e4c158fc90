//! Message "blob" signing input reconstruction
//!
//! For the redirect and POST SimpleSign bindings the signature covers a raw
//! byte string rather than canonicalized XML. The GET form must be rebuilt
//! from the raw query string because URL-encoding is not canonical; the POST
//! form concatenates decoded form controls with the message base64-decoded.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Append `name=value` taken verbatim from the raw query string, preserving
/// its original URL-encoding.
fn append_raw_parameter(out: &mut String, query: &str, name: &str) -> bool {
    let Some(start) = query.find(name) else {
        return false;
    };
    if !out.is_empty() {
        out.push('&');
    }
    let rest = &query[start..];
    match rest.find('&') {
        Some(end) => out.push_str(&rest[..end]),
        None => out.push_str(rest),
    }
    true
}

/// Signed blob for the redirect binding: `SAMLRequest=` or `SAMLResponse=`,
/// then `RelayState=` if present, then `SigAlg=`, each as a raw substring of
/// the query.
pub fn redirect_blob(raw_query: &str) -> String {
    let mut input = String::new();
    if !append_raw_parameter(&mut input, raw_query, "SAMLRequest=") {
        append_raw_parameter(&mut input, raw_query, "SAMLResponse=");
    }
    append_raw_parameter(&mut input, raw_query, "RelayState=");
    append_raw_parameter(&mut input, raw_query, "SigAlg=");
    input
}

/// Signed blob for POST SimpleSign: the message parameter base64-decoded to
/// raw XML bytes, then decoded RelayState and SigAlg appended.
pub fn post_blob(
    saml_request: Option<&str>,
    saml_response: Option<&str>,
    relay_state: Option<&str>,
    sig_alg: &str,
) -> Option<Vec<u8>> {
    let mut input = Vec::new();
    if let Some(request) = saml_request {
        let decoded = BASE64.decode(request.as_bytes()).ok()?;
        input.extend_from_slice(b"SAMLRequest=");
        input.extend_from_slice(&decoded);
    } else {
        let response = saml_response?;
        let decoded = BASE64.decode(response.as_bytes()).ok()?;
        input.extend_from_slice(b"SAMLResponse=");
        input.extend_from_slice(&decoded);
    }

    if let Some(relay_state) = relay_state {
        input.extend_from_slice(b"&RelayState=");
        input.extend_from_slice(relay_state.as_bytes());
    }
    input.extend_from_slice(b"&SigAlg=");
    input.extend_from_slice(sig_alg.as_bytes());
    Some(input)
}
