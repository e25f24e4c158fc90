//! Hybrid XML encryption for assertions and identifiers
//!
//! Single-recipient mode lets each EncryptedData carry its own EncryptedKey;
//! multi-recipient mode generates one data-encryption key, links every
//! recipient's EncryptedKey to the data through a carried key name, and
//! skips unresolvable recipients with a warning instead of failing the
//! whole operation.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use tracing::{debug, warn};

use crate::config::SamlConfig;
use crate::error::SamlError;
use crate::model::consts;
use crate::model::saml::SamlMessage;
use crate::model::xmlsec::{
    default_data_encryption_algorithm, EncryptedData, EncryptedElement, EncryptedKey, KeyInfo,
};
use crate::security::{Credential, KeyPair};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

fn data_algorithm_supported(algorithm: &str) -> bool {
    matches!(algorithm, consts::ENC_AES256_CBC | consts::ENC_AES128_CBC)
}

fn key_algorithm_supported(algorithm: &str) -> bool {
    matches!(algorithm, consts::ENC_RSA_OAEP_MGF1P | consts::ENC_RSA_1_5)
}

/// Key transport algorithm derived from a credential when its metadata
/// doesn't state one. RSA keys default to OAEP.
fn derive_key_algorithm(credential: &Credential) -> Option<&'static str> {
    credential
        .public_key
        .as_ref()
        .map(|_| consts::ENC_RSA_OAEP_MGF1P)
}

/// Select a key-encryption credential, honoring the EncryptionMethod
/// preferences carried with each candidate. Returns the credential plus the
/// chosen key transport and (for single-recipient mode) data algorithm.
fn select_kek<'c>(
    credentials: &'c [Credential],
) -> Option<(&'c Credential, String, Option<String>)> {
    for credential in credentials {
        let mut data_alg = None;
        let mut key_alg = None;
        for algorithm in &credential.algorithms {
            if data_alg.is_none() && data_algorithm_supported(algorithm) {
                data_alg = Some(algorithm.clone());
            } else if key_alg.is_none() && key_algorithm_supported(algorithm) {
                key_alg = Some(algorithm.clone());
            }
        }
        if data_alg.is_none() && key_alg.is_none() && !credential.algorithms.is_empty() {
            // Methods were specified but none are supported; keep looking.
            continue;
        }
        let key_alg =
            match key_alg.or_else(|| derive_key_algorithm(credential).map(str::to_string)) {
                Some(alg) => alg,
                None => continue,
            };
        return Some((credential, key_alg, data_alg));
    }
    None
}

fn symmetric_key_len(algorithm: &str) -> Result<usize, SamlError> {
    match algorithm {
        consts::ENC_AES256_CBC => Ok(32),
        consts::ENC_AES128_CBC => Ok(16),
        other => Err(SamlError::SecurityPolicy(format!(
            "unsupported data encryption algorithm ({})",
            other
        ))),
    }
}

/// CBC-encrypt with a random IV; ciphertext is IV-prefixed per XML-Enc.
fn encrypt_data(algorithm: &str, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, SamlError> {
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);
    let bad_key = |_| SamlError::SecurityPolicy("invalid data encryption key length".to_string());
    let ct = match algorithm {
        consts::ENC_AES256_CBC => Aes256CbcEnc::new_from_slices(key, &iv)
            .map_err(bad_key)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        consts::ENC_AES128_CBC => Aes128CbcEnc::new_from_slices(key, &iv)
            .map_err(bad_key)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        other => {
            return Err(SamlError::SecurityPolicy(format!(
                "unsupported data encryption algorithm ({})",
                other
            )))
        }
    };
    let mut out = iv.to_vec();
    out.extend_from_slice(&ct);
    Ok(out)
}

fn decrypt_data(algorithm: &str, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, SamlError> {
    if ciphertext.len() < 16 {
        return Err(SamlError::SecurityPolicy(
            "ciphertext shorter than IV".to_string(),
        ));
    }
    let (iv, ct) = ciphertext.split_at(16);
    let bad_key = |_| SamlError::SecurityPolicy("invalid data encryption key length".to_string());
    match algorithm {
        consts::ENC_AES256_CBC => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(ct)
            .map_err(|_| SamlError::SecurityPolicy("data decryption failed".to_string())),
        consts::ENC_AES128_CBC => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(ct)
            .map_err(|_| SamlError::SecurityPolicy("data decryption failed".to_string())),
        other => Err(SamlError::SecurityPolicy(format!(
            "unsupported data encryption algorithm ({})",
            other
        ))),
    }
}

fn wrap_key(
    credential: &Credential,
    algorithm: &str,
    key: &[u8],
) -> Result<Vec<u8>, SamlError> {
    let public_key = credential.public_key.as_ref().ok_or_else(|| {
        SamlError::SecurityPolicy("encryption credential has no public key".to_string())
    })?;
    let mut rng = rand::thread_rng();
    match algorithm {
        consts::ENC_RSA_OAEP_MGF1P => public_key
            .encrypt(&mut rng, rsa::Oaep::new::<sha1::Sha1>(), key)
            .map_err(|e| SamlError::SecurityPolicy(format!("key wrap failed: {}", e))),
        consts::ENC_RSA_1_5 => public_key
            .encrypt(&mut rng, rsa::Pkcs1v15Encrypt, key)
            .map_err(|e| SamlError::SecurityPolicy(format!("key wrap failed: {}", e))),
        other => Err(SamlError::SecurityPolicy(format!(
            "unsupported key transport algorithm ({})",
            other
        ))),
    }
}

fn unwrap_key(key_pair: &KeyPair, algorithm: &str, wrapped: &[u8]) -> Result<Vec<u8>, SamlError> {
    match algorithm {
        consts::ENC_RSA_OAEP_MGF1P => key_pair
            .private_key
            .decrypt(rsa::Oaep::new::<sha1::Sha1>(), wrapped)
            .map_err(|_| SamlError::SecurityPolicy("key unwrap failed".to_string())),
        consts::ENC_RSA_1_5 => key_pair
            .private_key
            .decrypt(rsa::Pkcs1v15Encrypt, wrapped)
            .map_err(|_| SamlError::SecurityPolicy("key unwrap failed".to_string())),
        other => Err(SamlError::SecurityPolicy(format!(
            "unsupported key transport algorithm ({})",
            other
        ))),
    }
}

/// Encrypt serialized element content for a single recipient. The data
/// encryption key is generated here and wrapped under the recipient's key
/// in a single inline EncryptedKey.
pub fn encrypt_single(
    content: &[u8],
    credentials: &[Credential],
    algorithm: Option<&str>,
) -> Result<EncryptedElement, SamlError> {
    if credentials.is_empty() {
        return Err(SamlError::SecurityPolicy(
            "no peer encryption credential found".to_string(),
        ));
    }

    let (kek, key_alg, preferred_data_alg) = select_kek(credentials)
        .ok_or_else(|| {
            SamlError::SecurityPolicy("no supported peer encryption credential found".to_string())
        })?;

    // Passed-in algorithm takes precedence over metadata preferences.
    let data_alg = algorithm
        .map(str::to_string)
        .or(preferred_data_alg)
        .unwrap_or_else(|| default_data_encryption_algorithm().to_string());

    let mut dek = vec![0u8; symmetric_key_len(&data_alg)?];
    rand::thread_rng().fill_bytes(&mut dek);

    let encrypted_key = EncryptedKey {
        algorithm: key_alg.clone(),
        recipient: kek.entity_id.clone(),
        ciphertext: wrap_key(kek, &key_alg, &dek)?,
        ..Default::default()
    };

    Ok(EncryptedElement {
        encrypted_data: Some(EncryptedData {
            id: None,
            algorithm: data_alg.clone(),
            key_info: None,
            ciphertext: encrypt_data(&data_alg, &dek, content)?,
        }),
        encrypted_keys: vec![encrypted_key],
    })
}

/// A multi-recipient target: resolved encryption credentials for one peer.
pub struct Recipient {
    pub entity_id: String,
    pub credentials: Vec<Credential>,
}

/// Encrypt serialized element content for several recipients, multicasting
/// one generated data-encryption key. Recipients without a usable credential
/// are skipped with a warning.
pub fn encrypt_multi(
    content: &[u8],
    recipients: &[Recipient],
    algorithm: Option<&str>,
) -> Result<EncryptedElement, SamlError> {
    let data_alg = algorithm
        .map(str::to_string)
        .unwrap_or_else(|| default_data_encryption_algorithm().to_string());

    // Generate a random key and encrypt the data once.
    let mut dek = vec![0u8; symmetric_key_len(&data_alg)?];
    rand::thread_rng().fill_bytes(&mut dek);

    let data_id = SamlConfig::generate_identifier();
    let carried_name = SamlConfig::generate_identifier();

    let mut element = EncryptedElement {
        encrypted_data: Some(EncryptedData {
            id: Some(data_id.clone()),
            algorithm: data_alg.clone(),
            key_info: Some(KeyInfo::with_key_name(carried_name.clone())),
            ciphertext: encrypt_data(&data_alg, &dek, content)?,
        }),
        encrypted_keys: Vec::new(),
    };

    for recipient in recipients {
        let Some((kek, key_alg, _)) = select_kek(&recipient.credentials) else {
            warn!(
                entity_id = %recipient.entity_id,
                "no supported key encryption credential found, skipping recipient"
            );
            continue;
        };

        let wrapped = match wrap_key(kek, &key_alg, &dek) {
            Ok(wrapped) => wrapped,
            Err(e) => {
                warn!(entity_id = %recipient.entity_id, error = %e, "key wrap failed, skipping recipient");
                continue;
            }
        };

        let mut encrypted_key = EncryptedKey {
            algorithm: key_alg,
            recipient: Some(recipient.entity_id.clone()),
            ciphertext: wrapped,
            ..Default::default()
        };

        if let Some(first) = element.encrypted_keys.first() {
            // Copy the linkage details from the first key.
            encrypted_key.carried_key_name = first.carried_key_name.clone();
            encrypted_key.data_references = first.data_references.clone();
        } else {
            encrypted_key.carried_key_name = Some(carried_name.clone());
            encrypted_key.data_references = vec![format!("#{}", data_id)];
        }

        element.encrypted_keys.push(encrypted_key);
    }

    Ok(element)
}

/// Locate the EncryptedKeys applicable to an element's EncryptedData by
/// matching the data's KeyInfo/KeyName against each key's CarriedKeyName.
pub fn resolve_encrypted_keys<'e>(element: &'e EncryptedElement) -> Vec<&'e EncryptedKey> {
    let carried = element
        .encrypted_data
        .as_ref()
        .and_then(|d| d.key_info.as_ref())
        .and_then(|ki| ki.key_names.first());

    match carried {
        Some(name) => element
            .encrypted_keys
            .iter()
            .filter(|k| k.carried_key_name.as_deref() == Some(name))
            .collect(),
        None => element.encrypted_keys.iter().collect(),
    }
}

/// Decrypt an EncryptedElementType with a local key pair, returning the
/// plaintext element bytes. Fails unless exactly one element results.
pub fn decrypt(
    element: &EncryptedElement,
    key_pair: &KeyPair,
    recipient: Option<&str>,
) -> Result<Vec<u8>, SamlError> {
    let data = element
        .encrypted_data
        .as_ref()
        .ok_or_else(|| SamlError::SecurityPolicy("no encrypted data present".to_string()))?;

    let mut candidates = resolve_encrypted_keys(element);
    if let Some(recipient) = recipient {
        let scoped: Vec<_> = candidates
            .iter()
            .copied()
            .filter(|k| k.recipient.as_deref() == Some(recipient))
            .collect();
        if !scoped.is_empty() {
            candidates = scoped;
        }
    }

    for key in candidates {
        let Ok(dek) = unwrap_key(key_pair, &key.algorithm, &key.ciphertext) else {
            continue;
        };
        match decrypt_data(&data.algorithm, &dek, &data.ciphertext) {
            Ok(plaintext) => {
                debug!("decrypted element content with unwrapped key");
                return Ok(plaintext);
            }
            Err(_) => continue,
        }
    }

    Err(SamlError::SecurityPolicy(
        "unable to decrypt data with any available key".to_string(),
    ))
}

/// Decrypt and unmarshal into a SAML message. The decrypted fragment must be
/// a single element.
pub fn decrypt_to_message(
    element: &EncryptedElement,
    key_pair: &KeyPair,
    recipient: Option<&str>,
) -> Result<SamlMessage, SamlError> {
    let plaintext = decrypt(element, key_pair, recipient)?;
    let node = crate::xml::parse_document(&plaintext)
        .map_err(|_| SamlError::SecurityPolicy("decryption did not result in a single element".to_string()))?;
    crate::xml::message::read_message_node(&node)
}

/// Base64 form of encrypted content, for logging and diagnostics.
pub fn ciphertext_b64(data: &EncryptedData) -> String {
    BASE64.encode(&data.ciphertext)
}
