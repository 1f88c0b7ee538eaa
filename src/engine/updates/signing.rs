//! Code Signing
//!
//! RSA-SHA256 (PKCS#1 v1.5) signatures over the exact bytes of a body part,
//! carried as an RFC 8941 structured-field dictionary in `expo-signature`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sfv::{BareItem, Dictionary, FieldType, Item, Key, ListEntry};
use sha2::Sha256;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::engine::error::{Result, UpdatesError};

pub const SIGNATURE_HEADER: &str = "expo-signature";
pub const KEY_ID: &str = "main";

/// Holds the server's private key for the lifetime of the process.
#[derive(Clone)]
pub struct CodeSigner {
    key: SigningKey<Sha256>,
}

impl fmt::Debug for CodeSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeSigner").finish_non_exhaustive()
    }
}

impl CodeSigner {
    pub fn new(private_key: RsaPrivateKey) -> Self {
        Self {
            key: SigningKey::<Sha256>::new(private_key),
        }
    }

    /// Parse a PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`) PEM.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| UpdatesError::Signing(format!("invalid private key: {e}")))?;
        Ok(Self::new(key))
    }

    pub async fn from_pem_file(path: &Path) -> Result<Self> {
        let pem = tokio::fs::read_to_string(path).await?;
        Self::from_pem(&pem)
    }

    /// Base64 RSA-SHA256 signature of the UTF-8 bytes of `body`.
    pub fn sign(&self, body: &str) -> Result<String> {
        let signature = self
            .key
            .try_sign(body.as_bytes())
            .map_err(|e| UpdatesError::Signing(e.to_string()))?;
        Ok(STANDARD.encode(signature.to_bytes()))
    }

    /// `expo-signature` value for `body`: `sig="<base64>", keyid="main"`.
    pub fn signature_header(&self, body: &str) -> Result<String> {
        serialize_signature(&self.sign(body)?, KEY_ID)
    }
}

fn string_entry(value: &str) -> Result<ListEntry> {
    let value = sfv::String::try_from(value.to_string())
        .map_err(|e| UpdatesError::Signing(format!("invalid structured string: {e:?}")))?;
    Ok(ListEntry::Item(Item::new(BareItem::String(value))))
}

fn dictionary_key(name: &str) -> Result<Key> {
    Key::try_from(name.to_string())
        .map_err(|e| UpdatesError::Signing(format!("invalid structured key: {e:?}")))
}

/// Serialize `{sig, keyid}` as a parameter-less structured-field dictionary.
pub fn serialize_signature(sig: &str, keyid: &str) -> Result<String> {
    let mut dictionary = Dictionary::new();
    dictionary.insert(dictionary_key("sig")?, string_entry(sig)?);
    dictionary.insert(dictionary_key("keyid")?, string_entry(keyid)?);

    let serialized = dictionary.serialize().unwrap_or_default();
    if serialized.is_empty() {
        return Err(UpdatesError::Signing(
            "empty signature dictionary".to_string(),
        ));
    }
    Ok(serialized)
}

/// Signature header for a body part, when the client asked for one.
///
/// Signing runs on the blocking pool; the returned header covers exactly `body`.
pub async fn sign_if_requested(
    signer: Option<&Arc<CodeSigner>>,
    expect_signature: bool,
    body: &str,
) -> Result<Option<String>> {
    if !expect_signature {
        return Ok(None);
    }
    let signer = Arc::clone(signer.ok_or(UpdatesError::SigningKeyMissing)?);
    let body = body.to_string();
    let header = tokio::task::spawn_blocking(move || signer.signature_header(&body))
        .await
        .map_err(|e| UpdatesError::Signing(e.to_string()))??;
    Ok(Some(header))
}
