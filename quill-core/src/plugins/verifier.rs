//! Code signature verification for plugin binaries.
//!
//! A plugin is signed with a detached `<binary>.sig` file:
//!
//! ```toml
//! identity = "Example Plugins Ltd"
//! signature = "<base64url ECDSA P-256 signature over the binary>"
//! ```
//!
//! The identity must be listed in the trust store (`trusted_signers.toml`)
//! together with its public key. Verification only reads files; it never
//! loads the binary.

use std::path::{Path, PathBuf};

use base64ct::{Base64UrlUnpadded, Encoding};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::PluginHostError;

/// Checks that a binary is trustworthy before it is loaded
pub trait SignatureVerifier {
    /// Verify the binary at `path`, returning the signing identity
    fn verify(&self, path: &Path) -> Result<String, PluginHostError>;
}

/// Whether the host insists on valid signatures.
///
/// Turning verification off needs a reason so the opt-out is visible in
/// logs and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SignaturePolicy {
    #[default]
    Required,
    Disabled { reason: String },
}

impl SignaturePolicy {
    pub fn disabled(reason: impl Into<String>) -> Self {
        Self::Disabled {
            reason: reason.into(),
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, Self::Required)
    }
}

/// Contents of a `<binary>.sig` file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureFile {
    pub identity: String,
    pub signature: String,
}

/// Path of the detached signature for a binary
pub fn signature_path(binary: &Path) -> PathBuf {
    let mut name = binary.file_name().unwrap_or_default().to_os_string();
    name.push(".sig");
    binary.with_file_name(name)
}

/// A signer the host trusts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrustedSigner {
    pub identity: String,
    /// SEC1 public key point, base64url without padding
    pub public_key: String,
}

/// Trusted signers, stored as TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustStore {
    #[serde(default, rename = "signer")]
    pub signers: Vec<TrustedSigner>,
}

impl TrustStore {
    /// Load the store; a missing file is an empty store
    pub fn load(path: &Path) -> Result<Self, PluginHostError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| PluginHostError::Registry(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), PluginHostError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| PluginHostError::Registry(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Trust `key` for `identity`, replacing any previous key
    pub fn trust(&mut self, identity: &str, key: &VerifyingKey) {
        self.signers.retain(|s| s.identity != identity);
        self.signers.push(TrustedSigner {
            identity: identity.to_string(),
            public_key: encode_public_key(key),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    fn key_for(&self, identity: &str) -> Option<&TrustedSigner> {
        self.signers.iter().find(|s| s.identity == identity)
    }
}

/// Base64url SEC1 encoding used in the trust store
pub fn encode_public_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    Base64UrlUnpadded::encode_string(point.as_bytes())
}

/// Verifies detached `.sig` files against a [`TrustStore`]
pub struct DetachedSignatureVerifier {
    trust: TrustStore,
    expected_identity: Option<String>,
}

impl DetachedSignatureVerifier {
    pub fn new(trust: TrustStore) -> Self {
        Self {
            trust,
            expected_identity: None,
        }
    }

    /// Only accept binaries signed by this identity
    pub fn require_identity(mut self, identity: impl Into<String>) -> Self {
        self.expected_identity = Some(identity.into());
        self
    }
}

impl SignatureVerifier for DetachedSignatureVerifier {
    fn verify(&self, path: &Path) -> Result<String, PluginHostError> {
        let invalid = |reason: String| PluginHostError::SignatureInvalid {
            path: path.to_path_buf(),
            reason,
        };

        let sig_path = signature_path(path);
        if !sig_path.exists() {
            return Err(invalid(format!("no signature file {}", sig_path.display())));
        }
        let content = std::fs::read_to_string(&sig_path)
            .map_err(|e| invalid(format!("unreadable signature file: {e}")))?;
        let sig_file: SignatureFile = toml::from_str(&content)
            .map_err(|e| invalid(format!("malformed signature file: {e}")))?;

        if let Some(expected) = &self.expected_identity
            && &sig_file.identity != expected
        {
            return Err(invalid(format!(
                "signed by '{}', expected '{}'",
                sig_file.identity, expected
            )));
        }

        let signer = self
            .trust
            .key_for(&sig_file.identity)
            .ok_or_else(|| invalid(format!("signer '{}' is not trusted", sig_file.identity)))?;

        let key = Base64UrlUnpadded::decode_vec(&signer.public_key)
            .ok()
            .and_then(|bytes| VerifyingKey::from_sec1_bytes(&bytes).ok())
            .ok_or_else(|| {
                invalid(format!(
                    "trust store key for '{}' is invalid",
                    sig_file.identity
                ))
            })?;

        let signature = Base64UrlUnpadded::decode_vec(&sig_file.signature)
            .ok()
            .and_then(|bytes| Signature::from_slice(&bytes).ok())
            .ok_or_else(|| invalid("malformed signature".to_string()))?;

        let binary = std::fs::read(path)
            .map_err(|e| invalid(format!("could not read binary: {e}")))?;
        key.verify(&binary, &signature)
            .map_err(|_| invalid("signature does not match binary contents".to_string()))?;

        Ok(sig_file.identity)
    }
}

/// Sign a binary, writing `<binary>.sig` next to it
pub fn sign_binary(
    path: &Path,
    identity: &str,
    key: &SigningKey,
) -> Result<PathBuf, PluginHostError> {
    let binary = std::fs::read(path)?;
    let signature: Signature = key.sign(&binary);
    let sig_file = SignatureFile {
        identity: identity.to_string(),
        signature: Base64UrlUnpadded::encode_string(&signature.to_bytes()),
    };
    let content =
        toml::to_string_pretty(&sig_file).map_err(|e| PluginHostError::Registry(e.to_string()))?;

    let sig_path = signature_path(path);
    std::fs::write(&sig_path, content)?;
    tracing::debug!(path = %path.display(), identity, "Signed plugin binary");
    Ok(sig_path)
}

/// SHA-256 of a binary, hex encoded
pub fn fingerprint(path: &Path) -> Result<String, PluginHostError> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
