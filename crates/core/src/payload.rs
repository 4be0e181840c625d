//! The correlation record carried through GitLab pipeline variables.
//!
//! The outbound leg encodes and signs a [`BridgePayload`] and exposes it,
//! together with a handful of convenience variables, to the pipeline. The
//! inbound leg only ever sees the variables again, so it goes through
//! [`SignedPayload`], which hands out the payload after the signature checks
//! out.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::BridgeError, signature::Signer};

pub const BRIDGE_PAYLOAD: &str = "BRIDGE_PAYLOAD";
pub const TRIGGER_SIGNATURE: &str = "TRIGGER_SIGNATURE";
pub const CONFIG_URL: &str = "CONFIG_URL";
pub const CLONE_URL: &str = "CLONE_URL";
pub const CLONE_REPO_SLUG: &str = "CLONE_REPO_SLUG";
pub const CLONE_REPO_NAME: &str = "CLONE_REPO_NAME";
pub const REPO_SLUG: &str = "REPO_SLUG";
pub const REPO_NAME: &str = "REPO_NAME";
pub const HEAD_SHA: &str = "HEAD_SHA";
pub const HEAD_REF: &str = "HEAD_REF";

/// Pipeline variables keyed by name.
pub type Variables = BTreeMap<String, String>;

/// Signed correlation record.
///
/// Field order is the wire order: the signature covers the exact encoded
/// bytes, so fields may only ever be appended. `head_ref`, `clone_repo_slug`
/// and `clone_repo_name` were added after the first deploy and default to an
/// empty string when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgePayload {
    pub installation_id: u64,
    pub repo_url: String,
    pub repo_slug: String,
    pub repo_name: String,
    pub head_sha: String,
    #[serde(default)]
    pub head_ref: String,
    pub config_url: String,
    pub clone_url: String,
    #[serde(default)]
    pub clone_repo_slug: String,
    #[serde(default)]
    pub clone_repo_name: String,
}

impl BridgePayload {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("bridge payload serializes to JSON")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BridgeError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| BridgeError::MalformedPayload(e.to_string()))?;
        let Some(object) = value.as_object() else {
            return Err(BridgeError::MalformedPayload("expected a JSON object".to_string()));
        };
        if object.get("installation_id").is_none_or(Value::is_null) {
            return Err(BridgeError::MissingInstallationId);
        }
        serde_json::from_value(value).map_err(|e| BridgeError::MalformedPayload(e.to_string()))
    }

    /// Encode, sign and lay out every variable a triggered pipeline receives.
    pub fn to_variables(&self, signer: &Signer) -> Variables {
        let encoded = self.encode();
        let signature = signer.sign(encoded.as_bytes());
        [
            (BRIDGE_PAYLOAD, encoded),
            (TRIGGER_SIGNATURE, signature),
            (CONFIG_URL, self.config_url.clone()),
            (CLONE_URL, self.clone_url.clone()),
            (REPO_SLUG, self.repo_slug.clone()),
            (CLONE_REPO_SLUG, self.clone_repo_slug.clone()),
            (REPO_NAME, self.repo_name.clone()),
            (CLONE_REPO_NAME, self.clone_repo_name.clone()),
            (HEAD_SHA, self.head_sha.clone()),
            (HEAD_REF, self.head_ref.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

/// Raw payload and signature as recovered from a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    payload: String,
    signature: String,
}

impl SignedPayload {
    pub fn new(payload: impl Into<String>, signature: impl Into<String>) -> Self {
        Self { payload: payload.into(), signature: signature.into() }
    }

    pub fn from_variables(variables: &Variables) -> Result<Self, BridgeError> {
        let payload =
            variables.get(BRIDGE_PAYLOAD).ok_or(BridgeError::MissingVariable(BRIDGE_PAYLOAD))?;
        let signature = variables
            .get(TRIGGER_SIGNATURE)
            .ok_or(BridgeError::MissingVariable(TRIGGER_SIGNATURE))?;
        Ok(Self::new(payload.as_str(), signature.as_str()))
    }

    /// Verify the signature, then decode. Nothing is decoded from an unverified pair.
    pub fn open(&self, signer: &Signer) -> Result<BridgePayload, BridgeError> {
        if !signer.verify(self.payload.as_bytes(), &self.signature) {
            return Err(BridgeError::SignatureMismatch);
        }
        BridgePayload::decode(self.payload.as_bytes())
    }
}

/// Identifier safe for use in paths and variable values, derived from `owner/repo`.
pub fn make_repo_slug(full_name: &str) -> String { full_name.replace('/', "_") }
