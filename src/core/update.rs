//! Update payloads produced by the build pipeline.
//!
//! Delta blobs are opaque: they are carried as bytes and base64-encoded
//! only at the wire boundary (see `client::protocol`).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Compiled code delta for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedCodeUpdate {
    pub module_id: Uuid,
    #[serde(with = "blob")]
    pub metadata_delta: Vec<u8>,
    #[serde(with = "blob")]
    pub il_delta: Vec<u8>,
    #[serde(with = "blob")]
    pub pdb_delta: Vec<u8>,
    #[serde(default)]
    pub updated_types: Vec<i32>,
    /// Capabilities the runtime must support to apply this delta.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
}

impl ManagedCodeUpdate {
    /// Capabilities this update needs that are not in `available`.
    pub fn missing_capabilities<'a>(&'a self, available: &[String]) -> Vec<&'a str> {
        self.required_capabilities
            .iter()
            .filter(|required| !available.contains(required))
            .map(String::as_str)
            .collect()
    }
}

/// Content-only asset change (css, images, scoped styles).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticAssetUpdate {
    pub asset_path: String,
    #[serde(with = "blob")]
    pub content: Vec<u8>,
    #[serde(default)]
    pub assembly_name: String,
    #[serde(default)]
    pub is_application_project: bool,
}

/// One unit of work handed over by the build pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateBatch {
    pub managed: Vec<ManagedCodeUpdate>,
    pub assets: Vec<StaticAssetUpdate>,
    /// The target process is stopped in the debugger and cannot respond.
    pub process_suspended: bool,
}

impl UpdateBatch {
    pub fn is_empty(&self) -> bool {
        self.managed.is_empty() && self.assets.is_empty()
    }
}

/// Base64 (de)serialization for opaque byte blobs.
pub(crate) mod blob {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
