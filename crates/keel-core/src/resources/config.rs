// ConfigMap and Secret stubs read by the value resolver.
//
// Secrets hold plain strings here; the hosting cluster is responsible for
// at-rest encoding.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::client::Resource;
use crate::meta::ObjectMeta;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    #[serde(default = "config_api_version")]
    pub api_version: String,
    #[serde(default = "config_map_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    #[serde(default = "config_api_version")]
    pub api_version: String,
    #[serde(default = "secret_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

fn config_api_version() -> String {
    "v1".to_string()
}

fn config_map_kind() -> String {
    "ConfigMap".to_string()
}

fn secret_kind() -> String {
    "Secret".to_string()
}

impl Resource for ConfigMap {
    const KIND: &'static str = "ConfigMap";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for Secret {
    const KIND: &'static str = "Secret";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
