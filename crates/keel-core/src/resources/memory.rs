// Memory resource - the address of a session-scoped conversation store.

use serde::{Deserialize, Serialize};

use super::{default_api_version, AddressableStatus};
use crate::client::Resource;
use crate::meta::ObjectMeta;
use crate::value::ValueSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "memory_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: MemorySpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AddressableStatus>,
}

fn memory_kind() -> String {
    "Memory".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySpec {
    pub address: ValueSource,
}

impl Resource for Memory {
    const KIND: &'static str = "Memory";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
