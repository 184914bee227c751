// Evaluator resource - an external scoring service, optionally auto-applied
// to queries matched by its selector.

use serde::{Deserialize, Serialize};

use super::{default_api_version, AddressableStatus};
use crate::client::Resource;
use crate::meta::{LabelSelector, ObjectMeta};
use crate::value::{Parameter, ValueSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluator {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "evaluator_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: EvaluatorSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AddressableStatus>,
}

fn evaluator_kind() -> String {
    "Evaluator".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorSpec {
    pub address: ValueSource,

    /// Evaluator-level defaults; evaluation-level parameters win on conflict
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,

    /// Queries matching this selector are auto-evaluated once done
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

impl Resource for Evaluator {
    const KIND: &'static str = "Evaluator";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
