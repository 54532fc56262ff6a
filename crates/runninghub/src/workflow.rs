//! Node parameter builders for the two RunningHub workflows.
//!
//! A workflow is driven by overriding individual node fields. The node
//! ids below belong to the published whole-image and patch workflows.

use serde::{Deserialize, Serialize};

/// Image input node of the whole-image workflow.
pub const WHOLE_IMAGE_NODE: &str = "200";
/// Prompt node of the patch workflow.
pub const PATCH_PROMPT_NODE: &str = "18";
/// Image input node of the patch workflow.
pub const PATCH_IMAGE_NODE: &str = "19";

const FIELD_IMAGE: &str = "image";
const FIELD_PROMPT: &str = "prompt";

/// Workflow ids to create tasks on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workflows {
    /// Used for whole-image jobs.
    pub whole_image: String,
    /// Used for every patch of a batch job.
    pub batch: String,
}

/// One field override in a `nodeInfoList`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub node_id: String,
    pub field_name: String,
    pub field_value: String,
}

impl NodeInfo {
    pub fn new(
        node_id: impl Into<String>,
        field_name: impl Into<String>,
        field_value: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            field_name: field_name.into(),
            field_value: field_value.into(),
        }
    }
}

/// Parameters for a whole-image task referencing an uploaded file.
pub fn whole_image_nodes(file_name: &str) -> Vec<NodeInfo> {
    vec![NodeInfo::new(WHOLE_IMAGE_NODE, FIELD_IMAGE, file_name)]
}

/// Parameters for one patch task: the edit prompt plus the uploaded crop.
pub fn patch_nodes(file_name: &str, prompt: &str) -> Vec<NodeInfo> {
    vec![
        NodeInfo::new(PATCH_PROMPT_NODE, FIELD_PROMPT, prompt),
        NodeInfo::new(PATCH_IMAGE_NODE, FIELD_IMAGE, file_name),
    ]
}
