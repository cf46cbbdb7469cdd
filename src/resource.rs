use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Annotation carrying terraform's opaque per-instance bookkeeping bytes,
/// round-tripped between the state file and the control-plane object.
pub const ANNOTATION_PRIVATE_RAW: &str = "tfbridge.dev/private-raw";

/// Annotation holding the last state snapshot recorded on the control-plane
/// object. Only its emptiness matters here: an empty value together with an
/// empty external name means the resource was never provisioned.
pub const ANNOTATION_STATE: &str = "tfbridge.dev/state";

/// Provider requirement and configuration shared by every workspace of a
/// store. `configuration` carries credentials, region and the like; it ends
/// up in the `provider` block of `main.tf.json`, never in the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSetup {
    pub version: String,
    pub source: String,
    pub configuration: Map<String, Value>,
}

/// The control plane's view of one managed resource: a user-authored
/// declaration plus accumulated status.
///
/// Implementations are typically generated per resource type; see
/// [`DeclaredResource`] for a plain-data alternative.
pub trait Reconciled: Send + Sync {
    /// Stable unique identity; used as the workspace directory name and the
    /// registry key. Must not change for the resource's lifetime.
    fn key(&self) -> &str;

    fn name(&self) -> &str;

    /// The terraform resource type, e.g. `aws_s3_bucket`.
    fn resource_type(&self) -> &str;

    /// Desired state as declared by the user.
    fn parameters(&self) -> Result<Map<String, Value>>;

    /// Last observed state recorded on the object's status.
    fn observation(&self) -> Result<Map<String, Value>>;

    /// The provider-assigned identifier, empty until creation succeeds.
    fn external_name(&self) -> String;

    fn annotations(&self) -> &HashMap<String, String>;

    /// Whether the control plane has begun deleting this resource.
    fn marked_for_deletion(&self) -> bool;

    /// Attribute names whose refreshed values are published as connection
    /// details.
    fn sensitive_attributes(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called when observation confirms the resource exists. Terraform waits
    /// for readiness during apply, so existence implies availability.
    fn mark_available(&mut self) {}
}

/// Whether the object records a prior provisioning state.
pub fn has_prior_state(tr: &dyn Reconciled) -> bool {
    tr.annotations()
        .get(ANNOTATION_STATE)
        .is_some_and(|s| !s.is_empty())
}

/// A plain-data [`Reconciled`] implementation for embedders that do not
/// generate typed resource structs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeclaredResource {
    pub key: String,
    pub name: String,
    pub resource_type: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub observation: Map<String, Value>,
    #[serde(default)]
    pub external_name: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub marked_for_deletion: bool,
    #[serde(default)]
    pub sensitive_attributes: Vec<String>,
    #[serde(default)]
    pub available: bool,
}

impl Reconciled for DeclaredResource {
    fn key(&self) -> &str {
        &self.key
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn parameters(&self) -> Result<Map<String, Value>> {
        Ok(self.parameters.clone())
    }

    fn observation(&self) -> Result<Map<String, Value>> {
        Ok(self.observation.clone())
    }

    fn external_name(&self) -> String {
        self.external_name.clone()
    }

    fn annotations(&self) -> &HashMap<String, String> {
        &self.annotations
    }

    fn marked_for_deletion(&self) -> bool {
        self.marked_for_deletion
    }

    fn sensitive_attributes(&self) -> Vec<String> {
        self.sensitive_attributes.clone()
    }

    fn mark_available(&mut self) {
        self.available = true;
    }
}
