use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::resource::{ProviderSetup, Reconciled, ANNOTATION_PRIVATE_RAW};
use crate::state::models::{InstanceObjectStateV4, ResourceStateV4, StateV4};

/// File name of the configuration artifact inside a workspace.
pub const MAIN_TF_FILE: &str = "main.tf.json";

/// Local name the provider is registered under in the generated config.
const PROVIDER_LOCAL_NAME: &str = "tf-provider";

/// Projects a reconciled resource and provider setup into the two artifacts
/// a workspace needs on disk. Caches the parameter and observation maps,
/// which are costly to produce. Writing is the store's job; this type has no
/// side effects.
pub struct FileProducer<'a> {
    resource: &'a dyn Reconciled,
    setup: &'a ProviderSetup,
    parameters: Map<String, Value>,
    observation: Map<String, Value>,
}

impl<'a> FileProducer<'a> {
    pub fn new(resource: &'a dyn Reconciled, setup: &'a ProviderSetup) -> Result<Self> {
        let parameters = resource.parameters()?;
        let observation = resource.observation()?;
        Ok(Self {
            resource,
            setup,
            parameters,
            observation,
        })
    }

    /// The state file that must exist on disk before any provisioner
    /// invocation.
    ///
    /// Observation wins over parameters on key collision: at steady state
    /// the observed values are the ground truth and stale desired fields
    /// must not clobber them, while on first creation the observation is
    /// empty and the declared values stand.
    pub fn tf_state(&self) -> Result<StateV4> {
        let mut attrs = self.parameters.clone();
        for (k, v) in &self.observation {
            attrs.insert(k.clone(), v.clone());
        }
        attrs.insert(
            "id".to_string(),
            Value::String(self.resource.external_name()),
        );
        let attributes = serde_json::to_value(attrs).map_err(|e| Error::Serialization {
            what: "state attributes",
            source: e,
        })?;
        let private = self
            .resource
            .annotations()
            .get(ANNOTATION_PRIVATE_RAW)
            .cloned();

        let mut st = StateV4::new();
        st.terraform_version = self.setup.version.clone();
        st.lineage = self.resource.key().to_string();
        st.resources = vec![ResourceStateV4 {
            mode: "managed".to_string(),
            resource_type: self.resource.resource_type().to_string(),
            name: self.resource.name().to_string(),
            provider: format!(
                r#"provider["registry.terraform.io/{}"]"#,
                self.setup.source
            ),
            instances: vec![InstanceObjectStateV4 {
                schema_version: 0,
                private,
                attributes,
            }],
        }];
        Ok(st)
    }

    /// The `main.tf.json` content carrying the desired state. Deletion
    /// protection is dropped once the control plane marks the resource for
    /// deletion, so the subsequent destroy is not refused.
    pub fn main_tf(&self) -> Value {
        let mut parameters = self.parameters.clone();
        parameters.insert(
            "prevent_destroy".to_string(),
            Value::Bool(!self.resource.marked_for_deletion()),
        );

        let mut instances = Map::new();
        instances.insert(self.resource.name().to_string(), Value::Object(parameters));
        let mut resources = Map::new();
        resources.insert(
            self.resource.resource_type().to_string(),
            Value::Object(instances),
        );

        json!({
            "terraform": {
                "required_providers": {
                    PROVIDER_LOCAL_NAME: {
                        "source": self.setup.source,
                        "version": self.setup.version,
                    }
                }
            },
            "provider": {
                PROVIDER_LOCAL_NAME: self.setup.configuration,
            },
            "resource": resources,
        })
    }
}
