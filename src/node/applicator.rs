use super::state::ChangeResult;
use crate::change::{Change, ChangeScope, SettingOperation};
use log::info;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Verdict of [`ChangeApplicator::try_apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum PotentialApplicationResult {
    /// The change is acceptable; carries the result data it would produce.
    Allow(ChangeResult),
    /// The change is refused; the reason is reported to the client verbatim.
    Reject(String),
}

impl PotentialApplicationResult {
    pub fn allow(result: ChangeResult) -> Self {
        PotentialApplicationResult::Allow(result)
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        PotentialApplicationResult::Reject(reason.into())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApplicatorError {
    #[error("change application failed: {0}")]
    Failed(String),
}

/// Domain hook a node delegates change semantics to.
pub trait ChangeApplicator: Send + Sync {
    /// Validates `change` against the result of the latest committed change.
    fn try_apply(
        &self,
        previous: Option<&ChangeResult>,
        change: &Change,
    ) -> PotentialApplicationResult;

    /// Makes a prepared change effective; invoked on commit.
    fn apply(&self, change: &Change) -> Result<(), ApplicatorError>;
}

/// Applicator maintaining a flat settings document as its result data.
///
/// The result is `{"cluster_name": <name or null>, "settings": {<key>: <value>}}`
/// where keys are `cluster.<name>`, `stripe.<stripe>.<name>` or `node.<node>.<name>`.
#[derive(Debug, Default)]
pub struct SettingsApplicator {
    applied: Mutex<Vec<Change>>,
}

impl SettingsApplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes passed to `apply`, oldest first.
    pub fn applied(&self) -> Vec<Change> {
        self.applied.lock().clone()
    }

    fn evaluate(document: &mut SettingsDocument, change: &Change) -> Result<(), String> {
        match change {
            Change::Setting(setting) => {
                let key = setting_key(&setting.scope, &setting.name);
                match setting.operation {
                    SettingOperation::Set => {
                        let value = setting.value.as_ref().ok_or_else(|| {
                            format!("setting {} requires a value", setting.name)
                        })?;
                        document.settings.insert(key, Value::String(value.clone()));
                    }
                    SettingOperation::Unset => {
                        if document.settings.remove(&key).is_none() {
                            return Err(format!(
                                "setting {} is not set on {}",
                                setting.name, setting.scope
                            ));
                        }
                    }
                }
                Ok(())
            }
            Change::ClusterActivation(activation) => {
                if let Some(existing) = &document.cluster_name {
                    return Err(format!("cluster already activated as {existing}"));
                }
                document.cluster_name = Some(activation.cluster_name.clone());
                Ok(())
            }
            Change::Composite(composite) => composite
                .changes
                .iter()
                .try_for_each(|nested| Self::evaluate(document, nested)),
        }
    }
}

impl ChangeApplicator for SettingsApplicator {
    fn try_apply(
        &self,
        previous: Option<&ChangeResult>,
        change: &Change,
    ) -> PotentialApplicationResult {
        let mut document = SettingsDocument::from_result(previous);
        match Self::evaluate(&mut document, change) {
            Ok(()) => PotentialApplicationResult::Allow(document.into_result()),
            Err(reason) => PotentialApplicationResult::Reject(reason),
        }
    }

    fn apply(&self, change: &Change) -> Result<(), ApplicatorError> {
        info!(
            "event=settings_apply kind={} summary={}",
            change.tag(),
            change.summary()
        );
        self.applied.lock().push(change.clone());
        Ok(())
    }
}

fn setting_key(scope: &ChangeScope, name: &str) -> String {
    match scope {
        ChangeScope::Cluster => format!("cluster.{name}"),
        ChangeScope::Stripe(stripe) => format!("stripe.{stripe}.{name}"),
        ChangeScope::Node(node) => format!("node.{node}.{name}"),
    }
}

struct SettingsDocument {
    cluster_name: Option<String>,
    settings: Map<String, Value>,
}

impl SettingsDocument {
    fn from_result(result: Option<&ChangeResult>) -> Self {
        let cluster_name = result
            .and_then(|value| value.get("cluster_name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let settings = result
            .and_then(|value| value.get("settings"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Self {
            cluster_name,
            settings,
        }
    }

    fn into_result(self) -> ChangeResult {
        json!({
            "cluster_name": self.cluster_name,
            "settings": Value::Object(self.settings),
        })
    }
}
