//! Resolution of declarative runtime targets into concrete runtimes.
//!
//! The resolver joins shoot clusters (the infrastructure view) with runtime
//! lifecycle records (the provisioning view). Only runtimes whose latest
//! lifecycle operation is a succeeded provisioning or unsuspension are
//! eligible.

pub mod memory;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::maintenance::parse_window_time;
use crate::operation::Runtime;
use crate::orchestration::{RuntimeTarget, TargetSpec, TARGET_ALL};

/// Shoot annotation carrying the runtime ID.
pub const RUNTIME_ID_ANNOTATION: &str = "kcp.provisioner.kyma-project.io/runtime-id";
/// Shoot label carrying the global account ID.
pub const GLOBAL_ACCOUNT_LABEL: &str = "account";
/// Shoot label carrying the subaccount ID.
pub const SUB_ACCOUNT_LABEL: &str = "subaccount";

/// Daily maintenance window of a shoot, in `HHMMSS±HHMM`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootMaintenance {
    /// Window start.
    pub time_window_begin: String,
    /// Window end.
    pub time_window_end: String,
}

/// A Gardener shoot cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shoot {
    /// Shoot name.
    pub name: String,
    /// Metadata annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Metadata labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Infrastructure region.
    pub region: String,
    /// Maintenance window.
    #[serde(default)]
    pub maintenance: ShootMaintenance,
}

impl Shoot {
    /// Returns the runtime ID annotation, if present and non-empty.
    #[must_use]
    pub fn runtime_id(&self) -> Option<&str> {
        self.annotations
            .get(RUNTIME_ID_ANNOTATION)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    fn label(&self, key: &str) -> &str {
        self.labels.get(key).map_or("", String::as_str)
    }
}

/// Kind of a runtime lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleOperationType {
    /// Runtime provisioning.
    Provision,
    /// Runtime deprovisioning.
    Deprovision,
    /// Runtime suspension.
    Suspension,
    /// Runtime unsuspension.
    Unsuspension,
}

/// State of a runtime lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Still running.
    #[serde(rename = "in progress")]
    InProgress,
    /// Completed.
    #[serde(rename = "succeeded")]
    Succeeded,
    /// Failed.
    #[serde(rename = "failed")]
    Failed,
}

/// One lifecycle operation of a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleOperation {
    /// Operation kind.
    #[serde(rename = "type")]
    pub kind: LifecycleOperationType,
    /// Operation state.
    pub state: LifecycleState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Runtime lifecycle record as reported by the runtime service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeRecord {
    /// Runtime ID.
    #[serde(rename = "runtimeID")]
    pub runtime_id: String,
    /// Service instance ID.
    #[serde(rename = "instanceID")]
    pub instance_id: String,
    /// Service plan name.
    pub plan_name: String,
    /// Lifecycle history.
    #[serde(default)]
    pub operations: Vec<LifecycleOperation>,
}

impl RuntimeRecord {
    /// Returns true if the latest lifecycle operation is a succeeded
    /// provisioning or unsuspension.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.operations
            .iter()
            .max_by_key(|op| op.created_at)
            .is_some_and(|op| {
                matches!(
                    op.kind,
                    LifecycleOperationType::Provision | LifecycleOperationType::Unsuspension
                ) && op.state == LifecycleState::Succeeded
            })
    }
}

/// Lists shoot clusters.
#[async_trait]
pub trait ShootLister: Send + Sync {
    /// Lists every shoot.
    async fn list_shoots(&self) -> Result<Vec<Shoot>>;
}

/// Lists runtime lifecycle records.
#[async_trait]
pub trait RuntimeLister: Send + Sync {
    /// Lists every runtime record.
    async fn list_all_runtimes(&self) -> Result<Vec<RuntimeRecord>>;
}

/// Resolves a [`TargetSpec`] into the list of runtimes it selects.
#[async_trait]
pub trait RuntimeResolver: Send + Sync {
    /// Resolves the targets.
    ///
    /// The result is `union(include) \ union(exclude)`, deduplicated by runtime ID.
    async fn resolve(&self, targets: &TargetSpec) -> Result<Vec<Runtime>>;
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("runtime lifecycle cache lock poisoned")
}

/// Runtime lifecycle records keyed by runtime ID.
#[derive(Debug, Default)]
pub struct LifecycleCache {
    records: RwLock<HashMap<String, RuntimeRecord>>,
}

impl LifecycleCache {
    /// Replaces the cache content.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn refresh(&self, records: Vec<RuntimeRecord>) -> Result<()> {
        let fresh = records
            .into_iter()
            .map(|record| (record.runtime_id.clone(), record))
            .collect();
        *self.records.write().map_err(poison_err)? = fresh;
        Ok(())
    }

    /// Looks up a record by runtime ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn get(&self, runtime_id: &str) -> Result<Option<RuntimeRecord>> {
        Ok(self.records.read().map_err(poison_err)?.get(runtime_id).cloned())
    }
}

/// A target entry with its regexes compiled.
struct CompiledTarget<'a> {
    target: &'a RuntimeTarget,
    global_account: Option<Regex>,
    sub_account: Option<Regex>,
    region: Option<Regex>,
}

impl<'a> CompiledTarget<'a> {
    fn compile(target: &'a RuntimeTarget) -> Result<Self> {
        if let Some(sentinel) = target.target.as_deref() {
            if !sentinel.is_empty() && sentinel != TARGET_ALL {
                return Err(Error::InvalidTarget {
                    message: format!("unknown target '{sentinel}'"),
                });
            }
        }
        let compile = |pattern: Option<&str>| -> Result<Option<Regex>> {
            pattern
                .map(|pattern| {
                    Regex::new(pattern).map_err(|e| Error::InvalidTarget {
                        message: format!("invalid regular expression '{pattern}': {e}"),
                    })
                })
                .transpose()
        };

        Ok(Self {
            target,
            global_account: compile(target.global_account.as_deref())?,
            sub_account: compile(target.sub_account.as_deref())?,
            region: compile(target.region.as_deref())?,
        })
    }

    fn matches(&self, runtime: &Runtime) -> bool {
        let target = self.target;
        if let Some(runtime_id) = &target.runtime_id {
            return runtime_id == &runtime.runtime_id;
        }
        if let Some(instance_id) = &target.instance_id {
            return instance_id == &runtime.instance_id;
        }
        if let Some(shoot) = &target.shoot {
            return shoot == &runtime.shoot_name;
        }

        let regex_matches =
            |regex: &Option<Regex>, value: &str| regex.as_ref().map_or(true, |r| r.is_match(value));
        target
            .plan_name
            .as_ref()
            .map_or(true, |plan| plan == &runtime.plan_name)
            && regex_matches(&self.global_account, &runtime.global_account_id)
            && regex_matches(&self.sub_account, &runtime.sub_account_id)
            && regex_matches(&self.region, &runtime.region)
    }
}

/// [`RuntimeResolver`] backed by the Gardener shoot listing and the runtime service.
pub struct GardenerRuntimeResolver {
    shoots: Arc<dyn ShootLister>,
    runtimes: Arc<dyn RuntimeLister>,
    cache: LifecycleCache,
}

impl std::fmt::Debug for GardenerRuntimeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GardenerRuntimeResolver")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl GardenerRuntimeResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(
        shoots: Arc<dyn ShootLister>,
        runtimes: Arc<dyn RuntimeLister>,
    ) -> Self {
        Self {
            shoots,
            runtimes,
            cache: LifecycleCache::default(),
        }
    }

    /// Builds the eligible runtimes from the listed shoots and the refreshed cache.
    fn eligible_runtimes(&self, shoots: &[Shoot]) -> Result<Vec<Runtime>> {
        let mut runtimes = Vec::with_capacity(shoots.len());
        for shoot in shoots {
            let Some(runtime_id) = shoot.runtime_id() else {
                tracing::warn!(shoot = %shoot.name, "skipping shoot without runtime ID annotation");
                continue;
            };
            let Some(record) = self.cache.get(runtime_id)? else {
                tracing::warn!(shoot = %shoot.name, runtime_id, "skipping shoot without lifecycle record");
                continue;
            };
            if !record.is_active() {
                tracing::debug!(shoot = %shoot.name, runtime_id, "skipping inactive runtime");
                continue;
            }

            let window = parse_window_time(&shoot.maintenance.time_window_begin).and_then(|begin| {
                parse_window_time(&shoot.maintenance.time_window_end).map(|end| (begin, end))
            });
            let (begin, end) = match window {
                Ok(window) => window,
                Err(error) => {
                    tracing::warn!(shoot = %shoot.name, runtime_id, %error, "skipping shoot with unparsable maintenance window");
                    continue;
                }
            };

            runtimes.push(Runtime {
                instance_id: record.instance_id,
                runtime_id: runtime_id.to_string(),
                global_account_id: shoot.label(GLOBAL_ACCOUNT_LABEL).to_string(),
                sub_account_id: shoot.label(SUB_ACCOUNT_LABEL).to_string(),
                shoot_name: shoot.name.clone(),
                plan_name: record.plan_name,
                region: shoot.region.clone(),
                maintenance_window_begin: begin,
                maintenance_window_end: end,
                maintenance_days: Vec::new(),
            });
        }
        Ok(runtimes)
    }
}

#[async_trait]
impl RuntimeResolver for GardenerRuntimeResolver {
    #[tracing::instrument(skip_all, fields(include = targets.include.len(), exclude = targets.exclude.len()))]
    async fn resolve(&self, targets: &TargetSpec) -> Result<Vec<Runtime>> {
        let include = targets
            .include
            .iter()
            .map(CompiledTarget::compile)
            .collect::<Result<Vec<_>>>()?;
        let exclude = targets
            .exclude
            .iter()
            .map(CompiledTarget::compile)
            .collect::<Result<Vec<_>>>()?;

        let shoots = self.shoots.list_shoots().await?;
        let records = self.runtimes.list_all_runtimes().await?;
        self.cache.refresh(records)?;
        let candidates = self.eligible_runtimes(&shoots)?;

        let excluded: HashSet<&str> = candidates
            .iter()
            .filter(|runtime| exclude.iter().any(|target| target.matches(runtime)))
            .map(|runtime| runtime.runtime_id.as_str())
            .collect();

        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for target in &include {
            for runtime in &candidates {
                if excluded.contains(runtime.runtime_id.as_str())
                    || !target.matches(runtime)
                    || !seen.insert(runtime.runtime_id.clone())
                {
                    continue;
                }
                resolved.push(runtime.clone());
            }
        }

        tracing::debug!(resolved = resolved.len(), excluded = excluded.len(), "resolved runtime targets");
        Ok(resolved)
    }
}
