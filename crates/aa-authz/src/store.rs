// store.rs — State collaborators for the authorization service.
//
// The service reads agents, policies, and consents through three traits so
// the same evaluation path runs against files on disk (FileStore) or an
// in-memory snapshot (MemoryStore, used by tests and `policy test`).
//
// Spend state on disk may be shared by several processes. FileStore hands
// out a per-agent lock file guard; the service holds it from re-reading the
// agent's counters through persisting the new ones.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use aa_audit::FileLock;
use aa_policy::{Agent, Consent, Policy, SpendLedger};

use crate::config::AuthzConfig;
use crate::error::StoreError;

/// Agent lookup plus spend persistence.
pub trait AgentStore: Send + Sync {
    fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, StoreError>;
    fn list_agents(&self) -> Result<Vec<Agent>, StoreError>;
    /// Persist an agent's spend counters after a commit.
    fn save_spend(&self, agent_id: &str, ledger: &SpendLedger) -> Result<(), StoreError>;

    /// Exclusive access to an agent's persisted spend across processes.
    /// `None` means the state is private to this process.
    fn lock_spend(&self, _agent_id: &str) -> Result<Option<FileLock>, StoreError> {
        Ok(None)
    }
}

pub trait PolicyStore: Send + Sync {
    fn list_policies(&self) -> Result<Vec<Policy>, StoreError>;

    /// The policies assigned to `agent`, in assignment order.
    fn policies_for(&self, agent: &Agent) -> Result<Vec<Policy>, StoreError> {
        let all = self.list_policies()?;
        Ok(agent
            .policy_ids
            .iter()
            .filter_map(|id| all.iter().find(|p| &p.id == id).cloned())
            .collect())
    }
}

pub trait ConsentStore: Send + Sync {
    fn get_consent(&self, consent_id: &str) -> Result<Option<Consent>, StoreError>;
    fn save_consent(&self, consent: &Consent) -> Result<(), StoreError>;
    /// All consents, newest first.
    fn list_consents(&self) -> Result<Vec<Consent>, StoreError>;
}

// ── In-memory store ─────────────────────────────────────────────

/// All state in memory. Cheap to clone from a FileStore snapshot.
#[derive(Debug, Default)]
pub struct MemoryStore {
    agents: RwLock<Vec<Agent>>,
    policies: RwLock<Vec<Policy>>,
    consents: RwLock<HashMap<String, Consent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(self, agent: Agent) -> Self {
        self.upsert_agent(agent);
        self
    }

    pub fn with_policy(self, policy: Policy) -> Self {
        self.upsert_policy(policy);
        self
    }

    /// Copy every agent, policy, and consent out of another set of stores.
    pub fn snapshot(
        agents: &dyn AgentStore,
        policies: &dyn PolicyStore,
        consents: &dyn ConsentStore,
    ) -> Result<Self, StoreError> {
        let store = Self::new();
        *write(&store.agents) = agents.list_agents()?;
        *write(&store.policies) = policies.list_policies()?;
        *write(&store.consents) = consents
            .list_consents()?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        Ok(store)
    }

    pub fn upsert_agent(&self, agent: Agent) {
        let mut agents = write(&self.agents);
        match agents.iter_mut().find(|a| a.id == agent.id) {
            Some(existing) => *existing = agent,
            None => agents.push(agent),
        }
    }

    pub fn upsert_policy(&self, policy: Policy) {
        let mut policies = write(&self.policies);
        match policies.iter_mut().find(|p| p.id == policy.id) {
            Some(existing) => *existing = policy,
            None => policies.push(policy),
        }
    }
}

impl AgentStore for MemoryStore {
    fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, StoreError> {
        Ok(read(&self.agents).iter().find(|a| a.id == agent_id).cloned())
    }

    fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        Ok(read(&self.agents).clone())
    }

    fn save_spend(&self, agent_id: &str, ledger: &SpendLedger) -> Result<(), StoreError> {
        if let Some(agent) = write(&self.agents).iter_mut().find(|a| a.id == agent_id) {
            agent.spend = ledger.clone();
        }
        Ok(())
    }
}

impl PolicyStore for MemoryStore {
    fn list_policies(&self) -> Result<Vec<Policy>, StoreError> {
        Ok(read(&self.policies).clone())
    }
}

impl ConsentStore for MemoryStore {
    fn get_consent(&self, consent_id: &str) -> Result<Option<Consent>, StoreError> {
        Ok(read(&self.consents).get(consent_id).cloned())
    }

    fn save_consent(&self, consent: &Consent) -> Result<(), StoreError> {
        write(&self.consents).insert(consent.id.clone(), consent.clone());
        Ok(())
    }

    fn list_consents(&self) -> Result<Vec<Consent>, StoreError> {
        let mut consents: Vec<Consent> = read(&self.consents).values().cloned().collect();
        consents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(consents)
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── File store ──────────────────────────────────────────────────

/// State under a project's `.agentauth/` directory.
///
/// Agents and policies are authored YAML and re-read on every call, so edits
/// take effect without a restart. Spend counters live in
/// `spend/<agent>.json` and override the (usually absent) `spend` block in
/// agents.yaml. Each consent is its own JSON file.
pub struct FileStore {
    agents_file: PathBuf,
    policies_file: PathBuf,
    spend_dir: PathBuf,
    consents_dir: PathBuf,
}

impl FileStore {
    pub fn new(config: &AuthzConfig) -> Self {
        Self {
            agents_file: config.agents_file.clone(),
            policies_file: config.policies_file.clone(),
            spend_dir: config.spend_dir.clone(),
            consents_dir: config.consents_dir.clone(),
        }
    }

    fn spend_file(&self, agent_id: &str) -> Option<PathBuf> {
        safe_file_stem(agent_id).then(|| self.spend_dir.join(format!("{}.json", agent_id)))
    }

    fn consent_file(&self, consent_id: &str) -> Option<PathBuf> {
        safe_file_stem(consent_id).then(|| self.consents_dir.join(format!("{}.json", consent_id)))
    }

    fn load_spend(&self, agent: &mut Agent) -> Result<(), StoreError> {
        let Some(path) = self.spend_file(&agent.id) else {
            return Ok(());
        };
        if let Some(ledger) = read_json::<SpendLedger>(&path)? {
            agent.spend = ledger;
        }
        Ok(())
    }
}

impl AgentStore for FileStore {
    fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, StoreError> {
        Ok(self.list_agents()?.into_iter().find(|a| a.id == agent_id))
    }

    fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        if !self.agents_file.exists() {
            return Ok(Vec::new());
        }
        let mut agents = Agent::load_all(&self.agents_file)?;
        for agent in &mut agents {
            self.load_spend(agent)?;
        }
        Ok(agents)
    }

    fn save_spend(&self, agent_id: &str, ledger: &SpendLedger) -> Result<(), StoreError> {
        let path = self
            .spend_file(agent_id)
            .ok_or_else(|| StoreError::Unavailable(format!("unsafe agent id '{}'", agent_id)))?;
        write_json(&path, ledger)
    }

    fn lock_spend(&self, agent_id: &str) -> Result<Option<FileLock>, StoreError> {
        let path = self
            .spend_file(agent_id)
            .ok_or_else(|| StoreError::Unavailable(format!("unsafe agent id '{}'", agent_id)))?
            .with_extension("lock");
        FileLock::acquire(&path)
            .map(Some)
            .map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })
    }
}

impl PolicyStore for FileStore {
    fn list_policies(&self) -> Result<Vec<Policy>, StoreError> {
        if !self.policies_file.exists() {
            return Ok(Vec::new());
        }
        Ok(Policy::load_all(&self.policies_file)?)
    }
}

impl ConsentStore for FileStore {
    fn get_consent(&self, consent_id: &str) -> Result<Option<Consent>, StoreError> {
        match self.consent_file(consent_id) {
            Some(path) => read_json(&path),
            None => Ok(None),
        }
    }

    fn save_consent(&self, consent: &Consent) -> Result<(), StoreError> {
        let path = self
            .consent_file(&consent.id)
            .ok_or_else(|| StoreError::Unavailable(format!("unsafe consent id '{}'", consent.id)))?;
        write_json(&path, consent)
    }

    fn list_consents(&self) -> Result<Vec<Consent>, StoreError> {
        if !self.consents_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.consents_dir).map_err(|source| StoreError::Io {
            path: self.consents_dir.display().to_string(),
            source,
        })?;

        let mut consents = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.consents_dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match read_json::<Consent>(&path) {
                    Ok(Some(consent)) => consents.push(consent),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable consent"),
                }
            }
        }
        consents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(consents)
    }
}

/// Ids become file names, so only `[A-Za-z0-9_-]` is accepted.
fn safe_file_stem(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&json)
        .map(Some)
        .map_err(|source| StoreError::Serialization {
            path: path.display().to_string(),
            source,
        })
}

// Write to a sibling temp file then rename, so readers never see a torn file.
fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Serialization {
        path: path.display().to_string(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}
