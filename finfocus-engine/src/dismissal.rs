//! # Dismissal Store
//!
//! Persistent map from recommendation id to its suppression state. The
//! store is one versioned JSON document (`dismissed.json` under the home
//! directory) with an append-only lifecycle history per record.
//!
//! Robustness rules: a corrupted file logs WARN and yields an empty store;
//! it never aborts the calling operation. A version mismatch logs WARN and
//! migrates by keeping only the fields this build understands. Writes go
//! through write-to-temp-then-rename, and an advisory sidecar lock
//! (`dismissed.json.lock`) serializes read-modify-write sequences across
//! processes; read-only opens take the lock shared.
//!
//! ## Lifecycle
//!
//! `active → dismissed`, `active → snoozed`, `snoozed → active` (automatic
//! once `expires_at` passes, cleaned on read), direct `dismissed ↔ snoozed`
//! transitions (overwrite the record, append history), and explicit
//! undismissal, which removes the record and leaves a final `undismissed`
//! line on the disk-local audit log when one is available.

use chrono::{DateTime, Utc};
use finfocus_plugin_sdk::models::{DismissRequest, DismissalReason, Recommendation};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current document schema version.
const STORE_VERSION: u32 = 1;

/// File name of the lifecycle audit log under the logs directory.
const AUDIT_LOG_NAME: &str = "dismissals.log";

/// Suppression state of one recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DismissalStatus {
    Dismissed,
    Snoozed,
}

/// Action recorded in a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    Dismissed,
    Snoozed,
    Undismissed,
}

/// One entry in a record's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub action: LifecycleAction,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DismissalReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Persistent suppression record for one recommendation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DismissalRecord {
    /// Current suppression state
    pub status: DismissalStatus,
    /// Why the recommendation was suppressed
    pub reason: DismissalReason,
    /// Free-form note accompanying the reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// When the suppression was recorded
    pub dismissed_at: DateTime<Utc>,
    /// When the suppression lapses; permanent when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Snapshot of the recommendation as last seen from a plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known: Option<Recommendation>,
    /// Append-only lifecycle history
    #[serde(default)]
    pub history: Vec<LifecycleEvent>,
}

impl DismissalRecord {
    /// Whether the record still suppresses its recommendation at `now`.
    pub fn is_suppressed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| expires > now)
    }

    /// Whether this is a snooze whose expiry has passed.
    pub fn is_expired_snooze(&self, now: DateTime<Utc>) -> bool {
        self.status == DismissalStatus::Snoozed
            && self.expires_at.is_some_and(|expires| expires <= now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDoc {
    version: u32,
    #[serde(default)]
    dismissals: HashMap<String, DismissalRecord>,
}

impl Default for StoreDoc {
    fn default() -> Self {
        Self { version: STORE_VERSION, dismissals: HashMap::new() }
    }
}

/// The dismissal store, loaded into memory on open.
#[derive(Debug)]
pub struct DismissalStore {
    path: PathBuf,
    logs_dir: Option<PathBuf>,
    doc: StoreDoc,
}

impl DismissalStore {
    /// Open the store at `path`, loading its current contents. Never fails:
    /// a missing or corrupted file yields an empty store.
    pub fn open(path: impl Into<PathBuf>, logs_dir: Option<PathBuf>) -> Self {
        let path = path.into();
        let doc = {
            let _shared = lock(&path, false);
            load(&path)
        };
        Self { path, logs_dir, doc }
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record or refresh a dismissal. A request carrying `expires_at`
    /// becomes a snooze; otherwise the dismissal is permanent. Direct
    /// transitions between the two states overwrite the record and append
    /// to its history.
    pub fn dismiss(
        &mut self,
        request: &DismissRequest,
        last_known: Option<Recommendation>,
    ) -> std::io::Result<()> {
        let now = Utc::now();
        let (status, action) = match request.expires_at {
            Some(_) => (DismissalStatus::Snoozed, LifecycleAction::Snoozed),
            None => (DismissalStatus::Dismissed, LifecycleAction::Dismissed),
        };
        self.mutate(|dismissals| {
            let history = dismissals
                .remove(&request.id)
                .map(|prior| prior.history)
                .unwrap_or_default();
            let mut record = DismissalRecord {
                status,
                reason: request.reason,
                note: request.custom_reason.clone(),
                dismissed_at: now,
                expires_at: request.expires_at,
                last_known: last_known.clone(),
                history,
            };
            record.history.push(LifecycleEvent {
                action,
                timestamp: now,
                reason: Some(request.reason),
                note: request.custom_reason.clone(),
                expires_at: request.expires_at,
            });
            dismissals.insert(request.id.clone(), record);
        })
    }

    /// Snooze a recommendation until `until`.
    pub fn snooze(
        &mut self,
        id: &str,
        until: DateTime<Utc>,
        reason: DismissalReason,
        note: Option<String>,
        last_known: Option<Recommendation>,
    ) -> std::io::Result<()> {
        let request = DismissRequest {
            id: id.to_string(),
            reason,
            custom_reason: note,
            expires_at: Some(until),
            dismissed_by: None,
        };
        self.dismiss(&request, last_known)
    }

    /// Remove a record, returning whether one existed. Emits a final
    /// `undismissed` event on the audit log when a logs directory is set.
    pub fn undismiss(&mut self, id: &str) -> std::io::Result<bool> {
        let mut removed = false;
        self.mutate(|dismissals| {
            removed = dismissals.remove(id).is_some();
        })?;
        if removed {
            self.audit(id, LifecycleAction::Undismissed);
        }
        Ok(removed)
    }

    /// Fetch one record.
    pub fn get(&self, id: &str) -> Option<&DismissalRecord> {
        self.doc.dismissals.get(id)
    }

    /// Store a record verbatim.
    pub fn set(&mut self, id: &str, record: DismissalRecord) -> std::io::Result<()> {
        self.mutate(|dismissals| {
            dismissals.insert(id.to_string(), record.clone());
        })
    }

    /// Delete a record without audit semantics, returning whether one existed.
    pub fn delete(&mut self, id: &str) -> std::io::Result<bool> {
        let mut removed = false;
        self.mutate(|dismissals| {
            removed = dismissals.remove(id).is_some();
        })?;
        Ok(removed)
    }

    /// Every record, keyed by recommendation id.
    pub fn all_records(&self) -> &HashMap<String, DismissalRecord> {
        &self.doc.dismissals
    }

    /// Ids that are still suppressed at `now`, sorted for determinism.
    pub fn dismissed_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .doc
            .dismissals
            .iter()
            .filter(|(_, record)| record.is_suppressed(now))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Snoozes whose expiry has passed at `now`, sorted.
    pub fn expired_snoozes(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .doc
            .dismissals
            .iter()
            .filter(|(_, record)| record.is_expired_snooze(now))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Remove every expired snooze, rewriting the store when any were
    /// found. Returns the removed ids.
    pub fn clean_expired_snoozes(&mut self, now: DateTime<Utc>) -> std::io::Result<Vec<String>> {
        let expired = self.expired_snoozes(now);
        if expired.is_empty() {
            return Ok(expired);
        }
        debug!(count = expired.len(), "cleaning expired snoozes");
        self.mutate(|dismissals| {
            dismissals.retain(|_, record| !record.is_expired_snooze(now));
        })?;
        Ok(expired)
    }

    /// Run one read-modify-write sequence under the exclusive lock.
    fn mutate(
        &mut self,
        apply: impl FnMut(&mut HashMap<String, DismissalRecord>),
    ) -> std::io::Result<()> {
        let mut apply = apply;
        let _exclusive = lock(&self.path, true);
        self.doc = load(&self.path);
        apply(&mut self.doc.dismissals);
        self.persist()
    }

    fn persist(&self) -> std::io::Result<()> {
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;
        let payload = serde_json::to_vec_pretty(&self.doc)?;
        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        temp.write_all(&payload)?;
        temp.flush()?;
        temp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    fn audit(&self, id: &str, action: LifecycleAction) {
        let Some(logs_dir) = &self.logs_dir else { return };
        let line = serde_json::json!({
            "action": action,
            "id": id,
            "timestamp": Utc::now(),
        });
        let result = std::fs::create_dir_all(logs_dir).and_then(|()| {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(logs_dir.join(AUDIT_LOG_NAME))?;
            writeln!(file, "{line}")
        });
        if let Err(err) = result {
            warn!(error = %err, "failed to append to dismissal audit log");
        }
    }
}

/// Acquire the sidecar advisory lock. Returns `None` (and proceeds
/// unlocked) when the lock file cannot be created; locking is best-effort
/// protection for concurrent processes, not a correctness gate within one.
fn lock(path: &Path, exclusive: bool) -> Option<File> {
    let lock_path = path.with_extension("json.lock");
    if let Some(parent) = lock_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file = match OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
    {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %lock_path.display(), error = %err, "dismissal store lock unavailable");
            return None;
        }
    };
    let locked = if exclusive {
        file.lock_exclusive()
    } else {
        file.lock_shared()
    };
    if let Err(err) = locked {
        warn!(path = %lock_path.display(), error = %err, "dismissal store lock failed");
        return None;
    }
    Some(file)
}

fn load(path: &Path) -> StoreDoc {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return StoreDoc::default(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read dismissal store, starting empty");
            return StoreDoc::default();
        }
    };
    match serde_json::from_slice::<StoreDoc>(&raw) {
        Ok(mut doc) => {
            if doc.version != STORE_VERSION {
                warn!(
                    found = doc.version,
                    expected = STORE_VERSION,
                    "dismissal store version mismatch, migrating known fields"
                );
                doc.version = STORE_VERSION;
            }
            doc
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "corrupted dismissal store, starting empty");
            StoreDoc::default()
        }
    }
}
