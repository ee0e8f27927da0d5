//! Singleton worker election and the persisted worker record.
//!
//! Exactly one worker should serve a project at a time. Election goes
//! through a JSON record on disk: a starting worker reads it, checks whether
//! the recorded owner is still alive, and either defers to it or claims the
//! role by writing a fresh record. Released records are zeroed in place, the
//! file itself is never deleted.

pub mod probe;

use crate::config::ensure_parent_dir;
use crate::error::{Result, ShutdownReason};
use crate::server::ServerConfig;
use probe::ProcessProbe;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Persisted claim on the singleton worker role.
///
/// `worker_pid` of zero is the tombstone left behind by a clean release.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    pub worker_pid: u32,
    pub host_pid: u32,
    pub host_parent_pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_config: Option<ServerConfig>,
}

/// Outcome of an [`WorkerRegistry::acquire`] attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerHandle {
    /// This process now owns the worker role.
    Primary,
    /// A live worker already owns the role; its record is returned so the
    /// caller can hand its published config back to the host.
    Deferred(WorkerRecord),
}

impl WorkerHandle {
    pub fn is_primary(&self) -> bool {
        matches!(self, WorkerHandle::Primary)
    }
}

/// Registry over the on-disk worker record.
pub struct WorkerRegistry {
    path: PathBuf,
    probe: Arc<dyn ProcessProbe>,
    record: Mutex<WorkerRecord>,
    primary: Mutex<bool>,
}

impl WorkerRegistry {
    pub fn new(path: impl Into<PathBuf>, probe: Arc<dyn ProcessProbe>) -> Self {
        Self {
            path: path.into(),
            probe,
            record: Mutex::new(WorkerRecord::default()),
            primary: Mutex::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the record names a live worker other than this process.
    ///
    /// Three cases read as "not running": a zeroed (released) record, a
    /// record naming our own pid (a stale claim from a reused pid or a
    /// crashed predecessor that happened to share it), and a pid the OS no
    /// longer knows.
    pub fn is_running(&self, record: &WorkerRecord) -> bool {
        if record.worker_pid == 0 {
            return false;
        }
        if record.worker_pid == self.probe.current_pid() {
            return false;
        }
        self.probe.is_alive(record.worker_pid)
    }

    /// Try to claim the worker role.
    ///
    /// Reads the record (a missing or unparseable file counts as released),
    /// defers when the recorded owner is alive, and otherwise writes a fresh
    /// claim. The read-check-write sequence is unlocked: two processes
    /// racing through it can both claim the role, and the later write wins.
    /// The host serializes worker startup in practice.
    pub fn acquire(&self, host_pid: u32, host_parent_pid: u32) -> Result<WorkerHandle> {
        let existing = self.read_record();
        if self.is_running(&existing) {
            tracing::info!(
                worker_pid = existing.worker_pid,
                "live worker found; deferring"
            );
            *self.record.lock().unwrap() = existing.clone();
            return Ok(WorkerHandle::Deferred(existing));
        }

        let fresh = WorkerRecord {
            worker_pid: self.probe.current_pid(),
            host_pid,
            host_parent_pid,
            server_config: None,
        };
        self.write_record(&fresh)?;
        *self.record.lock().unwrap() = fresh;
        *self.primary.lock().unwrap() = true;
        tracing::info!(host_pid, host_parent_pid, "worker role claimed");
        Ok(WorkerHandle::Primary)
    }

    /// [`acquire`](Self::acquire) with this process's parent as the host.
    ///
    /// The worker is spawned directly by the host build tool, so the host
    /// pid is simply our parent pid.
    pub fn acquire_from_parent(&self, host_parent_pid: u32) -> Result<WorkerHandle> {
        self.acquire(self.probe.parent_pid(), host_parent_pid)
    }

    /// Publish the dev server's runtime config into the record.
    ///
    /// A deferred (non-primary) process skips the write while the recorded
    /// owner is still alive; overwriting a live primary's record would hand
    /// future hosts a config nobody serves.
    pub fn update_server_config(&self, config: ServerConfig) -> Result<()> {
        if !*self.primary.lock().unwrap() {
            let current = self.read_record();
            if self.is_running(&current) {
                tracing::debug!("skipping record update; primary worker is alive");
                return Ok(());
            }
        }
        let mut record = self.record.lock().unwrap();
        record.server_config = Some(config);
        self.write_record(&record)
    }

    /// Whether this process claimed the worker role.
    pub fn is_primary(&self) -> bool {
        *self.primary.lock().unwrap()
    }

    /// In-memory copy of the record as last read or written.
    pub fn record(&self) -> WorkerRecord {
        self.record.lock().unwrap().clone()
    }

    /// Release the claim by zeroing the record in place.
    ///
    /// The file is kept so the next worker's read still succeeds; all pids
    /// drop to zero and the published config goes with them.
    pub fn zero(&self) -> Result<()> {
        let zeroed = WorkerRecord::default();
        self.write_record(&zeroed)?;
        *self.record.lock().unwrap() = zeroed;
        *self.primary.lock().unwrap() = false;
        Ok(())
    }

    /// Watch the host process tree and resolve when it dies.
    ///
    /// Probes `host_parent_pid` once per `interval`; the parent of the host
    /// outlives individual build-tool invocations, so its death means the
    /// whole session is gone. Zeroes the record before resolving.
    pub async fn watchdog(&self, interval: Duration) -> ShutdownReason {
        let host_parent_pid = self.record().host_parent_pid;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !self.probe.is_alive(host_parent_pid) {
                tracing::warn!(host_parent_pid, "host process tree died; releasing");
                if let Err(e) = self.zero() {
                    tracing::error!("failed to zero worker record: {}", e);
                }
                return ShutdownReason::HostLost;
            }
        }
    }

    fn read_record(&self) -> WorkerRecord {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("worker record unreadable, treating as released: {}", e);
                WorkerRecord::default()
            }),
            Err(_) => WorkerRecord::default(),
        }
    }

    fn write_record(&self, record: &WorkerRecord) -> Result<()> {
        ensure_parent_dir(&self.path)?;
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct FakeProbe {
        own: u32,
        alive: Mutex<HashSet<u32>>,
    }

    impl FakeProbe {
        fn new(own: u32, alive: &[u32]) -> Arc<Self> {
            Arc::new(Self {
                own,
                alive: Mutex::new(alive.iter().copied().collect()),
            })
        }

        fn kill(&self, pid: u32) {
            self.alive.lock().unwrap().remove(&pid);
        }
    }

    impl ProcessProbe for FakeProbe {
        fn is_alive(&self, pid: u32) -> bool {
            pid != 0 && self.alive.lock().unwrap().contains(&pid)
        }

        fn current_pid(&self) -> u32 {
            self.own
        }

        fn parent_pid(&self) -> u32 {
            self.own + 1
        }
    }

    fn state_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("local").join("worker-state.json")
    }

    #[test]
    fn test_acquire_with_missing_file_claims_role() {
        let dir = tempfile::TempDir::new().unwrap();
        let probe = FakeProbe::new(100, &[100, 200, 300]);
        let registry = WorkerRegistry::new(state_path(&dir), probe);

        let handle = registry.acquire(200, 300).unwrap();
        assert!(handle.is_primary());

        let record = registry.record();
        assert_eq!(record.worker_pid, 100);
        assert_eq!(record.host_pid, 200);
        assert_eq!(record.host_parent_pid, 300);
        assert!(state_path(&dir).exists());
    }

    #[test]
    fn test_acquire_defers_to_live_worker() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = state_path(&dir);
        let probe = FakeProbe::new(100, &[100, 999]);

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"workerPid":999,"hostPid":5,"hostParentPid":6,"serverConfig":{"port":5173}}"#,
        )
        .unwrap();

        let registry = WorkerRegistry::new(path.clone(), probe);
        match registry.acquire(200, 300).unwrap() {
            WorkerHandle::Deferred(record) => {
                assert_eq!(record.worker_pid, 999);
                assert_eq!(record.server_config.unwrap().port, Some(5173));
            }
            WorkerHandle::Primary => panic!("expected deferral"),
        }

        // The live owner's record must survive the deferred attempt intact.
        let on_disk: WorkerRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.worker_pid, 999);
    }

    #[test]
    fn test_acquire_overwrites_dead_worker_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = state_path(&dir);
        let probe = FakeProbe::new(100, &[100]);

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"workerPid":999,"hostPid":5,"hostParentPid":6}"#).unwrap();

        let registry = WorkerRegistry::new(path, probe);
        assert!(registry.acquire(200, 300).unwrap().is_primary());
        assert_eq!(registry.record().worker_pid, 100);
    }

    #[test]
    fn test_record_naming_own_pid_reads_as_released() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = state_path(&dir);
        let probe = FakeProbe::new(100, &[100]);

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"workerPid":100,"hostPid":5,"hostParentPid":6}"#).unwrap();

        let registry = WorkerRegistry::new(path, probe);
        assert!(registry.acquire(200, 300).unwrap().is_primary());
    }

    #[test]
    fn test_corrupt_record_treated_as_released() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = state_path(&dir);
        let probe = FakeProbe::new(100, &[100]);

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();

        let registry = WorkerRegistry::new(path, probe);
        assert!(registry.acquire(200, 300).unwrap().is_primary());
    }

    #[test]
    fn test_update_skipped_while_primary_alive() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = state_path(&dir);
        let probe = FakeProbe::new(100, &[100, 999]);

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"workerPid":999,"hostPid":5,"hostParentPid":6}"#).unwrap();

        let registry = WorkerRegistry::new(path.clone(), probe);
        assert!(!registry.acquire(200, 300).unwrap().is_primary());

        registry
            .update_server_config(ServerConfig {
                port: Some(4000),
                ..Default::default()
            })
            .unwrap();

        let on_disk: WorkerRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.worker_pid, 999);
        assert!(on_disk.server_config.is_none());
    }

    #[test]
    fn test_primary_publishes_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = state_path(&dir);
        let probe = FakeProbe::new(100, &[100]);

        let registry = WorkerRegistry::new(path.clone(), probe);
        registry.acquire(200, 300).unwrap();
        registry
            .update_server_config(ServerConfig {
                port: Some(5173),
                ..Default::default()
            })
            .unwrap();

        let on_disk: WorkerRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.worker_pid, 100);
        assert_eq!(on_disk.server_config.unwrap().port, Some(5173));
    }

    #[test]
    fn test_zero_keeps_file_with_tombstone() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = state_path(&dir);
        let probe = FakeProbe::new(100, &[100]);

        let registry = WorkerRegistry::new(path.clone(), probe);
        registry.acquire(200, 300).unwrap();
        registry.zero().unwrap();

        assert!(path.exists());
        let on_disk: WorkerRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, WorkerRecord::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fires_when_host_parent_dies() {
        let dir = tempfile::TempDir::new().unwrap();
        let probe = FakeProbe::new(100, &[100, 200, 300]);
        let registry = Arc::new(WorkerRegistry::new(state_path(&dir), probe.clone()));
        registry.acquire(200, 300).unwrap();

        let watcher = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.watchdog(Duration::from_secs(1)).await })
        };

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!watcher.is_finished());

        probe.kill(300);
        let reason = watcher.await.unwrap();
        assert_eq!(reason, ShutdownReason::HostLost);
        assert_eq!(registry.record(), WorkerRecord::default());
    }
}
