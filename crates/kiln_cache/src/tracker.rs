//! Staleness decisions and scoped fingerprint updates.
//!
//! A [`StalenessTracker`] is opened at the start of a build. It answers
//! whether each unit must be recompiled and collects fingerprints of units
//! that compiled successfully. Nothing is written until [`flush`] is called
//! after the whole build succeeded; dropping the tracker without flushing
//! discards every pending update, so a failed or interrupted build leaves the
//! previous store intact and its units are retried next run.
//!
//! [`flush`]: StalenessTracker::flush

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use kiln_common::CompilationUnit;
use parking_lot::Mutex;

use crate::error::CacheError;
use crate::hasher::{Fingerprint, FingerprintMode, SourceHasher};
use crate::store::{write_atomic, FingerprintStore};

/// Name of the file recording the manifest stamp of the last archive.
const STAMP_FILE: &str = "archive.stamp";

/// Why a unit must be recompiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// No fingerprint was recorded for the unit.
    NoFingerprint,
    /// The source changed since the recorded fingerprint.
    Changed,
    /// The object file is missing.
    MissingObject,
    /// Fingerprints are being ignored.
    Forced,
}

/// Staleness of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// The recorded object is current.
    Fresh,
    /// The unit must be recompiled.
    Stale(StaleReason),
}

impl Staleness {
    /// Returns `true` for [`Staleness::Stale`].
    pub fn is_stale(self) -> bool {
        matches!(self, Staleness::Stale(_))
    }
}

/// The outcome of checking one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCheck {
    /// Whether the unit must be recompiled.
    pub staleness: Staleness,
    /// The unit's current fingerprint, to be committed after a successful compile.
    pub hash: String,
}

/// Decides unit staleness and stages fingerprint updates for one build.
pub struct StalenessTracker {
    store: FingerprintStore,
    mode: FingerprintMode,
    force: bool,
    pending: Mutex<BTreeMap<String, Fingerprint>>,
    stamp_path: PathBuf,
    archive_stamp: Option<String>,
    pending_stamp: Mutex<Option<String>>,
    pruned: Vec<String>,
    flushed: bool,
}

impl StalenessTracker {
    /// Opens the tracker over the store in `dir`.
    pub fn open(dir: &Path, mode: FingerprintMode) -> Result<Self, CacheError> {
        let store = FingerprintStore::load(dir)?;
        let stamp_path = dir.join(STAMP_FILE);
        let archive_stamp = std::fs::read_to_string(&stamp_path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        tracing::debug!(
            store = %store.path().display(),
            entries = store.len(),
            "opened fingerprint store"
        );
        Ok(Self {
            store,
            mode,
            force: false,
            pending: Mutex::new(BTreeMap::new()),
            stamp_path,
            archive_stamp,
            pending_stamp: Mutex::new(None),
            pruned: Vec::new(),
            flushed: false,
        })
    }

    /// Treats every unit as stale when `force` is set.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// The fingerprint mode in use.
    pub fn mode(&self) -> FingerprintMode {
        self.mode
    }

    /// Fingerprints `unit` and decides whether it must be recompiled.
    pub fn check(&self, unit: &CompilationUnit) -> Result<UnitCheck, CacheError> {
        let hash = SourceHasher::fingerprint(unit.source_path(), self.mode)?;
        let staleness = if self.force {
            Staleness::Stale(StaleReason::Forced)
        } else {
            match self.store.get(unit.id()) {
                None => Staleness::Stale(StaleReason::NoFingerprint),
                Some(fp) if fp.hash != hash => Staleness::Stale(StaleReason::Changed),
                Some(_) if !unit.object_path().is_file() => {
                    Staleness::Stale(StaleReason::MissingObject)
                }
                Some(_) => Staleness::Fresh,
            }
        };
        tracing::debug!(unit = unit.id(), ?staleness, "checked unit");
        Ok(UnitCheck { staleness, hash })
    }

    /// Returns `true` if `unit` must be recompiled.
    pub fn is_stale(&self, unit: &CompilationUnit) -> Result<bool, CacheError> {
        Ok(self.check(unit)?.staleness.is_stale())
    }

    /// Stages the fingerprint of a successfully compiled unit.
    ///
    /// Safe to call concurrently from worker threads; each unit writes its
    /// own key.
    pub fn commit(&self, unit: &CompilationUnit, hash: &str) {
        self.pending
            .lock()
            .insert(unit.id().to_string(), Fingerprint::now(unit.id(), hash));
    }

    /// Number of staged fingerprints.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drops recorded fingerprints of units not in `live`.
    ///
    /// Returns the ids of removed units so their objects can be deleted. The
    /// removal is persisted by [`flush`](Self::flush).
    pub fn prune(&mut self, live: &BTreeSet<String>) -> Vec<String> {
        let removed = self.store.remove_unless(|id| live.contains(id));
        self.pruned.extend(removed.iter().cloned());
        removed
    }

    /// The manifest stamp recorded by the last successful archive.
    pub fn archive_stamp(&self) -> Option<&str> {
        self.archive_stamp.as_deref()
    }

    /// Stages the manifest stamp of an archive that just succeeded.
    pub fn record_archive_stamp(&self, stamp: impl Into<String>) {
        *self.pending_stamp.lock() = Some(stamp.into());
    }

    /// Persists all staged updates.
    ///
    /// The store and the archive stamp are each replaced atomically, but not
    /// together: the store is written first, so an interruption in between
    /// leaves an old stamp, which only costs a re-archive next run.
    ///
    /// Returns the number of fingerprints written for compiled units.
    pub fn flush(mut self) -> Result<usize, CacheError> {
        let pending = std::mem::take(&mut *self.pending.lock());
        let committed = pending.len();
        for fp in pending.into_values() {
            self.store.insert(fp);
        }
        self.store.save()?;
        if let Some(stamp) = self.pending_stamp.lock().take() {
            write_atomic(&self.stamp_path, format!("{stamp}\n").as_bytes())?;
        }
        self.flushed = true;
        tracing::debug!(
            committed,
            pruned = self.pruned.len(),
            total = self.store.len(),
            "flushed fingerprint store"
        );
        Ok(committed)
    }
}

impl Drop for StalenessTracker {
    fn drop(&mut self) {
        if !self.flushed {
            let pending = self.pending.get_mut().len();
            if pending > 0 {
                tracing::debug!(pending, "discarding unflushed fingerprints");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn obj_dir(&self) -> PathBuf {
            self.dir.path().join("obj")
        }

        fn unit(&self, id: &str, content: &str) -> CompilationUnit {
            let src = self.dir.path().join(format!("{id}.cpp"));
            std::fs::write(&src, content).unwrap();
            CompilationUnit::new(id, src, self.obj_dir().join(format!("{id}.o")))
        }

        fn write_object(&self, unit: &CompilationUnit) {
            std::fs::create_dir_all(self.obj_dir()).unwrap();
            std::fs::write(unit.object_path(), b"obj").unwrap();
        }

        fn open(&self) -> StalenessTracker {
            StalenessTracker::open(&self.obj_dir(), FingerprintMode::Content).unwrap()
        }
    }

    #[test]
    fn unknown_unit_is_stale() {
        let fx = Fixture::new();
        let unit = fx.unit("a", "int a;");
        let check = fx.open().check(&unit).unwrap();
        assert_eq!(
            check.staleness,
            Staleness::Stale(StaleReason::NoFingerprint)
        );
    }

    #[test]
    fn committed_unit_is_fresh_after_flush() {
        let fx = Fixture::new();
        let unit = fx.unit("a", "int a;");
        fx.write_object(&unit);

        let tracker = fx.open();
        let check = tracker.check(&unit).unwrap();
        tracker.commit(&unit, &check.hash);
        assert_eq!(tracker.flush().unwrap(), 1);

        assert!(!fx.open().is_stale(&unit).unwrap());
    }

    #[test]
    fn changed_source_is_stale() {
        let fx = Fixture::new();
        let unit = fx.unit("a", "int a;");
        fx.write_object(&unit);
        let tracker = fx.open();
        let check = tracker.check(&unit).unwrap();
        tracker.commit(&unit, &check.hash);
        tracker.flush().unwrap();

        std::fs::write(unit.source_path(), "int a = 2;").unwrap();
        let check = fx.open().check(&unit).unwrap();
        assert_eq!(check.staleness, Staleness::Stale(StaleReason::Changed));
    }

    #[test]
    fn missing_object_is_stale() {
        let fx = Fixture::new();
        let unit = fx.unit("a", "int a;");
        let tracker = fx.open();
        let check = tracker.check(&unit).unwrap();
        tracker.commit(&unit, &check.hash);
        tracker.flush().unwrap();

        let check = fx.open().check(&unit).unwrap();
        assert_eq!(
            check.staleness,
            Staleness::Stale(StaleReason::MissingObject)
        );
    }

    #[test]
    fn force_marks_fresh_unit_stale() {
        let fx = Fixture::new();
        let unit = fx.unit("a", "int a;");
        fx.write_object(&unit);
        let tracker = fx.open();
        let check = tracker.check(&unit).unwrap();
        tracker.commit(&unit, &check.hash);
        tracker.flush().unwrap();

        let check = fx.open().with_force(true).check(&unit).unwrap();
        assert_eq!(check.staleness, Staleness::Stale(StaleReason::Forced));
    }

    #[test]
    fn drop_without_flush_discards_commits() {
        let fx = Fixture::new();
        let unit = fx.unit("a", "int a;");
        fx.write_object(&unit);
        {
            let tracker = fx.open();
            let check = tracker.check(&unit).unwrap();
            tracker.commit(&unit, &check.hash);
            assert_eq!(tracker.pending_len(), 1);
        }
        assert!(fx.open().is_stale(&unit).unwrap());
    }

    #[test]
    fn commit_only_touches_its_own_unit() {
        let fx = Fixture::new();
        let a = fx.unit("a", "int a;");
        let b = fx.unit("b", "int b;");
        fx.write_object(&a);
        fx.write_object(&b);

        let tracker = fx.open();
        let check = tracker.check(&a).unwrap();
        tracker.commit(&a, &check.hash);
        tracker.flush().unwrap();

        let tracker = fx.open();
        assert!(!tracker.is_stale(&a).unwrap());
        assert!(tracker.is_stale(&b).unwrap());
    }

    #[test]
    fn concurrent_commits_are_all_kept() {
        let fx = Fixture::new();
        let units: Vec<CompilationUnit> = (0..64)
            .map(|i| {
                let unit = fx.unit(&format!("u{i:02}"), &format!("int u{i};"));
                fx.write_object(&unit);
                unit
            })
            .collect();

        let tracker = fx.open();
        let pairs: Vec<(&CompilationUnit, UnitCheck)> = units
            .iter()
            .map(|u| (u, tracker.check(u).unwrap()))
            .collect();
        std::thread::scope(|scope| {
            for chunk in pairs.chunks(8) {
                let tracker = &tracker;
                scope.spawn(move || {
                    for (unit, check) in chunk {
                        tracker.commit(unit, &check.hash);
                    }
                });
            }
        });
        assert_eq!(tracker.pending_len(), 64);
        assert_eq!(tracker.flush().unwrap(), 64);

        let tracker = fx.open();
        for unit in &units {
            assert!(!tracker.is_stale(unit).unwrap(), "{} is stale", unit.id());
        }
    }

    #[test]
    fn prune_removes_dead_units_on_flush() {
        let fx = Fixture::new();
        let a = fx.unit("a", "int a;");
        let b = fx.unit("b", "int b;");
        let tracker = fx.open();
        for unit in [&a, &b] {
            let check = tracker.check(unit).unwrap();
            tracker.commit(unit, &check.hash);
        }
        tracker.flush().unwrap();

        let mut tracker = fx.open();
        let live: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        assert_eq!(tracker.prune(&live), vec!["b".to_string()]);
        tracker.flush().unwrap();

        let store = FingerprintStore::load(&fx.obj_dir()).unwrap();
        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());
    }

    #[test]
    fn archive_stamp_persists_only_on_flush() {
        let fx = Fixture::new();
        {
            let tracker = fx.open();
            assert!(tracker.archive_stamp().is_none());
            tracker.record_archive_stamp("abc");
        }
        assert!(fx.open().archive_stamp().is_none());

        let tracker = fx.open();
        tracker.record_archive_stamp("abc");
        tracker.flush().unwrap();
        assert_eq!(fx.open().archive_stamp(), Some("abc"));
    }

    #[test]
    fn unreadable_source_errors() {
        let fx = Fixture::new();
        let unit = CompilationUnit::new(
            "ghost",
            fx.dir.path().join("ghost.cpp"),
            fx.obj_dir().join("ghost.o"),
        );
        assert!(fx.open().check(&unit).is_err());
    }
}
