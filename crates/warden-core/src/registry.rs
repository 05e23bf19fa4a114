//! The authoritative set of watched entities.
//!
//! Names are unique across services, files and directories. The registry is
//! shared as [`SharedRegistry`]: the monitor holds the read lock for a whole
//! tick and every mutation takes the write lock.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::backup_store::BackupStore;
use crate::config::{DirectorySpec, FileSpec, ServiceSpec, WatchPlan};
use crate::error::RegistryError;
use crate::model::{Directory, ObjectKind, ServiceTriple, TripleMember, WatchedObject};
use crate::scanner;

pub type SharedRegistry = Arc<RwLock<Registry>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Service,
    File,
    Directory,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Service => "service",
            Self::File => "file",
            Self::Directory => "directory",
        })
    }
}

/// What a successful [`Registry::remove`] took out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed {
    pub kind: EntityKind,
    pub name: String,
    pub objects: usize,
}

#[derive(Debug, Default)]
pub struct Registry {
    services: Vec<ServiceTriple>,
    files: Vec<WatchedObject>,
    directories: Vec<Directory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Build the startup registry from a validated plan.
    ///
    /// Unavailable entries are skipped with a diagnostic and do not reserve
    /// their name. A duplicate name aborts the whole load.
    pub fn load(plan: WatchPlan, store: &BackupStore) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for spec in &plan.services {
            registry.ensure_unique(&spec.name)?;
            match capture_service(store, spec) {
                Ok(triple) => registry.services.push(triple),
                Err(e) => warn!(name = %spec.name, error = %e, "service excluded"),
            }
        }
        for spec in &plan.files {
            registry.ensure_unique(&spec.name)?;
            match capture_file(store, spec) {
                Ok(obj) => registry.files.push(obj),
                Err(e) => warn!(name = %spec.name, path = %spec.path.display(), error = %e, "file excluded"),
            }
        }
        for spec in &plan.directories {
            registry.ensure_unique(&spec.name)?;
            match capture_directory(store, spec) {
                Ok(dir) => registry.directories.push(dir),
                Err(e) => warn!(name = %spec.name, path = %spec.path.display(), error = %e, "directory excluded"),
            }
        }
        info!(
            services = registry.services.len(),
            files = registry.files.len(),
            directories = registry.directories.len(),
            objects = registry.object_count(),
            "registry loaded"
        );
        Ok(registry)
    }

    pub fn services(&self) -> &[ServiceTriple] {
        &self.services
    }

    pub fn files(&self) -> &[WatchedObject] {
        &self.files
    }

    pub fn directories(&self) -> &[Directory] {
        &self.directories
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.files.is_empty() && self.directories.is_empty()
    }

    /// Every watched object in evaluation order: service members, then
    /// standalone files, then directory entries.
    pub fn objects(&self) -> impl Iterator<Item = &WatchedObject> {
        self.services
            .iter()
            .flat_map(|s| s.members().map(|(_, obj)| obj))
            .chain(self.files.iter())
            .chain(self.directories.iter().flat_map(|d| d.entries().iter()))
    }

    pub fn object_count(&self) -> usize {
        self.services.len() * TripleMember::ALL.len()
            + self.files.len()
            + self.directories.iter().map(|d| d.entries().len()).sum::<usize>()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.services.iter().any(|s| s.name() == name)
            || self.files.iter().any(|f| f.name() == name)
            || self.directories.iter().any(|d| d.name() == name)
    }

    pub fn ensure_unique(&self, name: &str) -> Result<(), RegistryError> {
        if self.contains_name(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    pub fn insert_service(&mut self, triple: ServiceTriple) -> Result<(), RegistryError> {
        self.ensure_unique(triple.name())?;
        self.services.push(triple);
        Ok(())
    }

    pub fn insert_file(&mut self, obj: WatchedObject) -> Result<(), RegistryError> {
        self.ensure_unique(obj.name())?;
        self.files.push(obj);
        Ok(())
    }

    pub fn insert_directory(&mut self, dir: Directory) -> Result<(), RegistryError> {
        self.ensure_unique(dir.name())?;
        self.directories.push(dir);
        Ok(())
    }

    /// Retire the entity called `key`: services match by name, files and
    /// directories by name or path. Backup records are evicted unless another
    /// remaining object still mirrors the same path.
    pub fn remove(&mut self, key: &str, store: &BackupStore) -> Option<Removed> {
        let (kind, name, objects) = if let Some(i) = self.services.iter().position(|s| s.name() == key) {
            let triple = self.services.remove(i);
            let name = triple.name().to_string();
            (EntityKind::Service, name, triple.into_members().into_iter().collect::<Vec<_>>())
        } else if let Some(i) = self
            .files
            .iter()
            .position(|f| f.name() == key || f.path() == Path::new(key))
        {
            let obj = self.files.remove(i);
            (EntityKind::File, obj.name().to_string(), vec![obj])
        } else if let Some(i) = self
            .directories
            .iter()
            .position(|d| d.name() == key || d.root() == Path::new(key))
        {
            let dir = self.directories.remove(i);
            (EntityKind::Directory, dir.name().to_string(), dir.into_entries())
        } else {
            return None;
        };

        for obj in &objects {
            if self.references(obj.path(), obj.kind()) {
                continue;
            }
            if let Err(e) = store.evict(obj) {
                warn!(path = %obj.path().display(), error = %e, "cannot evict backup record");
            }
        }
        info!(%kind, %name, objects = objects.len(), "entity removed");
        Some(Removed {
            kind,
            name,
            objects: objects.len(),
        })
    }

    fn references(&self, path: &Path, kind: ObjectKind) -> bool {
        self.objects().any(|o| o.path() == path && o.kind() == kind)
    }
}

pub fn capture_file(store: &BackupStore, spec: &FileSpec) -> Result<WatchedObject, RegistryError> {
    store
        .snapshot(spec.name.clone(), &spec.path, ObjectKind::Content)
        .map_err(|source| RegistryError::FileUnavailable {
            name: spec.name.clone(),
            source,
        })
}

/// Snapshot all three members, or none. Records are written only once every
/// member has been captured.
pub fn capture_service(store: &BackupStore, spec: &ServiceSpec) -> Result<ServiceTriple, RegistryError> {
    let capture = |member: TripleMember, path: &Path| {
        store
            .capture(spec.name.clone(), path, ObjectKind::Content)
            .map_err(|source| RegistryError::IncompleteService {
                name: spec.name.clone(),
                member,
                source,
            })
    };
    let binary = capture(TripleMember::Binary, &spec.binary)?;
    let unit = capture(TripleMember::Unit, &spec.unit)?;
    let config = capture(TripleMember::Config, &spec.config)?;
    let triple = ServiceTriple::new(spec.name.clone(), binary, unit, config);
    for (_, obj) in triple.members() {
        store.commit(obj);
    }
    Ok(triple)
}

pub fn capture_directory(store: &BackupStore, spec: &DirectorySpec) -> Result<Directory, RegistryError> {
    scanner::capture_directory(store, spec.name.clone(), &spec.path, spec.recursive).map_err(|source| {
        RegistryError::DirectoryUnavailable {
            name: spec.name.clone(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::NoAttributes;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, BackupStore) {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join(".warden"), None, Arc::new(NoAttributes));
        store.prepare().unwrap();
        (dir, store)
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, name.as_bytes()).unwrap();
        p
    }

    #[test]
    fn duplicate_name_at_load_is_fatal() {
        let (dir, store) = setup();
        let a = touch(dir.path(), "a");
        let plan = WatchPlan {
            files: vec![
                FileSpec { name: "same".into(), path: a.clone() },
                FileSpec { name: "same".into(), path: a },
            ],
            ..Default::default()
        };
        assert!(matches!(
            Registry::load(plan, &store),
            Err(RegistryError::DuplicateName(n)) if n == "same"
        ));
    }

    #[test]
    fn unavailable_entry_is_skipped_and_frees_its_name() {
        let (dir, store) = setup();
        let a = touch(dir.path(), "a");
        let plan = WatchPlan {
            files: vec![
                FileSpec { name: "x".into(), path: dir.path().join("missing") },
                FileSpec { name: "x".into(), path: a },
            ],
            ..Default::default()
        };
        let registry = Registry::load(plan, &store).unwrap();
        assert_eq!(registry.files().len(), 1);
        assert!(registry.contains_name("x"));
    }

    #[test]
    fn remove_matches_file_by_path_and_evicts() {
        let (dir, store) = setup();
        let a = touch(dir.path(), "a");
        let mut registry = Registry::new();
        registry
            .insert_file(capture_file(&store, &FileSpec { name: "a".into(), path: a.clone() }).unwrap())
            .unwrap();
        assert!(store.has_record(&a, ObjectKind::Content));

        let removed = registry.remove(&a.display().to_string(), &store).unwrap();
        assert_eq!(removed.kind, EntityKind::File);
        assert!(registry.is_empty());
        assert!(!store.has_record(&a, ObjectKind::Content));
        assert!(registry.remove("a", &store).is_none());
    }

    #[test]
    fn shared_record_survives_removal_of_one_owner() {
        let (dir, store) = setup();
        let a = touch(dir.path(), "a");
        let mut registry = Registry::new();
        for name in ["one", "two"] {
            let obj = capture_file(&store, &FileSpec { name: name.into(), path: a.clone() }).unwrap();
            registry.insert_file(obj).unwrap();
        }
        registry.remove("one", &store).unwrap();
        assert!(store.has_record(&a, ObjectKind::Content));
        registry.remove("two", &store).unwrap();
        assert!(!store.has_record(&a, ObjectKind::Content));
    }

    #[test]
    fn objects_follow_registration_order() {
        let (dir, store) = setup();
        let bin = touch(dir.path(), "bin");
        let unit = touch(dir.path(), "svc.service");
        let conf = touch(dir.path(), "conf");
        let other = touch(dir.path(), "other");
        let mut registry = Registry::new();
        let spec = ServiceSpec {
            name: "svc".into(),
            binary: bin.clone(),
            unit: unit.clone(),
            config: conf.clone(),
        };
        registry.insert_service(capture_service(&store, &spec).unwrap()).unwrap();
        registry
            .insert_file(capture_file(&store, &FileSpec { name: "other".into(), path: other.clone() }).unwrap())
            .unwrap();

        let paths: Vec<_> = registry.objects().map(|o| o.path().to_path_buf()).collect();
        assert_eq!(paths, vec![bin, unit, conf, other]);
        assert_eq!(registry.object_count(), 4);
        assert_eq!(registry.services()[0].unit_name(), "svc.service");
    }

    #[test]
    fn rejected_service_leaves_no_records() {
        let (dir, store) = setup();
        let spec = ServiceSpec {
            name: "sshd".into(),
            binary: touch(dir.path(), "sshd"),
            unit: touch(dir.path(), "sshd.service"),
            config: dir.path().join("sshd_config"),
        };
        assert!(capture_service(&store, &spec).is_err());
        assert_eq!(fs::read_dir(store.root()).unwrap().count(), 0);

        touch(dir.path(), "sshd_config");
        capture_service(&store, &spec).unwrap();
        assert_eq!(fs::read_dir(store.root()).unwrap().count(), 3);
    }
}
