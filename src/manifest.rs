//! Identity & Version Manager
//!
//! Owns the two pack manifests. Top-level pack uuids are stable across
//! rebuilds; the patch version advances by exactly one per build; the behavior
//! pack always depends on the resource pack's current uuid and version.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::buildlog::BuildLog;
use crate::config::{CorruptStatePolicy, ForgeConfig};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Corrupt manifest {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("I/O error on manifest {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// `[major, minor, patch]` as the platform stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackVersion(pub [u32; 3]);

impl PackVersion {
    pub const INITIAL: PackVersion = PackVersion([1, 0, 0]);

    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self([major, minor, patch])
    }

    pub fn next_patch(self) -> Self {
        let [major, minor, patch] = self.0;
        Self([major, minor, patch.saturating_add(1)])
    }

    pub fn to_semver(self) -> semver::Version {
        let [major, minor, patch] = self.0;
        semver::Version::new(major.into(), minor.into(), patch.into())
    }

    fn from_value(value: &Value) -> Option<Self> {
        let parts = value.as_array()?;
        if parts.len() != 3 {
            return None;
        }
        let mut out = [0u32; 3];
        for (slot, part) in out.iter_mut().zip(parts) {
            *slot = u32::try_from(part.as_u64()?).ok()?;
        }
        Some(Self(out))
    }
}

impl fmt::Display for PackVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_semver())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackKind {
    Behavior,
    Resource,
}

impl PackKind {
    pub fn module_type(self) -> &'static str {
        match self {
            PackKind::Behavior => "data",
            PackKind::Resource => "resources",
        }
    }
}

impl fmt::Display for PackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackKind::Behavior => write!(f, "behavior"),
            PackKind::Resource => write!(f, "resource"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackManifest {
    pub format_version: u32,
    pub header: ManifestHeader,
    pub modules: Vec<ManifestModule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ManifestDependency>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestHeader {
    pub name: String,
    pub description: String,
    pub uuid: Uuid,
    pub version: PackVersion,
    pub min_engine_version: [u32; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestModule {
    #[serde(rename = "type")]
    pub module_type: String,
    pub uuid: Uuid,
    pub version: PackVersion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestDependency {
    pub uuid: Uuid,
    pub version: PackVersion,
}

/// What survived from a manifest already on disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorIdentity {
    pub uuid: Option<Uuid>,
    pub version: Option<PackVersion>,
    pub modules: Vec<(String, Uuid)>,
}

impl PriorIdentity {
    fn from_value(value: &Value) -> Result<Self, String> {
        let header = value
            .get("header")
            .ok_or_else(|| "missing header".to_string())?;
        let uuid = header
            .get("uuid")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing header.uuid".to_string())?;
        let uuid = Uuid::parse_str(uuid).map_err(|e| format!("header.uuid: {}", e))?;
        let version = header
            .get("version")
            .and_then(PackVersion::from_value)
            .ok_or_else(|| "header.version is not [int, int, int]".to_string())?;

        let modules = value
            .get("modules")
            .and_then(Value::as_array)
            .map(|mods| {
                mods.iter()
                    .filter_map(|m| {
                        let kind = m.get("type")?.as_str()?;
                        let id = Uuid::parse_str(m.get("uuid")?.as_str()?).ok()?;
                        Some((kind.to_string(), id))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            uuid: Some(uuid),
            version: Some(version),
            modules,
        })
    }

    pub fn next_version(&self) -> PackVersion {
        self.version.map_or(PackVersion::INITIAL, PackVersion::next_patch)
    }

    fn module_uuid(&self, module_type: &str) -> Option<Uuid> {
        self.modules
            .iter()
            .find(|(kind, _)| kind == module_type)
            .map(|(_, id)| *id)
    }
}

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSync {
    pub version: PackVersion,
    pub behavior: PackManifest,
    pub resource: PackManifest,
}

/// Raw bytes of both manifests, for rollback when a later stage fails.
#[derive(Debug, Clone)]
pub struct ManifestSnapshot {
    files: Vec<(PathBuf, Option<Vec<u8>>)>,
}

impl ManifestSnapshot {
    /// Put every manifest back. Keeps going past a failed file and reports the first error.
    pub fn restore(&self) -> Result<(), ManifestError> {
        let mut first_error = None;
        for (path, bytes) in &self.files {
            let result = match bytes {
                Some(bytes) => fs::write(path, bytes),
                None if path.is_file() => fs::remove_file(path),
                None => Ok(()),
            };
            if let Err(source) = result {
                first_error.get_or_insert(ManifestError::Io {
                    path: path.clone(),
                    source,
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

pub struct ManifestManager<'a> {
    root: PathBuf,
    config: &'a ForgeConfig,
}

impl<'a> ManifestManager<'a> {
    pub fn new(root: impl Into<PathBuf>, config: &'a ForgeConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn manifest_path(&self, kind: PackKind) -> PathBuf {
        match kind {
            PackKind::Behavior => self.root.join(self.config.behavior_manifest_path()),
            PackKind::Resource => self.root.join(self.config.resource_manifest_path()),
        }
    }

    pub fn snapshot(&self) -> Result<ManifestSnapshot, ManifestError> {
        let mut files = Vec::new();
        for kind in [PackKind::Behavior, PackKind::Resource] {
            let path = self.manifest_path(kind);
            let bytes = if path.exists() {
                Some(fs::read(&path).map_err(|source| ManifestError::Io {
                    path: path.clone(),
                    source,
                })?)
            } else {
                None
            };
            files.push((path, bytes));
        }
        Ok(ManifestSnapshot { files })
    }

    /// Read whatever identity a manifest on disk still carries.
    pub fn read_prior(&self, kind: PackKind, log: &mut BuildLog) -> Result<PriorIdentity, ManifestError> {
        let path = self.manifest_path(kind);
        if !path.exists() {
            return Ok(PriorIdentity::default());
        }
        let parsed = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()))
            .and_then(|value| PriorIdentity::from_value(&value));

        match parsed {
            Ok(prior) => Ok(prior),
            Err(reason) => match self.config.corrupt_state {
                CorruptStatePolicy::Recover => {
                    log.warn(
                        "corrupt_state",
                        &path.display().to_string(),
                        format!("{} manifest unreadable ({}), issuing fresh identity", kind, reason),
                    );
                    Ok(PriorIdentity::default())
                }
                CorruptStatePolicy::Fail => Err(ManifestError::Corrupt { path, reason }),
            },
        }
    }

    /// Rewrite both manifests and return the shared version.
    pub fn synchronize(&self, log: &mut BuildLog) -> Result<ManifestSync, ManifestError> {
        let prior_resource = self.read_prior(PackKind::Resource, log)?;
        let prior_behavior = self.read_prior(PackKind::Behavior, log)?;

        let version = prior_resource.next_version();
        let behavior_version = prior_behavior.next_version();
        if behavior_version != version {
            log.repair(
                "version",
                "manifest",
                format!("behavior pack would be {}, aligned to resource pack {}", behavior_version, version),
            );
        }

        let resource = self.build_manifest(PackKind::Resource, &prior_resource, version, None, log);
        let dependency = ManifestDependency {
            uuid: resource.header.uuid,
            version,
        };
        let behavior = self.build_manifest(PackKind::Behavior, &prior_behavior, version, Some(dependency), log);

        let resource_body = serde_json::to_string_pretty(&resource)?;
        let behavior_body = serde_json::to_string_pretty(&behavior)?;
        let snapshot = self.snapshot()?;
        let written = write_manifest(&self.manifest_path(PackKind::Resource), resource_body.as_bytes())
            .and_then(|_| write_manifest(&self.manifest_path(PackKind::Behavior), behavior_body.as_bytes()));
        if let Err(e) = written {
            log.error("manifest", format!("manifest write failed, restoring previous state: {}", e));
            if let Err(restore) = snapshot.restore() {
                log.error("manifest", format!("rollback failed: {}", restore));
            }
            return Err(e);
        }
        log.info("version", "manifest", format!("both packs at {}", version));

        Ok(ManifestSync {
            version,
            behavior,
            resource,
        })
    }

    fn build_manifest(
        &self,
        kind: PackKind,
        prior: &PriorIdentity,
        version: PackVersion,
        dependency: Option<ManifestDependency>,
        log: &mut BuildLog,
    ) -> PackManifest {
        let uuid = match prior.uuid {
            Some(uuid) => uuid,
            None => {
                let fresh = Uuid::new_v4();
                log.info("identity", &kind.to_string(), format!("issued new pack uuid {}", fresh));
                fresh
            }
        };
        let module_type = kind.module_type();
        let module_uuid = prior.module_uuid(module_type).unwrap_or_else(Uuid::new_v4);
        let name = match kind {
            PackKind::Behavior => self.config.behavior_pack_display_name(),
            PackKind::Resource => self.config.resource_pack_display_name(),
        };

        PackManifest {
            format_version: self.config.manifest_format_version,
            header: ManifestHeader {
                name,
                description: format!("Auto-generated v{}", version),
                uuid,
                version,
                min_engine_version: self.config.min_engine_version,
            },
            modules: vec![ManifestModule {
                module_type: module_type.to_string(),
                uuid: module_uuid,
                version,
            }],
            dependencies: dependency.into_iter().collect(),
        }
    }

}

fn write_manifest(path: &Path, bytes: &[u8]) -> Result<(), ManifestError> {
    let io = |source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io)?;
    }
    fs::write(path, bytes).map_err(io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read(path: &Path) -> PackManifest {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_version_display_and_bump() {
        assert_eq!(PackVersion::INITIAL.to_string(), "1.0.0");
        assert_eq!(PackVersion::new(1, 0, 9).next_patch(), PackVersion::new(1, 0, 10));
        assert_eq!(serde_json::to_string(&PackVersion::new(1, 2, 3)).unwrap(), "[1,2,3]");
    }

    #[test]
    fn test_first_sync_creates_linked_manifests() {
        let dir = TempDir::new().unwrap();
        let config = ForgeConfig::default();
        let manager = ManifestManager::new(dir.path(), &config);
        let mut log = BuildLog::new();

        let sync = manager.synchronize(&mut log).unwrap();
        assert_eq!(sync.version, PackVersion::INITIAL);

        let bp = read(&manager.manifest_path(PackKind::Behavior));
        let rp = read(&manager.manifest_path(PackKind::Resource));
        assert_eq!(bp.header.version, rp.header.version);
        assert_eq!(bp.dependencies.len(), 1);
        assert_eq!(bp.dependencies[0].uuid, rp.header.uuid);
        assert_eq!(bp.dependencies[0].version, rp.header.version);
        assert!(rp.dependencies.is_empty());
        assert_eq!(bp.modules[0].module_type, "data");
        assert_eq!(rp.modules[0].module_type, "resources");
        assert_ne!(bp.header.uuid, rp.header.uuid);
    }

    #[test]
    fn test_repeated_sync_keeps_uuid_and_steps_patch() {
        let dir = TempDir::new().unwrap();
        let config = ForgeConfig::default();
        let manager = ManifestManager::new(dir.path(), &config);
        let mut log = BuildLog::new();

        let first = manager.synchronize(&mut log).unwrap();
        for step in 1..=3u32 {
            let next = manager.synchronize(&mut log).unwrap();
            assert_eq!(next.version, PackVersion::new(1, 0, step));
            assert_eq!(next.behavior.header.uuid, first.behavior.header.uuid);
            assert_eq!(next.resource.header.uuid, first.resource.header.uuid);
            assert_eq!(next.resource.modules[0].uuid, first.resource.modules[0].uuid);
            assert_eq!(next.behavior.dependencies[0].version, next.version);
        }
    }

    #[test]
    fn test_resource_version_is_authoritative() {
        let dir = TempDir::new().unwrap();
        let config = ForgeConfig::default();
        let manager = ManifestManager::new(dir.path(), &config);
        let mut log = BuildLog::new();
        manager.synchronize(&mut log).unwrap();

        let bp_path = manager.manifest_path(PackKind::Behavior);
        let mut bp = read(&bp_path);
        bp.header.version = PackVersion::new(4, 0, 0);
        fs::write(&bp_path, serde_json::to_string(&bp).unwrap()).unwrap();

        let sync = manager.synchronize(&mut log).unwrap();
        assert_eq!(sync.version, PackVersion::new(1, 0, 1));
        assert_eq!(sync.behavior.header.version, PackVersion::new(1, 0, 1));
        assert_eq!(sync.behavior.header.uuid, bp.header.uuid);
        assert_eq!(log.count_rule("version"), 3);
    }

    #[test]
    fn test_stale_dependency_is_replaced() {
        let dir = TempDir::new().unwrap();
        let config = ForgeConfig::default();
        let manager = ManifestManager::new(dir.path(), &config);
        let mut log = BuildLog::new();
        manager.synchronize(&mut log).unwrap();

        let bp_path = manager.manifest_path(PackKind::Behavior);
        let mut bp = read(&bp_path);
        bp.dependencies = vec![
            ManifestDependency { uuid: Uuid::new_v4(), version: PackVersion::INITIAL },
            ManifestDependency { uuid: Uuid::new_v4(), version: PackVersion::INITIAL },
        ];
        fs::write(&bp_path, serde_json::to_string(&bp).unwrap()).unwrap();

        let sync = manager.synchronize(&mut log).unwrap();
        assert_eq!(
            sync.behavior.dependencies,
            vec![ManifestDependency { uuid: sync.resource.header.uuid, version: sync.version }]
        );
    }

    #[test]
    fn test_corrupt_manifest_policy() {
        let dir = TempDir::new().unwrap();
        let config = ForgeConfig::default();
        let manager = ManifestManager::new(dir.path(), &config);
        let rp_path = manager.manifest_path(PackKind::Resource);
        fs::create_dir_all(rp_path.parent().unwrap()).unwrap();
        fs::write(&rp_path, "{\"header\": {\"uuid\": \"not-a-uuid\"").unwrap();

        let strict_config = ForgeConfig {
            corrupt_state: CorruptStatePolicy::Fail,
            ..ForgeConfig::default()
        };
        let strict = ManifestManager::new(dir.path(), &strict_config);
        let mut log = BuildLog::new();
        assert!(matches!(strict.synchronize(&mut log), Err(ManifestError::Corrupt { .. })));
        assert!(!strict.manifest_path(PackKind::Behavior).exists());

        let sync = manager.synchronize(&mut log).unwrap();
        assert_eq!(sync.version, PackVersion::INITIAL);
        assert_eq!(log.count_rule("corrupt_state"), 1);
    }

    #[test]
    fn test_snapshot_restore() {
        let dir = TempDir::new().unwrap();
        let config = ForgeConfig::default();
        let manager = ManifestManager::new(dir.path(), &config);
        let mut log = BuildLog::new();

        let empty = manager.snapshot().unwrap();
        manager.synchronize(&mut log).unwrap();
        empty.restore().unwrap();
        assert!(!manager.manifest_path(PackKind::Resource).exists());

        manager.synchronize(&mut log).unwrap();
        let before = fs::read(manager.manifest_path(PackKind::Resource)).unwrap();
        let snapshot = manager.snapshot().unwrap();
        manager.synchronize(&mut log).unwrap();
        snapshot.restore().unwrap();
        assert_eq!(fs::read(manager.manifest_path(PackKind::Resource)).unwrap(), before);
    }

    #[test]
    fn test_failed_behavior_write_keeps_resource_version() {
        let dir = TempDir::new().unwrap();
        let config = ForgeConfig::default();
        let manager = ManifestManager::new(dir.path(), &config);
        let mut log = BuildLog::new();

        manager.synchronize(&mut log).unwrap();
        let before = fs::read(manager.manifest_path(PackKind::Resource)).unwrap();
        fs::remove_dir_all(dir.path().join("BP")).unwrap();
        fs::write(dir.path().join("BP"), "blocked").unwrap();

        assert!(manager.synchronize(&mut log).is_err());
        assert!(log.has_errors());
        assert_eq!(fs::read(manager.manifest_path(PackKind::Resource)).unwrap(), before);
        assert_eq!(
            read(&manager.manifest_path(PackKind::Resource)).header.version,
            PackVersion::INITIAL
        );
    }
}
