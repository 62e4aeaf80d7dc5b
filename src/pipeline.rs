//! Build Pipeline - Single Entry Point
//!
//! generator output -> normalizer -> filesystem -> manifests -> archive.
//! A build either fully succeeds or leaves manifests as they were.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::buildlog::BuildLog;
use crate::config::{ConfigError, ForgeConfig};
use crate::generator::{parse_response, Generator, GeneratorError};
use crate::hashing::sha256_file;
use crate::manifest::{ManifestError, ManifestManager, PackVersion};
use crate::normalize::{
    apply_side_effects, ContentDescriptor, Normalized, NormalizedContent, Normalizer,
};
use crate::packager::{PackageError, PackagedArchive, Packager};
use crate::stores::{write_file, ContentStores, StoreError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("No usable descriptors: {0} received, all skipped")]
    NoUsableDescriptors(usize),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Packaging failed: {0}")]
    Package(#[from] PackageError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to walk content tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub version: PackVersion,
    pub archive: PathBuf,
    pub archive_sha256: String,
    pub written: Vec<PathBuf>,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub scanned: usize,
    pub rewritten: Vec<PathBuf>,
    pub failed: usize,
}

/// The build pipeline - one project root, one configuration.
pub struct BuildPipeline {
    root: PathBuf,
    config: ForgeConfig,
}

impl BuildPipeline {
    pub fn new(root: impl Into<PathBuf>, config: ForgeConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            root: root.into(),
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    /// Ask the generator, then build from whatever it returned.
    pub fn build_with(
        &self,
        generator: &dyn Generator,
        task: &str,
        rules: &str,
        log: &mut BuildLog,
    ) -> Result<BuildReport, PipelineError> {
        let text = generator.generate(task, rules)?;
        self.build_from_response(&text, log)
    }

    pub fn build_from_response(&self, text: &str, log: &mut BuildLog) -> Result<BuildReport, PipelineError> {
        let descriptors = parse_response(text, &self.config, log)?;
        self.build(&descriptors, log)
    }

    /// Normalize, persist, synchronize manifests and package.
    pub fn build(
        &self,
        descriptors: &[ContentDescriptor],
        log: &mut BuildLog,
    ) -> Result<BuildReport, PipelineError> {
        let normalizer = Normalizer::new(&self.config);
        let mut stores = ContentStores::load(&self.root, &self.config, log)?;

        let mut staged: Vec<Normalized> = Vec::with_capacity(descriptors.len());
        let mut skipped = 0;
        for descriptor in descriptors {
            match normalizer.normalize(descriptor, log) {
                Ok(normalized) => {
                    apply_side_effects(&mut stores, &normalized.side_effects, log);
                    staged.push(normalized);
                }
                Err(e) => {
                    log.warn(e.rule(), &descriptor.path, format!("skipped: {}", e));
                    skipped += 1;
                }
            }
        }
        if staged.is_empty() {
            log.error("batch", format!("none of {} descriptors survived normalization", descriptors.len()));
            return Err(PipelineError::NoUsableDescriptors(descriptors.len()));
        }

        let mut written = Vec::new();
        for normalized in &staged {
            if self.persist(normalized)? {
                written.push(normalized.path.clone());
            }
        }
        written.extend(stores.flush()?);

        let (version, archive) = self.synchronize_and_package(log)?;
        let archive_sha256 = sha256_file(&archive.path).map_err(|source| PipelineError::Io {
            path: archive.path.clone(),
            source,
        })?;

        Ok(BuildReport {
            version,
            archive: archive.path,
            archive_sha256,
            written,
            skipped,
        })
    }

    /// Synchronize manifests, then package; roll manifests back if packaging fails.
    pub fn synchronize_and_package(
        &self,
        log: &mut BuildLog,
    ) -> Result<(PackVersion, PackagedArchive), PipelineError> {
        let manager = ManifestManager::new(&self.root, &self.config);
        let snapshot = manager.snapshot()?;
        let sync = match manager.synchronize(log) {
            Ok(sync) => sync,
            Err(e) => {
                if let Err(restore) = snapshot.restore() {
                    log.error("manifest", format!("rollback failed: {}", restore));
                }
                return Err(e.into());
            }
        };

        let packager = Packager::new(&self.root, &self.config);
        match packager.package(&self.config.product_name, sync.version, log) {
            Ok(archive) => Ok((sync.version, archive)),
            Err(e) => {
                log.error("archive", format!("packaging failed: {}", e));
                if let Err(restore) = snapshot.restore() {
                    log.error("manifest", format!("rollback failed: {}", restore));
                }
                Err(e.into())
            }
        }
    }

    /// Re-run the normalizer over every JSON file already in both trees.
    pub fn repair_tree(&self, log: &mut BuildLog) -> Result<RepairReport, PipelineError> {
        let normalizer = Normalizer::new(&self.config);
        let mut stores = ContentStores::load(&self.root, &self.config, log)?;
        let skip: Vec<PathBuf> = vec![
            self.config.behavior_manifest_path(),
            self.config.resource_manifest_path(),
            self.config.texture_atlas_path(),
        ];

        let mut scanned = 0;
        let mut failed = 0;
        let mut rewritten = Vec::new();
        for tree in [&self.config.behavior_dir, &self.config.resource_dir] {
            let tree_root = self.root.join(tree);
            if !tree_root.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&tree_root).sort_by_file_name() {
                let entry = entry?;
                let is_json = entry.path().extension().is_some_and(|e| e == "json");
                if !entry.file_type().is_file() || !is_json {
                    continue;
                }
                let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path()).to_path_buf();
                if skip.contains(&relative) {
                    continue;
                }
                scanned += 1;

                let subject = relative.display().to_string();
                let content = match fs::read_to_string(entry.path())
                    .map_err(|e| e.to_string())
                    .and_then(|t| serde_json::from_str::<serde_json::Value>(&t).map_err(|e| e.to_string()))
                {
                    Ok(content) => content,
                    Err(reason) => {
                        log.warn("malformed", &subject, format!("unreadable: {}", reason));
                        failed += 1;
                        continue;
                    }
                };

                let descriptor = ContentDescriptor::new(relative_str(&relative), content);
                match normalizer.normalize(&descriptor, log) {
                    Ok(normalized) => {
                        apply_side_effects(&mut stores, &normalized.side_effects, log);
                        if normalized.changed {
                            self.persist(&normalized)?;
                            rewritten.push(normalized.path);
                        }
                    }
                    Err(e) => {
                        log.warn(e.rule(), &subject, format!("left untouched: {}", e));
                        failed += 1;
                    }
                }
            }
        }
        rewritten.extend(stores.flush()?);

        Ok(RepairReport {
            scanned,
            rewritten,
            failed,
        })
    }

    /// Write a normalized file. Returns `false` when the content lives in a store.
    fn persist(&self, normalized: &Normalized) -> Result<bool, PipelineError> {
        let target = self.root.join(&normalized.path);
        match &normalized.content {
            NormalizedContent::Json(value) => {
                let body = serde_json::to_string_pretty(value)?;
                write_file(&target, body.as_bytes())?;
                Ok(true)
            }
            NormalizedContent::Text(text) => {
                write_file(&target, text.as_bytes())?;
                Ok(true)
            }
            NormalizedContent::Store => Ok(false),
        }
    }
}

fn relative_str(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir) -> BuildPipeline {
        BuildPipeline::new(dir.path(), ForgeConfig::default()).unwrap()
    }

    #[test]
    fn test_all_skipped_is_fatal_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut log = BuildLog::new();
        let descriptors = vec![
            ContentDescriptor::new("../escape.json", json!({})),
            ContentDescriptor::new("BP/items/x.json", json!("text")),
        ];
        let err = pipeline(&dir).build(&descriptors, &mut log).unwrap_err();
        assert!(matches!(err, PipelineError::NoUsableDescriptors(2)));
        assert!(log.has_errors());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_later_descriptors_see_earlier_side_effects() {
        let dir = TempDir::new().unwrap();
        let mut log = BuildLog::new();
        let descriptors = vec![
            ContentDescriptor::new(
                "RP/textures/item_texture.json",
                json!({"texture_data": {"gem": {"textures": "textures/items/custom_gem"}}}),
            ),
            ContentDescriptor::new(
                "BP/items/gem.json",
                json!({"minecraft:item": {"description": {"identifier": "x:gem"},
                       "components": {"minecraft:icon": "gem"}}}),
            ),
        ];
        pipeline(&dir).build(&descriptors, &mut log).unwrap();
        let atlas: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("RP/textures/item_texture.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(atlas["texture_data"]["gem"]["textures"], "textures/items/custom_gem");
    }

    #[test]
    fn test_failed_manifest_sync_leaves_versions_untouched() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir);
        let mut log = BuildLog::new();
        let sword = ContentDescriptor::new(
            "BP/items/sword.json",
            json!({"minecraft:item": {"description": {"identifier": "x:sword"}, "components": {}}}),
        );
        p.build(&[sword.clone()], &mut log).unwrap();
        let rp_manifest = dir.path().join("RP/manifest.json");
        let before = fs::read(&rp_manifest).unwrap();

        let bp = dir.path().join("BP");
        fs::remove_dir_all(&bp).unwrap();
        fs::write(&bp, "not a directory").unwrap();
        assert!(p.synchronize_and_package(&mut log).is_err());
        assert_eq!(fs::read(&rp_manifest).unwrap(), before);

        fs::remove_file(&bp).unwrap();
        let report = p.build(&[sword], &mut log).unwrap();
        assert_eq!(report.version, PackVersion::new(1, 0, 1));
    }

    #[test]
    fn test_supplied_atlas_header_kept_on_first_build() {
        let dir = TempDir::new().unwrap();
        let mut log = BuildLog::new();
        let descriptors = vec![ContentDescriptor::new(
            "RP/textures/item_texture.json",
            json!({
                "resource_pack_name": "Obsidian Pack",
                "texture_name": "atlas.items",
                "texture_data": {"gem": {"textures": "textures/items/gem"}}
            }),
        )];
        pipeline(&dir).build(&descriptors, &mut log).unwrap();
        let atlas: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("RP/textures/item_texture.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(atlas["resource_pack_name"], "Obsidian Pack");
        assert_eq!(atlas["texture_data"]["gem"]["textures"], "textures/items/gem");
    }

    #[test]
    fn test_repair_tree_fixes_existing_files() {
        let dir = TempDir::new().unwrap();
        let recipe = dir.path().join("BP/recipes/ruby_block.json");
        fs::create_dir_all(recipe.parent().unwrap()).unwrap();
        fs::write(
            &recipe,
            r#"{"minecraft:recipe_shapeless": {"description": {"identifier": "foo:r"}, "result": {"item": "foo:wrong"}}}"#,
        )
        .unwrap();
        let item = dir.path().join("BP/items/ruby.json");
        fs::create_dir_all(item.parent().unwrap()).unwrap();
        fs::write(
            &item,
            r#"{"minecraft:item": {"description": {"identifier": "foo:ruby"}, "components": {"minecraft:display_name": {"value": "Ruby"}}}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("BP/items/broken.json"), "{ nope").unwrap();

        let p = pipeline(&dir);
        let mut log = BuildLog::new();
        let report = p.repair_tree(&mut log).unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.failed, 1);

        let fixed: serde_json::Value = serde_json::from_str(&fs::read_to_string(&recipe).unwrap()).unwrap();
        assert_eq!(fixed["minecraft:recipe_shapeless"]["result"]["item"], "factory:ruby_block");
        let lang = fs::read_to_string(dir.path().join("RP/texts/en_US.lang")).unwrap();
        assert_eq!(lang, "item.factory:ruby.name=Ruby\n");

        let again = p.repair_tree(&mut log).unwrap();
        assert!(again.rewritten.is_empty());
    }
}
