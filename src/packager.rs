//! Packager - Deterministic Archive Assembly
//!
//! Both content trees go into one zip under fixed slot names. The archive is
//! written to a temporary file beside its destination and renamed into place
//! only after it is complete; older archives of the same product are removed
//! right before the rename.

use glob::Pattern;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::buildlog::BuildLog;
use crate::config::ForgeConfig;
use crate::manifest::PackVersion;

/// Top-level archive folder for the behavior tree.
pub const BEHAVIOR_SLOT: &str = "BP";
/// Top-level archive folder for the resource tree.
pub const RESOURCE_SLOT: &str = "RP";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("Content tree missing: {0}")]
    MissingTree(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Failed to walk content tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid archive name pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> PackageError + '_ {
    move |source| PackageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone)]
pub struct PackagedArchive {
    pub path: PathBuf,
    pub file_name: String,
    pub entries: Vec<String>,
    pub removed: Vec<PathBuf>,
}

/// `<product>_v<major>.<minor>.<patch>.<ext>`
pub fn archive_file_name(product_name: &str, version: PackVersion, extension: &str) -> String {
    format!("{}_v{}.{}", product_name, version, extension)
}

pub struct Packager<'a> {
    root: PathBuf,
    config: &'a ForgeConfig,
}

impl<'a> Packager<'a> {
    pub fn new(root: impl Into<PathBuf>, config: &'a ForgeConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.config.output_dir)
    }

    /// Archives in the output directory that belong to `product_name`, any version.
    pub fn existing_archives(&self, product_name: &str) -> Result<Vec<PathBuf>, PackageError> {
        let output_dir = self.output_dir();
        if !output_dir.exists() {
            return Ok(vec![]);
        }
        let pattern = Pattern::new(&format!(
            "{}_v*.{}",
            Pattern::escape(product_name),
            Pattern::escape(&self.config.archive_extension)
        ))?;
        let mut found = Vec::new();
        for entry in fs::read_dir(&output_dir).map_err(io_err(&output_dir))? {
            let entry = entry.map_err(io_err(&output_dir))?;
            let name = entry.file_name();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file && name.to_str().is_some_and(|n| pattern.matches(n)) {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }

    pub fn package(
        &self,
        product_name: &str,
        version: PackVersion,
        log: &mut BuildLog,
    ) -> Result<PackagedArchive, PackageError> {
        let trees = [
            (BEHAVIOR_SLOT, self.root.join(&self.config.behavior_dir)),
            (RESOURCE_SLOT, self.root.join(&self.config.resource_dir)),
        ];
        for (_, tree) in &trees {
            if !tree.is_dir() {
                return Err(PackageError::MissingTree(tree.clone()));
            }
        }

        let output_dir = self.output_dir();
        fs::create_dir_all(&output_dir).map_err(io_err(&output_dir))?;
        let file_name = archive_file_name(product_name, version, &self.config.archive_extension);
        let final_path = output_dir.join(&file_name);

        let mut partial = tempfile::Builder::new()
            .prefix(".addonforge-")
            .suffix(".partial")
            .tempfile_in(&output_dir)
            .map_err(io_err(&output_dir))?;

        let entries = {
            let mut zip = ZipWriter::new(partial.as_file_mut());
            let mut entries = Vec::new();
            for (slot, tree) in &trees {
                add_tree(&mut zip, slot, tree, &mut entries)?;
            }
            zip.finish()?;
            entries
        };

        let removed = self.existing_archives(product_name)?;
        for stale in &removed {
            fs::remove_file(stale).map_err(io_err(stale))?;
            log.info("archive", &stale.display().to_string(), "removed previous archive");
        }

        partial
            .persist(&final_path)
            .map_err(|e| PackageError::Io {
                path: final_path.clone(),
                source: e.error,
            })?;
        log.info(
            "archive",
            &file_name,
            format!("packed {} files for v{}", entries.len(), version),
        );

        Ok(PackagedArchive {
            path: final_path,
            file_name,
            entries,
            removed,
        })
    }
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644)
}

fn add_tree(
    zip: &mut ZipWriter<&mut File>,
    slot: &str,
    tree: &Path,
    entries: &mut Vec<String>,
) -> Result<(), PackageError> {
    for entry in WalkDir::new(tree).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(tree).unwrap_or(entry.path());
        let mut name = String::from(slot);
        for part in relative.components() {
            name.push('/');
            name.push_str(&part.as_os_str().to_string_lossy());
        }

        zip.start_file(name.as_str(), entry_options())?;
        let mut source = File::open(entry.path()).map_err(io_err(entry.path()))?;
        io::copy(&mut source, zip).map_err(io_err(entry.path()))?;
        entries.push(name);
    }
    Ok(())
}
