//! Build Configuration - Enforceable Defaults

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub namespace: String,
    pub reserved_namespace: String,
    pub product_name: String,
    pub archive_extension: String,
    pub behavior_dir: String,
    pub resource_dir: String,
    pub output_dir: String,
    pub item_format_version: String,
    pub manifest_format_version: u32,
    pub min_engine_version: [u32; 3],
    pub default_menu_category: MenuCategory,
    pub menu_category_policy: MenuCategoryPolicy,
    pub corrupt_state: CorruptStatePolicy,
    pub translation_file: String,
    pub texture_atlas_file: String,
    pub texture_prefix: String,
    pub behavior_pack_name: String,
    pub resource_pack_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuCategory {
    pub category: String,
    pub group: String,
}

impl Default for MenuCategory {
    fn default() -> Self {
        Self {
            category: "equipment".to_string(),
            group: "minecraft:itemGroup.name.sword".to_string(),
        }
    }
}

/// What to do when an item already declares a menu category.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MenuCategoryPolicy {
    #[default]
    InsertIfAbsent,
    Overwrite,
}

/// What to do when a persisted manifest or atlas fails to parse.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorruptStatePolicy {
    /// Treat the file as absent and re-initialize it.
    #[default]
    Recover,
    /// Abort the build and leave the file untouched.
    Fail,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            namespace: "factory".to_string(),
            reserved_namespace: "minecraft".to_string(),
            product_name: "FactoryAddon".to_string(),
            archive_extension: "mcaddon".to_string(),
            behavior_dir: "BP".to_string(),
            resource_dir: "RP".to_string(),
            output_dir: ".".to_string(),
            item_format_version: "1.21.0".to_string(),
            manifest_format_version: 2,
            min_engine_version: [1, 21, 0],
            default_menu_category: MenuCategory::default(),
            menu_category_policy: MenuCategoryPolicy::default(),
            corrupt_state: CorruptStatePolicy::default(),
            translation_file: "texts/en_US.lang".to_string(),
            texture_atlas_file: "textures/item_texture.json".to_string(),
            texture_prefix: "textures/items/".to_string(),
            behavior_pack_name: String::new(),
            resource_pack_name: String::new(),
        }
    }
}

impl ForgeConfig {
    /// Load a config file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_namespace_token(&self.namespace) {
            return Err(ConfigError::Invalid(format!(
                "namespace '{}' must be a lowercase identifier token",
                self.namespace
            )));
        }
        if self.namespace == self.reserved_namespace {
            return Err(ConfigError::Invalid(
                "namespace must differ from the reserved namespace".to_string(),
            ));
        }
        if self.product_name.is_empty()
            || self.product_name.contains(['/', '\\'])
            || self.product_name.starts_with('.')
        {
            return Err(ConfigError::Invalid(format!(
                "product name '{}' cannot be used as a file name",
                self.product_name
            )));
        }
        if self.behavior_dir == self.resource_dir {
            return Err(ConfigError::Invalid(
                "behavior and resource trees must live in different directories".to_string(),
            ));
        }
        let output = lexical(&self.output_dir);
        for tree in [&self.behavior_dir, &self.resource_dir] {
            if output.starts_with(lexical(tree)) {
                return Err(ConfigError::Invalid(format!(
                    "output directory '{}' lies inside content tree '{}'",
                    self.output_dir, tree
                )));
            }
        }
        Ok(())
    }

    pub fn behavior_pack_display_name(&self) -> String {
        display_name_or(&self.behavior_pack_name, &self.product_name, "BP")
    }

    pub fn resource_pack_display_name(&self) -> String {
        display_name_or(&self.resource_pack_name, &self.product_name, "RP")
    }

    /// Location of the translation table relative to the project root.
    pub fn translation_path(&self) -> PathBuf {
        Path::new(&self.resource_dir).join(&self.translation_file)
    }

    /// Location of the texture atlas definition relative to the project root.
    pub fn texture_atlas_path(&self) -> PathBuf {
        Path::new(&self.resource_dir).join(&self.texture_atlas_file)
    }

    pub fn behavior_manifest_path(&self) -> PathBuf {
        Path::new(&self.behavior_dir).join("manifest.json")
    }

    pub fn resource_manifest_path(&self) -> PathBuf {
        Path::new(&self.resource_dir).join("manifest.json")
    }
}

fn display_name_or(explicit: &str, product: &str, suffix: &str) -> String {
    if explicit.is_empty() {
        format!("{} {}", product, suffix)
    } else {
        explicit.to_string()
    }
}

/// Path with `.` components dropped, for containment checks.
fn lexical(path: &str) -> PathBuf {
    Path::new(path)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn is_namespace_token(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: ForgeConfig =
            serde_json::from_str(r#"{"namespace": "forge", "corrupt_state": "fail"}"#).unwrap();
        assert_eq!(config.namespace, "forge");
        assert_eq!(config.corrupt_state, CorruptStatePolicy::Fail);
        assert_eq!(config.reserved_namespace, "minecraft");
        assert_eq!(config.menu_category_policy, MenuCategoryPolicy::InsertIfAbsent);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_reserved_namespace() {
        let config = ForgeConfig {
            namespace: "minecraft".to_string(),
            ..ForgeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_product_name_with_separator() {
        let config = ForgeConfig {
            product_name: "../evil".to_string(),
            ..ForgeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_output_dir_inside_content_tree() {
        for output_dir in ["BP", "./RP/dist", "BP/out/"] {
            let config = ForgeConfig {
                output_dir: output_dir.to_string(),
                ..ForgeConfig::default()
            };
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))), "{}", output_dir);
        }
        let sibling = ForgeConfig {
            output_dir: "./dist".to_string(),
            ..ForgeConfig::default()
        };
        assert!(sibling.validate().is_ok());
        assert!(ForgeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_pack_names_follow_product() {
        let config = ForgeConfig::default();
        assert_eq!(config.behavior_pack_display_name(), "FactoryAddon BP");
        assert_eq!(config.resource_pack_display_name(), "FactoryAddon RP");
        assert_eq!(config.translation_path(), Path::new("RP/texts/en_US.lang"));
    }
}
