//! Content Normalizer - Deterministic Self-Healing
//!
//! Passes, in order:
//! 1. Namespace rewrite over every key and string leaf
//! 2. Item repairs (format version, identifier, menu category, icon, display name)
//! 3. Recipe result repair
//! 4. Texture atlas / translation folding into the shared stores
//!
//! Every pass is idempotent: normalizing normalized output changes nothing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::buildlog::BuildLog;
use crate::config::{ForgeConfig, MenuCategoryPolicy};
use crate::identifier::{Identifier, NamespaceRewriter};
use crate::stores::{kind_of, parse_entry, ContentStores};

/// Recoverable per-descriptor failures. The pipeline skips and logs these.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Unsafe path: {0}")]
    UnsafePath(String),

    #[error("Reserved target {0} is managed by the build")]
    ReservedTarget(String),

    #[error("Malformed content in {path}: {reason}")]
    Malformed { path: String, reason: String },
}

impl NormalizeError {
    pub fn rule(&self) -> &'static str {
        match self {
            NormalizeError::UnsafePath(_) => "unsafe_path",
            NormalizeError::ReservedTarget(_) => "reserved_target",
            NormalizeError::Malformed { .. } => "malformed",
        }
    }
}

/// One generator-produced path/content pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDescriptor {
    pub path: String,
    pub content: Value,
}

impl ContentDescriptor {
    pub fn new(path: impl Into<String>, content: Value) -> Self {
        Self {
            path: path.into(),
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedContent {
    /// Structured payload persisted as pretty JSON.
    Json(Value),
    /// Text persisted verbatim.
    Text(String),
    /// Folded entirely into a shared store through side effects.
    Store,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    RegisterTexture(String),
    MergeTextures {
        header: Map<String, Value>,
        data: Map<String, Value>,
    },
    Translation { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub path: PathBuf,
    pub content: NormalizedContent,
    pub side_effects: Vec<SideEffect>,
    pub changed: bool,
}

pub struct Normalizer<'a> {
    config: &'a ForgeConfig,
    rewriter: NamespaceRewriter,
}

impl<'a> Normalizer<'a> {
    pub fn new(config: &'a ForgeConfig) -> Self {
        Self {
            config,
            rewriter: NamespaceRewriter::new(&config.namespace, &config.reserved_namespace),
        }
    }

    pub fn rewriter(&self) -> &NamespaceRewriter {
        &self.rewriter
    }

    /// Top-level key that marks a payload as an item definition.
    pub fn item_marker(&self) -> String {
        reserved_key(&self.config.reserved_namespace, "item")
    }

    pub fn normalize(
        &self,
        descriptor: &ContentDescriptor,
        log: &mut BuildLog,
    ) -> Result<Normalized, NormalizeError> {
        let path = safe_relative_path(&descriptor.path)?;
        let subject = path.display().to_string();

        if path == self.config.behavior_manifest_path() || path == self.config.resource_manifest_path() {
            return Err(NormalizeError::ReservedTarget(subject));
        }
        if path == self.config.texture_atlas_path() {
            return self.fold_texture_atlas(path, &descriptor.content, log);
        }
        if path == self.config.translation_path() {
            return fold_translations(path, &descriptor.content);
        }

        let is_json = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if !is_json {
            return match &descriptor.content {
                Value::String(text) => Ok(Normalized {
                    path,
                    content: NormalizedContent::Text(text.clone()),
                    side_effects: vec![],
                    changed: false,
                }),
                other => Err(malformed(&subject, format!("text file with {} content", kind_of(other)))),
            };
        }
        if !matches!(descriptor.content, Value::Object(_) | Value::Array(_)) {
            return Err(malformed(
                &subject,
                format!("expected an object or array, found {}", kind_of(&descriptor.content)),
            ));
        }

        let original_id = self.declared_identifier(&descriptor.content);
        let (mut payload, mut changed, collisions) = self.rewriter.rewrite_reporting(&descriptor.content);
        if changed {
            log.repair("namespace", &subject, format!("rewrote foreign namespaces to '{}'", self.rewriter.owned()));
        }
        for key in &collisions {
            log.warn("namespace", &subject, format!("sibling keys collapsed onto '{}', later value kept", key));
        }

        let mut side_effects = Vec::new();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        if let Value::Object(root) = &mut payload {
            if root.contains_key(&self.item_marker()) {
                changed |= self.repair_item(root, original_id.as_deref(), &stem, &subject, &mut side_effects, log)?;
            }
            if is_recipe_path(&path) {
                changed |= self.repair_recipe(root, &stem, &subject, log);
            }
        }

        Ok(Normalized {
            path,
            content: NormalizedContent::Json(payload),
            side_effects,
            changed,
        })
    }

    fn declared_identifier(&self, content: &Value) -> Option<String> {
        content
            .get(self.item_marker())?
            .get("description")?
            .get("identifier")?
            .as_str()
            .map(str::to_string)
    }

    fn repair_item(
        &self,
        root: &mut Map<String, Value>,
        original_id: Option<&str>,
        stem: &str,
        subject: &str,
        side_effects: &mut Vec<SideEffect>,
        log: &mut BuildLog,
    ) -> Result<bool, NormalizeError> {
        let reserved = &self.config.reserved_namespace;
        let mut changed = false;

        let format_version = json!(self.config.item_format_version);
        if root.get("format_version") != Some(&format_version) {
            log.repair(
                "format_version",
                subject,
                format!("{} -> {}", root.get("format_version").unwrap_or(&Value::Null), format_version),
            );
            let rest: Map<String, Value> = std::mem::take(root)
                .into_iter()
                .filter(|(key, _)| key != "format_version")
                .collect();
            root.insert("format_version".into(), format_version);
            root.extend(rest);
            changed = true;
        }

        let marker = self.item_marker();
        let item = root
            .get_mut(&marker)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| malformed(subject, format!("'{}' must be an object", marker)))?;

        let description = item
            .entry("description")
            .or_insert_with(|| Value::Object(Map::new()));
        let description = description
            .as_object_mut()
            .ok_or_else(|| malformed(subject, "'description' must be an object"))?;

        let short = original_id
            .or_else(|| description.get("identifier").and_then(Value::as_str))
            .map(|id| Identifier::short_name(id).to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| stem.to_string());
        let final_id = self.rewriter.own(&short);
        if description.get("identifier").and_then(Value::as_str) != Some(final_id.as_str()) {
            description.insert("identifier".into(), json!(final_id));
            changed = true;
        }
        if original_id != Some(final_id.as_str()) {
            log.repair(
                "identifier",
                subject,
                format!("{} -> {}", original_id.unwrap_or("<missing>"), final_id),
            );
        }

        let category = json!({
            "category": self.config.default_menu_category.category,
            "group": self.config.default_menu_category.group,
        });
        let insert_category = match self.config.menu_category_policy {
            MenuCategoryPolicy::InsertIfAbsent => !description.contains_key("menu_category"),
            MenuCategoryPolicy::Overwrite => description.get("menu_category") != Some(&category),
        };
        if insert_category {
            description.insert("menu_category".into(), category);
            log.repair("menu_category", subject, "applied default menu category");
            changed = true;
        }

        let Some(components) = item.get_mut("components").and_then(Value::as_object_mut) else {
            return Ok(changed);
        };

        let icon_key = reserved_key(reserved, "icon");
        if let Some(icon) = components.get_mut(&icon_key) {
            match icon {
                Value::String(key) => side_effects.push(SideEffect::RegisterTexture(key.clone())),
                Value::Object(obj) => match icon_texture(obj) {
                    Some(key) => {
                        log.repair("icon", subject, format!("icon object -> \"{}\"", key));
                        side_effects.push(SideEffect::RegisterTexture(key.clone()));
                        *icon = Value::String(key);
                        changed = true;
                    }
                    None => log.warn("icon", subject, "icon object carries no texture reference"),
                },
                other => log.warn("icon", subject, format!("unsupported icon shape: {}", kind_of(other))),
            }
        }

        let name_key = reserved_key(reserved, "display_name");
        if let Some(display) = components.get_mut(&name_key) {
            let text = match display {
                Value::String(text) => {
                    let text = text.clone();
                    *display = json!({ "value": text });
                    log.repair("display_name", subject, "wrapped display name as structured value");
                    changed = true;
                    Some(text)
                }
                Value::Object(obj) => obj.get("value").and_then(Value::as_str).map(str::to_string),
                _ => None,
            };
            match text {
                Some(value) => side_effects.push(SideEffect::Translation {
                    key: format!("item.{}.name", final_id),
                    value,
                }),
                None => log.warn("display_name", subject, "display name carries no text"),
            }
        }

        Ok(changed)
    }

    fn repair_recipe(
        &self,
        root: &mut Map<String, Value>,
        stem: &str,
        subject: &str,
        log: &mut BuildLog,
    ) -> bool {
        let target = self.rewriter.own(stem);
        let prefix = reserved_key(&self.config.reserved_namespace, "recipe_");
        let mut changed = false;

        for (kind, body) in root.iter_mut() {
            if !kind.starts_with(&prefix) {
                continue;
            }
            let Some(body) = body.as_object_mut() else {
                continue;
            };
            for field in ["result", "output"] {
                let Some(result) = body.get_mut(field) else {
                    continue;
                };
                if let Some(previous) = force_result(result, &target) {
                    log.repair(
                        "recipe_result",
                        subject,
                        format!("{}.{}: {} -> {}", kind, field, previous, target),
                    );
                    changed = true;
                }
            }
        }
        changed
    }

    fn fold_texture_atlas(
        &self,
        path: PathBuf,
        content: &Value,
        log: &mut BuildLog,
    ) -> Result<Normalized, NormalizeError> {
        let subject = path.display().to_string();
        let data = match content.get("texture_data") {
            Some(Value::Object(data)) => data.clone(),
            Some(other) => {
                return Err(malformed(&subject, format!("texture_data is {}", kind_of(other))))
            }
            None => return Err(malformed(&subject, "texture atlas without texture_data")),
        };
        let header = match content {
            Value::Object(root) => root
                .iter()
                .filter(|(key, _)| key.as_str() != "texture_data")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            _ => Map::new(),
        };
        log.info("texture_merge", &subject, format!("{} incoming texture entries", data.len()));
        Ok(Normalized {
            path,
            content: NormalizedContent::Store,
            side_effects: vec![SideEffect::MergeTextures { header, data }],
            changed: false,
        })
    }
}

fn fold_translations(path: PathBuf, content: &Value) -> Result<Normalized, NormalizeError> {
    let Value::String(text) = content else {
        return Err(malformed(
            &path.display().to_string(),
            format!("translation file with {} content", kind_of(content)),
        ));
    };
    let side_effects = text
        .lines()
        .filter_map(|line| parse_entry(line.trim_end_matches('\r')))
        .map(|(key, value)| SideEffect::Translation {
            key: key.to_string(),
            value: value.to_string(),
        })
        .collect();
    Ok(Normalized {
        path,
        content: NormalizedContent::Store,
        side_effects,
        changed: false,
    })
}

/// Apply side effects in order. Returns how many mutated a store.
pub fn apply_side_effects(stores: &mut ContentStores, effects: &[SideEffect], log: &mut BuildLog) -> usize {
    let mut applied = 0;
    for effect in effects {
        let mutated = match effect {
            SideEffect::RegisterTexture(key) => stores.register_texture(key, log),
            SideEffect::MergeTextures { header, data } => stores.merge_textures(header, data, log) > 0,
            SideEffect::Translation { key, value } => stores.add_translation(key, value, log),
        };
        if mutated {
            applied += 1;
        }
    }
    applied
}

/// Reject absolute paths and parent-directory traversal.
pub fn safe_relative_path(raw: &str) -> Result<PathBuf, NormalizeError> {
    let unified = raw.replace('\\', "/");
    if unified.trim().is_empty() {
        return Err(NormalizeError::UnsafePath(raw.to_string()));
    }
    let mut out = PathBuf::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(NormalizeError::UnsafePath(raw.to_string()))
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(NormalizeError::UnsafePath(raw.to_string()));
    }
    Ok(out)
}

fn is_recipe_path(path: &Path) -> bool {
    path.parent()
        .is_some_and(|dir| dir.components().any(|c| c.as_os_str() == "recipes"))
}

fn reserved_key(reserved: &str, name: &str) -> String {
    format!("{}:{}", reserved, name)
}

fn icon_texture(obj: &Map<String, Value>) -> Option<String> {
    if let Some(Value::String(key)) = obj.get("texture") {
        return Some(key.clone());
    }
    match obj.get("textures") {
        Some(Value::String(key)) => Some(key.clone()),
        Some(Value::Object(t)) => t.get("default").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Point a recipe result at `target`. Returns the previous reference when it differed.
fn force_result(result: &mut Value, target: &str) -> Option<String> {
    match result {
        Value::String(current) => {
            if current == target {
                return None;
            }
            let previous = std::mem::replace(current, target.to_string());
            Some(previous)
        }
        Value::Object(obj) => {
            let current = obj.get("item").and_then(Value::as_str);
            if current == Some(target) {
                return None;
            }
            let previous = current.unwrap_or("<missing>").to_string();
            obj.insert("item".into(), json!(target));
            Some(previous)
        }
        Value::Array(entries) => entries.first_mut().and_then(|first| force_result(first, target)),
        _ => None,
    }
}

fn malformed(path: &str, reason: impl Into<String>) -> NormalizeError {
    NormalizeError::Malformed {
        path: path.to_string(),
        reason: reason.into(),
    }
}
