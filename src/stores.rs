//! Side-Effect Stores - Texture Atlas and Translation Table
//!
//! Both stores are append-only. Registering something that already exists
//! is a no-op and reports `false`.

use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::buildlog::BuildLog;
use crate::config::{CorruptStatePolicy, ForgeConfig};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Corrupt store {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// The shared `item_texture.json` registry.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureAtlas {
    header: Map<String, Value>,
    data: Map<String, Value>,
    /// Header holds generated defaults, not anything read or supplied.
    fresh: bool,
}

impl TextureAtlas {
    pub fn new(resource_pack_name: &str) -> Self {
        let mut header = Map::new();
        header.insert("resource_pack_name".into(), json!(resource_pack_name));
        header.insert("texture_name".into(), json!("atlas.items"));
        Self {
            header,
            data: Map::new(),
            fresh: true,
        }
    }

    /// Parse an existing atlas document.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let mut header = match value {
            Value::Object(map) => map,
            other => return Err(format!("expected an object, found {}", kind_of(&other))),
        };
        let data = match header.remove("texture_data") {
            None => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(format!("texture_data must be an object, found {}", kind_of(&other)))
            }
        };
        Ok(Self {
            header,
            data,
            fresh: false,
        })
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Insert `key -> {textures: path}` unless `key` is already registered.
    pub fn register(&mut self, key: &str, texture_path: &str) -> bool {
        if self.data.contains_key(key) {
            return false;
        }
        self.data
            .insert(key.to_string(), json!({ "textures": texture_path }));
        true
    }

    /// Union-update with a generator-supplied `texture_data` map.
    ///
    /// Keys present in `incoming` take the incoming value. Nothing is removed.
    /// Returns the keys whose value changed.
    pub fn merge(&mut self, incoming: &Map<String, Value>) -> Vec<String> {
        let mut changed = Vec::new();
        for (key, value) in incoming {
            if self.data.get(key) != Some(value) {
                self.data.insert(key.clone(), value.clone());
                changed.push(key.clone());
            }
        }
        changed
    }

    pub fn header(&self) -> &Map<String, Value> {
        &self.header
    }

    /// Adopt top-level fields from a generator-supplied atlas.
    ///
    /// A fresh atlas takes the incoming header as given. An atlas read from
    /// disk only gains the fields it lacks. Returns the keys that changed.
    pub fn merge_header(&mut self, incoming: &Map<String, Value>) -> Vec<String> {
        let mut changed = Vec::new();
        for (key, value) in incoming {
            if key == "texture_data" {
                continue;
            }
            let adopt = match self.header.get(key) {
                None => true,
                Some(existing) => self.fresh && existing != value,
            };
            if adopt {
                self.header.insert(key.clone(), value.clone());
                changed.push(key.clone());
            }
        }
        if !incoming.is_empty() {
            self.fresh = false;
        }
        changed
    }

    pub fn to_value(&self) -> Value {
        let mut root = self.header.clone();
        root.insert("texture_data".into(), Value::Object(self.data.clone()));
        Value::Object(root)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum LangLine {
    Entry { key: String, value: String },
    Verbatim(String),
}

/// The `key=value` translation file. Comments and blank lines are kept as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslationTable {
    lines: Vec<LangLine>,
    keys: HashSet<String>,
}

impl TranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut table = Self::new();
        for raw in text.lines() {
            let line = raw.trim_end_matches('\r');
            match parse_entry(line) {
                Some((key, value)) if !table.keys.contains(key) => {
                    table.keys.insert(key.to_string());
                    table.lines.push(LangLine::Entry {
                        key: key.to_string(),
                        value: value.to_string(),
                    });
                }
                Some(_) => {}
                None => table.lines.push(LangLine::Verbatim(line.to_string())),
            }
        }
        while matches!(table.lines.last(), Some(LangLine::Verbatim(l)) if l.is_empty()) {
            table.lines.pop();
        }
        table
    }

    /// Append `key=value` unless the key exists.
    pub fn insert(&mut self, key: &str, value: &str) -> bool {
        if self.keys.contains(key) {
            return false;
        }
        let value = value.replace(['\r', '\n'], " ");
        self.keys.insert(key.to_string());
        self.lines.push(LangLine::Entry {
            key: key.to_string(),
            value,
        });
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|l| match l {
            LangLine::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().filter_map(|l| match l {
            LangLine::Entry { key, value } => Some((key.as_str(), value.as_str())),
            LangLine::Verbatim(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                LangLine::Entry { key, value } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(value);
                }
                LangLine::Verbatim(text) => out.push_str(text),
            }
            out.push('\n');
        }
        out
    }
}

/// Split a lang line into key and value. Comments start with `##`.
pub fn parse_entry(line: &str) -> Option<(&str, &str)> {
    if line.trim_start().starts_with("##") {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value))
}

/// Both stores, loaded once per build and flushed after all descriptors.
#[derive(Debug)]
pub struct ContentStores {
    root: PathBuf,
    atlas_path: PathBuf,
    lang_path: PathBuf,
    texture_prefix: String,
    pub atlas: TextureAtlas,
    pub translations: TranslationTable,
    atlas_dirty: bool,
    lang_dirty: bool,
}

impl ContentStores {
    pub fn load(root: &Path, config: &ForgeConfig, log: &mut BuildLog) -> Result<Self, StoreError> {
        let atlas_path = config.texture_atlas_path();
        let lang_path = config.translation_path();

        let atlas = load_atlas(&root.join(&atlas_path), config, log)?;
        let full_lang = root.join(&lang_path);
        let translations = if full_lang.exists() {
            let text = fs::read_to_string(&full_lang).map_err(io_err(&full_lang))?;
            TranslationTable::parse(&text)
        } else {
            TranslationTable::new()
        };

        Ok(Self {
            root: root.to_path_buf(),
            atlas_path,
            lang_path,
            texture_prefix: config.texture_prefix.clone(),
            atlas,
            translations,
            atlas_dirty: false,
            lang_dirty: false,
        })
    }

    pub fn atlas_path(&self) -> &Path {
        &self.atlas_path
    }

    pub fn translation_path(&self) -> &Path {
        &self.lang_path
    }

    /// Register an icon key under the configured texture prefix.
    pub fn register_texture(&mut self, key: &str, log: &mut BuildLog) -> bool {
        let texture_path = format!("{}{}", self.texture_prefix, key);
        let added = self.atlas.register(key, &texture_path);
        if added {
            self.atlas_dirty = true;
            log.repair("texture", key, format!("registered {} -> {}", key, texture_path));
        }
        added
    }

    pub fn merge_textures(
        &mut self,
        header: &Map<String, Value>,
        incoming: &Map<String, Value>,
        log: &mut BuildLog,
    ) -> usize {
        let adopted = self.atlas.merge_header(header);
        if !adopted.is_empty() {
            self.atlas_dirty = true;
            log.info(
                "texture_merge",
                &self.atlas_path.display().to_string(),
                format!("atlas header fields: {}", adopted.join(", ")),
            );
        }
        let changed = self.atlas.merge(incoming);
        if !changed.is_empty() {
            self.atlas_dirty = true;
            log.repair(
                "texture_merge",
                &self.atlas_path.display().to_string(),
                format!("merged {} texture entries", changed.len()),
            );
        }
        adopted.len() + changed.len()
    }

    pub fn add_translation(&mut self, key: &str, value: &str, log: &mut BuildLog) -> bool {
        let added = self.translations.insert(key, value);
        if added {
            self.lang_dirty = true;
            log.repair("translation", key, format!("{}={}", key, value));
        }
        added
    }

    pub fn is_dirty(&self) -> bool {
        self.atlas_dirty || self.lang_dirty
    }

    /// Write whichever stores changed.
    pub fn flush(&mut self) -> Result<Vec<PathBuf>, StoreError> {
        let mut written = Vec::new();
        if self.atlas_dirty {
            let path = self.root.join(&self.atlas_path);
            let body = serde_json::to_string_pretty(&self.atlas.to_value())?;
            write_file(&path, body.as_bytes())?;
            written.push(self.atlas_path.clone());
            self.atlas_dirty = false;
        }
        if self.lang_dirty {
            let path = self.root.join(&self.lang_path);
            write_file(&path, self.translations.render().as_bytes())?;
            written.push(self.lang_path.clone());
            self.lang_dirty = false;
        }
        Ok(written)
    }
}

fn load_atlas(path: &Path, config: &ForgeConfig, log: &mut BuildLog) -> Result<TextureAtlas, StoreError> {
    if !path.exists() {
        return Ok(TextureAtlas::new(&config.namespace));
    }
    let text = fs::read_to_string(path).map_err(io_err(path))?;
    let parsed = serde_json::from_str::<Value>(&text)
        .map_err(|e| e.to_string())
        .and_then(TextureAtlas::from_value);
    match parsed {
        Ok(atlas) => Ok(atlas),
        Err(reason) => match config.corrupt_state {
            CorruptStatePolicy::Recover => {
                log.warn(
                    "corrupt_state",
                    &path.display().to_string(),
                    format!("texture atlas unreadable ({}), starting fresh", reason),
                );
                Ok(TextureAtlas::new(&config.namespace))
            }
            CorruptStatePolicy::Fail => Err(StoreError::Corrupt {
                path: path.to_path_buf(),
                reason,
            }),
        },
    }
}

pub(crate) fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    fs::write(path, bytes).map_err(io_err(path))
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_register_texture_twice_keeps_original() {
        let mut atlas = TextureAtlas::new("factory");
        assert!(atlas.register("obsidian_sword", "textures/items/obsidian_sword"));
        assert!(!atlas.register("obsidian_sword", "textures/items/other"));
        assert_eq!(atlas.len(), 1);
        assert_eq!(
            atlas.data()["obsidian_sword"]["textures"],
            "textures/items/obsidian_sword"
        );
    }

    #[test]
    fn test_merge_is_union() {
        let mut atlas = TextureAtlas::new("factory");
        atlas.register("a", "textures/items/a");
        let incoming = json!({"b": {"textures": "textures/items/b"}});
        let changed = atlas.merge(incoming.as_object().unwrap());
        assert_eq!(changed, vec!["b".to_string()]);
        assert!(atlas.contains("a"));
        assert!(atlas.contains("b"));
        assert!(atlas.merge(incoming.as_object().unwrap()).is_empty());
    }

    #[test]
    fn test_fresh_atlas_adopts_supplied_header() {
        let mut atlas = TextureAtlas::new("factory");
        let incoming = json!({"resource_pack_name": "Obsidian Pack", "texture_name": "atlas.items"});
        let changed = atlas.merge_header(incoming.as_object().unwrap());
        assert_eq!(changed, vec!["resource_pack_name".to_string()]);
        assert_eq!(atlas.to_value()["resource_pack_name"], "Obsidian Pack");

        let later = json!({"resource_pack_name": "Second", "padding": 1});
        assert_eq!(atlas.merge_header(later.as_object().unwrap()), vec!["padding".to_string()]);
        assert_eq!(atlas.header()["resource_pack_name"], "Obsidian Pack");
    }

    #[test]
    fn test_existing_atlas_header_only_gains_missing_fields() {
        let mut atlas = TextureAtlas::from_value(json!({
            "resource_pack_name": "On Disk",
            "texture_data": {}
        }))
        .unwrap();
        let incoming = json!({"resource_pack_name": "Generated", "texture_name": "atlas.items"});
        let changed = atlas.merge_header(incoming.as_object().unwrap());
        assert_eq!(changed, vec!["texture_name".to_string()]);
        assert_eq!(atlas.header()["resource_pack_name"], "On Disk");
    }

    #[test]
    fn test_atlas_rejects_non_object_data() {
        assert!(TextureAtlas::from_value(json!({"texture_data": []})).is_err());
        assert!(TextureAtlas::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn test_translation_append_only() {
        let mut table = TranslationTable::parse("## header\nitem.factory:a.name=A\n\n");
        assert!(!table.insert("item.factory:a.name", "Other"));
        assert!(table.insert("item.factory:b.name", "B"));
        assert_eq!(table.get("item.factory:a.name"), Some("A"));
        assert_eq!(table.render(), "## header\nitem.factory:a.name=A\nitem.factory:b.name=B\n");
    }

    #[test]
    fn test_translation_render_reparse_stable() {
        let table = TranslationTable::parse("x=1\ny=2=3\n");
        assert_eq!(table.get("y"), Some("2=3"));
        let again = TranslationTable::parse(&table.render());
        assert_eq!(again.render(), table.render());
    }

    #[test]
    fn test_corrupt_atlas_policy() {
        let dir = TempDir::new().unwrap();
        let config = ForgeConfig::default();
        let atlas_file = dir.path().join(config.texture_atlas_path());
        fs::create_dir_all(atlas_file.parent().unwrap()).unwrap();
        fs::write(&atlas_file, "{ truncated").unwrap();

        let mut log = BuildLog::new();
        let stores = ContentStores::load(dir.path(), &config, &mut log).unwrap();
        assert!(stores.atlas.is_empty());
        assert_eq!(log.count_rule("corrupt_state"), 1);

        let strict = ForgeConfig {
            corrupt_state: CorruptStatePolicy::Fail,
            ..ForgeConfig::default()
        };
        let err = ContentStores::load(dir.path(), &strict, &mut log).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_flush_writes_only_dirty_stores() {
        let dir = TempDir::new().unwrap();
        let config = ForgeConfig::default();
        let mut log = BuildLog::new();
        let mut stores = ContentStores::load(dir.path(), &config, &mut log).unwrap();
        assert!(stores.flush().unwrap().is_empty());

        stores.add_translation("item.factory:a.name", "A", &mut log);
        let written = stores.flush().unwrap();
        assert_eq!(written, vec![config.translation_path()]);
        let text = fs::read_to_string(dir.path().join(config.translation_path())).unwrap();
        assert_eq!(text, "item.factory:a.name=A\n");
    }
}
