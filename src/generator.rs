//! Generator Adapter
//!
//! The generative service is a black box that answers with a JSON list of
//! `{path, content}` pairs. In practice the answer is often wrapped in prose or
//! code fences, or is a bare item object. This module turns whatever came back
//! into descriptors.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::buildlog::BuildLog;
use crate::config::ForgeConfig;
use crate::identifier::Identifier;
use crate::normalize::ContentDescriptor;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Generator unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to read generator response {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Generator response contains no descriptor list: {0}")]
    Unparsable(String),
}

/// A source of raw generator output.
pub trait Generator {
    fn generate(&self, task: &str, rules: &str) -> Result<String, GeneratorError>;
}

/// Replays a response captured earlier.
pub struct ResponseFileGenerator {
    path: PathBuf,
}

impl ResponseFileGenerator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Generator for ResponseFileGenerator {
    fn generate(&self, task: &str, rules: &str) -> Result<String, GeneratorError> {
        if !self.path.exists() {
            return Err(GeneratorError::Unavailable(format!(
                "no response recorded at {}",
                self.path.display()
            )));
        }
        tracing::debug!(
            task_len = task.len(),
            rules_len = rules.len(),
            response = %self.path.display(),
            "replaying recorded generator response"
        );
        fs::read_to_string(&self.path).map_err(|source| GeneratorError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Turn raw generator text into descriptors, in emission order.
pub fn parse_response(
    text: &str,
    config: &ForgeConfig,
    log: &mut BuildLog,
) -> Result<Vec<ContentDescriptor>, GeneratorError> {
    let cleaned = strip_code_fences(text);
    let cleaned = cleaned.trim();

    match serde_json::from_str::<Value>(cleaned) {
        Ok(Value::Array(items)) => Ok(from_items(items, config, log)),
        Ok(obj @ Value::Object(_)) => match from_single(obj, config) {
            Some(descriptor) => {
                log.info("generator", &descriptor.path, "response was a single object");
                Ok(vec![descriptor])
            }
            None => Err(GeneratorError::Unparsable(
                "object is neither a descriptor nor an item definition".to_string(),
            )),
        },
        _ => {
            let slice = outermost_list(cleaned)
                .ok_or_else(|| GeneratorError::Unparsable("no bracketed list found".to_string()))?;
            match serde_json::from_str::<Value>(slice) {
                Ok(Value::Array(items)) => Ok(from_items(items, config, log)),
                Ok(_) => Err(GeneratorError::Unparsable("bracketed text is not a list".to_string())),
                Err(e) => Err(GeneratorError::Unparsable(e.to_string())),
            }
        }
    }
}

fn from_items(items: Vec<Value>, config: &ForgeConfig, log: &mut BuildLog) -> Vec<ContentDescriptor> {
    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match from_single(item, config) {
            Some(descriptor) => out.push(descriptor),
            None => log.warn(
                "malformed",
                &format!("#{}", index),
                "list entry is not a {path, content} pair",
            ),
        }
    }
    out
}

fn from_single(value: Value, config: &ForgeConfig) -> Option<ContentDescriptor> {
    let Value::Object(mut obj) = value else {
        return None;
    };
    let is_pair = matches!(obj.get("path"), Some(Value::String(_))) && obj.contains_key("content");
    if is_pair {
        let path = obj.remove("path").and_then(|p| p.as_str().map(str::to_string))?;
        let content = obj.remove("content")?;
        return Some(ContentDescriptor::new(path, content));
    }

    let marker = format!("{}:item", config.reserved_namespace);
    let identifier = obj
        .get(&marker)?
        .get("description")?
        .get("identifier")?
        .as_str()?;
    let short = Identifier::short_name(identifier).to_string();
    if short.is_empty() {
        return None;
    }
    let path = format!("{}/items/{}.json", config.behavior_dir, short);
    Some(ContentDescriptor::new(path, Value::Object(obj)))
}

fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "")
}

/// The slice from the first `[` to the last `]`, inclusive.
fn outermost_list(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Vec<ContentDescriptor>, GeneratorError> {
        parse_response(text, &ForgeConfig::default(), &mut BuildLog::new())
    }

    #[test]
    fn test_plain_list() {
        let out = parse(r#"[{"path": "BP/items/a.json", "content": {"x": 1}}]"#).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, "BP/items/a.json");
    }

    #[test]
    fn test_fenced_list_with_prose() {
        let text = "Here you go!\n```json\n[{\"path\": \"RP/a.json\", \"content\": {}}]\n```\nEnjoy.";
        let out = parse(text).unwrap();
        assert_eq!(out[0].path, "RP/a.json");
    }

    #[test]
    fn test_bare_item_object_gets_path() {
        let text = r#"{"format_version": "1.21.0", "minecraft:item": {"description": {"identifier": "foo:sword"}}}"#;
        let out = parse(text).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, "BP/items/sword.json");
        assert!(out[0].content.get("minecraft:item").is_some());
    }

    #[test]
    fn test_bad_entries_skipped_in_order() {
        let mut log = BuildLog::new();
        let text = r#"[{"path": "a.json", "content": {}}, 7, {"path": 3}, {"path": "b.json", "content": "x"}]"#;
        let out = parse_response(text, &ForgeConfig::default(), &mut log).unwrap();
        let paths: Vec<_> = out.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["a.json", "b.json"]);
        assert_eq!(log.count_rule("malformed"), 2);
    }

    #[test]
    fn test_unparsable_response() {
        assert!(matches!(parse("sorry, I cannot help"), Err(GeneratorError::Unparsable(_))));
        assert!(matches!(parse(r#"{"hello": "world"}"#), Err(GeneratorError::Unparsable(_))));
    }

    #[test]
    fn test_missing_recording_is_unavailable() {
        let generator = ResponseFileGenerator::new("/nonexistent/response.json");
        assert!(matches!(
            generator.generate("task", "rules"),
            Err(GeneratorError::Unavailable(_))
        ));
    }
}
