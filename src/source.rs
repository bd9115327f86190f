//! File-backed configuration sources and the layered key-value store.

use crate::error::{ConfigError, ConfigResult};
use crate::parser::{detect_parser_by_extension, Document};
use crate::value::Value;
use std::fs;
use std::path::Path;

/// A registered configuration document: raw bytes plus a format tag.
///
/// The bytes are decoded on every merge, so a source stays valid no matter
/// how many times the manager merges.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    name: String,
    format: String,
    bytes: Vec<u8>,
}

impl ConfigSource {
    /// Creates a source from in-memory bytes.
    ///
    /// # Arguments
    /// * `format` - `json`, `yaml`, `yml`, `toml` or `ini`
    /// * `bytes` - The document
    ///
    /// # Errors
    /// * `ConfigError::UnsupportedFormat` - If no parser handles `format`
    ///
    /// # Example
    /// ```
    /// use spicetree::source::ConfigSource;
    ///
    /// let source = ConfigSource::new("yaml", "naru:\n  a: 10\n").unwrap();
    /// assert_eq!(source.format(), "yaml");
    /// assert!(ConfigSource::new("xml", "<a/>").is_err());
    /// ```
    pub fn new(format: &str, bytes: impl Into<Vec<u8>>) -> ConfigResult<Self> {
        let format = format.to_lowercase();
        detect_parser_by_extension(&format)?;
        Ok(Self {
            name: format.clone(),
            format,
            bytes: bytes.into(),
        })
    }

    /// Reads a source from disk, taking the format from the file extension.
    ///
    /// # Errors
    /// * `ConfigError::UnsupportedFormat` - If the extension is missing or
    ///   not supported
    /// * `ConfigError::Io` - If the file cannot be read
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.display().to_string()))?;

        let mut source = Self::new(extension, fs::read(path)?)?;
        source.name = path.display().to_string();
        Ok(source)
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    /// The file path, or the format tag for in-memory sources.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decodes the document, with every key lowercased.
    pub fn decode(&self) -> ConfigResult<Document> {
        let parser = detect_parser_by_extension(&self.format)?;
        let content = std::str::from_utf8(&self.bytes)
            .map_err(|e| ConfigError::parse_error(&self.name, e.to_string()))?;

        let document = parser.parse(content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::parse_error(&self.name, message),
            other => other,
        })?;
        Ok(lowercase_keys(document))
    }
}

fn lowercase_keys(document: Document) -> Document {
    document
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::Map(map) => Value::Map(lowercase_keys(map)),
                other => other,
            };
            (k.to_lowercase(), v)
        })
        .collect()
}

/// Collects the dotted keys of every non-map value in `document`.
///
/// # Example
/// ```
/// use spicetree::parser::{ConfigParser, JsonParser};
/// use spicetree::source::flatten_keys;
///
/// let doc = JsonParser.parse(r#"{"naru": {"a": 1, "db": {"host": "x"}}}"#).unwrap();
/// assert_eq!(flatten_keys(&doc), vec!["naru.a", "naru.db.host"]);
/// ```
pub fn flatten_keys(document: &Document) -> Vec<String> {
    let mut keys = Vec::new();
    collect_keys(document, "", &mut keys);
    keys
}

fn collect_keys(document: &Document, prefix: &str, keys: &mut Vec<String>) {
    for (key, value) in document {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        match value {
            Value::Map(nested) => collect_keys(nested, &full_key, keys),
            _ => keys.push(full_key),
        }
    }
}

/// Deep-merges `overlay` on top of `base`.
///
/// Maps present on both sides are merged recursively; for anything else the
/// overlay's value wins.
pub fn deep_merge(mut base: Document, overlay: Document) -> Document {
    for (key, overlay_value) in overlay {
        match (base.remove(&key), overlay_value) {
            (Some(Value::Map(base_map)), Value::Map(overlay_map)) => {
                base.insert(key, Value::Map(deep_merge(base_map, overlay_map)));
            }
            (_, overlay_value) => {
                base.insert(key, overlay_value);
            }
        }
    }
    base
}

/// Layered key-value store: registered defaults overlaid by merged sources.
#[derive(Debug, Clone, Default)]
pub struct Store {
    defaults: Document,
    config: Document,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the default for a dotted key.
    pub fn set_default(&mut self, key: &str, value: Value) {
        let path: Vec<&str> = key.split('.').collect();
        set_nested(&mut self.defaults, &path, value);
    }

    /// Merges a decoded source over everything merged before.
    pub fn merge(&mut self, document: Document) {
        let config = std::mem::take(&mut self.config);
        self.config = deep_merge(config, document);
    }

    /// Looks a dotted key up, merged sources first, then defaults.
    pub fn get(&self, key: &str) -> Option<&Value> {
        lookup(&self.config, key).or_else(|| lookup(&self.defaults, key))
    }

    /// Whether a merged source defines `key`.
    pub fn is_set(&self, key: &str) -> bool {
        lookup(&self.config, key).is_some()
    }

    /// Defaults overlaid by the merged sources.
    pub fn settings(&self) -> Document {
        deep_merge(self.defaults.clone(), self.config.clone())
    }

    /// Renders [`settings`](Self::settings) in `format`.
    ///
    /// # Errors
    /// * `ConfigError::UnsupportedFormat` - If no parser handles `format`
    pub fn render(&self, format: &str) -> ConfigResult<String> {
        let parser = detect_parser_by_extension(format)?;
        let rendered = parser.serialize(&self.settings())?;
        Ok(rendered.trim().to_string())
    }
}

fn lookup<'a>(document: &'a Document, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_map()?.get(part)?;
    }
    Some(current)
}

fn set_nested(document: &mut Document, path: &[&str], value: Value) {
    match path {
        [] => {}
        [last] => {
            document.insert(last.to_string(), value);
        }
        [first, rest @ ..] => {
            let entry = document
                .entry(first.to_string())
                .or_insert_with(|| Value::Map(Document::new()));
            // A scalar in the way is replaced by a map
            if !matches!(entry, Value::Map(_)) {
                *entry = Value::Map(Document::new());
            }
            if let Value::Map(nested) = entry {
                set_nested(nested, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ConfigParser, JsonParser};
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn doc(json: &str) -> Document {
        JsonParser.parse(json).unwrap()
    }

    #[test]
    fn test_source_decodes_and_lowercases() {
        let source = ConfigSource::new("YAML", "Naru:\n  A: 10\n  b: \"2\"\n").unwrap();
        assert_eq!(source.format(), "yaml");

        let document = source.decode().unwrap();
        assert_eq!(flatten_keys(&document), vec!["naru.a", "naru.b"]);
    }

    #[test]
    fn test_source_parse_error_names_the_source() {
        let source = ConfigSource::new("json", "{broken").unwrap();
        match source.decode() {
            Err(ConfigError::Parse { source_name, .. }) => assert_eq!(source_name, "json"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_source_from_file() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[naru]\na = 10").unwrap();

        let source = ConfigSource::from_file(file.path()).unwrap();
        assert_eq!(source.format(), "toml");
        assert_eq!(source.name(), file.path().display().to_string());
        assert_eq!(flatten_keys(&source.decode().unwrap()), vec!["naru.a"]);
    }

    #[test]
    fn test_source_from_file_rejects_extensions() {
        let file = Builder::new().suffix(".conf").tempfile().unwrap();
        assert!(matches!(
            ConfigSource::from_file(file.path()),
            Err(ConfigError::UnsupportedFormat(_))
        ));

        let file = NamedTempFile::new().unwrap();
        assert!(ConfigSource::from_file(file.path()).is_err());

        assert!(matches!(
            ConfigSource::from_file("/definitely/not/here.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_flatten_keys_skips_intermediate_maps() {
        let document = doc(r#"{"a": {"b": {"c": 1}, "d": [1, 2]}, "e": null}"#);
        assert_eq!(flatten_keys(&document), vec!["a.b.c", "a.d", "e"]);
    }

    #[test]
    fn test_deep_merge_layers() {
        let base = doc(r#"{"naru": {"a": 1, "b": 2}}"#);
        let overlay = doc(r#"{"naru": {"b": 3}, "other": true}"#);
        let merged = deep_merge(base, overlay);

        let naru = merged["naru"].as_map().unwrap();
        assert_eq!(naru["a"], Value::I64(1));
        assert_eq!(naru["b"], Value::I64(3));
        assert_eq!(merged["other"], Value::Bool(true));
    }

    #[test]
    fn test_deep_merge_scalar_replaces_map() {
        let merged = deep_merge(doc(r#"{"db": {"url": "x"}}"#), doc(r#"{"db": "flat"}"#));
        assert_eq!(merged["db"], Value::from("flat"));
    }

    #[test]
    fn test_store_lookup_order() {
        let mut store = Store::new();
        store.set_default("naru.a", Value::I32(0));
        store.set_default("naru.b", Value::from(""));
        store.merge(doc(r#"{"naru": {"a": 10}}"#));

        assert_eq!(store.get("naru.a"), Some(&Value::I64(10)));
        assert_eq!(store.get("naru.b"), Some(&Value::from("")));
        assert!(store.is_set("naru.a"));
        assert!(!store.is_set("naru.b"));
        assert_eq!(store.get("naru.c"), None);
        assert_eq!(store.get("naru.a.deeper"), None);
    }

    #[test]
    fn test_store_later_sources_only_override_their_keys() {
        let mut store = Store::new();
        store.merge(doc(r#"{"naru": {"a": 1, "b": 1}}"#));
        store.merge(doc(r#"{"naru": {"b": 2}}"#));

        assert_eq!(store.get("naru.a"), Some(&Value::I64(1)));
        assert_eq!(store.get("naru.b"), Some(&Value::I64(2)));
    }

    #[test]
    fn test_store_render() {
        let mut store = Store::new();
        store.set_default("naru.a", Value::I32(0));
        store.merge(doc(r#"{"naru": {"b": "x"}}"#));

        let rendered = store.render("json").unwrap();
        let reparsed = doc(&rendered);
        let naru = reparsed["naru"].as_map().unwrap();
        assert_eq!(naru["a"], Value::I64(0));
        assert_eq!(naru["b"], Value::from("x"));

        assert!(store.render("yaml").unwrap().starts_with("naru:"));
        assert!(store.render("xml").is_err());
    }
}
