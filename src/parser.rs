//! Configuration format parsers for different file types.
//!
//! This module provides parsers for JSON, YAML, TOML and INI. Each parser
//! implements the `ConfigParser` trait, which decodes a document into a tree
//! of [`Value`]s and renders such a tree back into the format.
//!
//! ## Parser Detection
//!
//! Parsers are selected by format tag or file extension:
//!
//! ```rust
//! use spicetree::parser::detect_parser_by_extension;
//!
//! let json_parser = detect_parser_by_extension("json").unwrap();
//! let yaml_parser = detect_parser_by_extension("yml").unwrap();
//! assert_eq!(yaml_parser.name(), "YAML");
//! assert!(detect_parser_by_extension("xml").is_err());
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use spicetree::parser::{ConfigParser, JsonParser};
//! use spicetree::ConfigError;
//!
//! let parser = JsonParser;
//! match parser.parse(r#"{"invalid": json}"#) {
//!     Err(ConfigError::Parse { source_name, .. }) => assert_eq!(source_name, "JSON"),
//!     other => panic!("unexpected result: {other:?}"),
//! }
//! ```

use crate::error::{ConfigError, ConfigResult};
use crate::value::{format_duration, Value};
use std::collections::BTreeMap;

/// A decoded document: top-level keys mapped to values.
pub type Document = BTreeMap<String, Value>;

/// Trait for parsing configuration files in different formats.
///
/// Decoders only produce `Bool`, `I64`, `F64`, `String`, `List`, `Map` and
/// `Null` values. Serializers accept every [`Value`] variant and widen the
/// typed ones into what the format can express.
pub trait ConfigParser: Send + Sync {
    /// Parses configuration content into a key-value map.
    ///
    /// # Arguments
    /// * `content` - The configuration content as a string
    ///
    /// # Errors
    /// * `ConfigError::Parse` - If the content cannot be parsed or its root
    ///   is not a map
    fn parse(&self, content: &str) -> ConfigResult<Document>;

    /// Serializes a key-value map back to the format's string representation.
    ///
    /// # Errors
    /// * `ConfigError::Serialization` - If the data cannot be serialized
    fn serialize(&self, data: &Document) -> ConfigResult<String>;

    /// Returns the file extensions supported by this parser.
    fn supported_extensions(&self) -> &[&str];

    /// Returns a human-readable name for this parser.
    fn name(&self) -> &str;
}

/// Determines the appropriate parser based on file extension or format tag.
///
/// The matching is case-insensitive.
///
/// # Supported Extensions
/// - `json` - JSON parser
/// - `yaml`, `yml` - YAML parser
/// - `toml` - TOML parser
/// - `ini` - INI parser
///
/// # Errors
/// * `ConfigError::UnsupportedFormat` - If the extension is not supported
pub fn detect_parser_by_extension(extension: &str) -> ConfigResult<Box<dyn ConfigParser>> {
    match extension.to_lowercase().as_str() {
        "json" => Ok(Box::new(JsonParser)),
        "yaml" | "yml" => Ok(Box::new(YamlParser)),
        "toml" => Ok(Box::new(TomlParser)),
        "ini" => Ok(Box::new(IniParser)),
        _ => Err(ConfigError::UnsupportedFormat(extension.to_string())),
    }
}

/// JSON configuration parser.
///
/// # Example
/// ```rust
/// use spicetree::parser::{ConfigParser, JsonParser};
///
/// let parser = JsonParser;
/// let parsed = parser
///     .parse(r#"{"naru": {"a": 10, "b": "2"}, "timeout": 30.5}"#)
///     .unwrap();
/// assert!(parsed.contains_key("naru"));
/// ```
pub struct JsonParser;

impl ConfigParser for JsonParser {
    fn parse(&self, content: &str) -> ConfigResult<Document> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| ConfigError::parse_error("JSON", e.to_string()))?;

        match json_to_value(value) {
            Value::Map(map) => Ok(map),
            _ => Err(ConfigError::parse_error("JSON", "Root must be an object")),
        }
    }

    fn serialize(&self, data: &Document) -> ConfigResult<String> {
        let json_map: serde_json::Map<String, serde_json::Value> = data
            .iter()
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect();

        serde_json::to_string_pretty(&serde_json::Value::Object(json_map))
            .map_err(|e| ConfigError::Serialization(e.to_string()))
    }

    fn supported_extensions(&self) -> &[&str] {
        &["json"]
    }

    fn name(&self) -> &str {
        "JSON"
    }
}

/// YAML configuration parser.
///
/// Tagged values are unwrapped and non-string keys are rendered as strings.
///
/// # Example
/// ```rust
/// use spicetree::parser::{ConfigParser, YamlParser};
///
/// let parser = YamlParser;
/// let yaml_content = r#"
/// ## Database configuration
/// database:
///   host: localhost
///   port: 5432
/// features:
///   - auth
///   - logging
/// "#;
///
/// let parsed = parser.parse(yaml_content).unwrap();
/// assert!(parsed.contains_key("database"));
/// assert!(parsed.contains_key("features"));
/// ```
pub struct YamlParser;

impl ConfigParser for YamlParser {
    fn parse(&self, content: &str) -> ConfigResult<Document> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::parse_error("YAML", e.to_string()))?;

        match yaml_to_value(value) {
            Value::Map(map) => Ok(map),
            // An empty YAML document decodes to null
            Value::Null => Ok(Document::new()),
            _ => Err(ConfigError::parse_error(
                "YAML",
                "Root must be a mapping/object",
            )),
        }
    }

    fn serialize(&self, data: &Document) -> ConfigResult<String> {
        let mut yaml_map = serde_yaml::Mapping::new();
        for (k, v) in data {
            yaml_map.insert(serde_yaml::Value::String(k.clone()), value_to_yaml(v));
        }

        serde_yaml::to_string(&serde_yaml::Value::Mapping(yaml_map))
            .map_err(|e| ConfigError::Serialization(e.to_string()))
    }

    fn supported_extensions(&self) -> &[&str] {
        &["yaml", "yml"]
    }

    fn name(&self) -> &str {
        "YAML"
    }
}

/// TOML configuration parser.
///
/// Datetimes decode to their string form. TOML has no null, so null values
/// serialize as empty strings.
///
/// # Example
/// ```rust
/// use spicetree::parser::{ConfigParser, TomlParser};
///
/// let parser = TomlParser;
/// let toml_content = r#"
/// title = "My Application"
///
/// [database]
/// host = "localhost"
/// port = 5432
/// "#;
///
/// let parsed = parser.parse(toml_content).unwrap();
/// assert!(parsed.contains_key("title"));
/// assert!(parsed.contains_key("database"));
/// ```
pub struct TomlParser;

impl ConfigParser for TomlParser {
    fn parse(&self, content: &str) -> ConfigResult<Document> {
        let table: toml::Table =
            toml::from_str(content).map_err(|e| ConfigError::parse_error("TOML", e.to_string()))?;

        Ok(table
            .into_iter()
            .map(|(k, v)| (k, toml_to_value(v)))
            .collect())
    }

    fn serialize(&self, data: &Document) -> ConfigResult<String> {
        let mut toml_table = toml::map::Map::new();
        for (k, v) in data {
            toml_table.insert(k.clone(), value_to_toml(v));
        }

        toml::to_string_pretty(&toml::Value::Table(toml_table))
            .map_err(|e| ConfigError::Serialization(e.to_string()))
    }

    fn supported_extensions(&self) -> &[&str] {
        &["toml"]
    }

    fn name(&self) -> &str {
        "TOML"
    }
}

/// INI configuration parser.
///
/// # Supported Features
/// - Key-value pairs with `key = value` syntax
/// - Sections with `[section]` headers, dotted headers such as
///   `[database.pool]` nest
/// - Comments starting with `;` or `#`
/// - Global properties (outside of sections)
///
/// # Value Type Detection
/// - Integers: `42`, `-123`
/// - Floats: `3.14`, `-2.5`
/// - Booleans: `true`, `false`, `yes`, `no`, `on`, `off`
/// - Strings: Everything else
///
/// # Example
/// ```rust
/// use spicetree::parser::{ConfigParser, IniParser};
///
/// let parser = IniParser;
/// let ini_content = r#"
/// ; Global configuration
/// debug = true
///
/// [database]
/// host = localhost
/// port = 5432
/// "#;
///
/// let parsed = parser.parse(ini_content).unwrap();
/// assert!(parsed.contains_key("debug"));
/// assert!(parsed.contains_key("database"));
/// ```
pub struct IniParser;

impl ConfigParser for IniParser {
    fn parse(&self, content: &str) -> ConfigResult<Document> {
        parse_ini_content(content)
    }

    fn serialize(&self, data: &Document) -> ConfigResult<String> {
        serialize_ini_data(data)
    }

    fn supported_extensions(&self) -> &[&str] {
        &["ini"]
    }

    fn name(&self) -> &str {
        "INI"
    }
}

fn parse_ini_content(content: &str) -> ConfigResult<Document> {
    let mut result = Document::new();
    let mut current_section: Option<Vec<String>> = None;

    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let section_name = line[1..line.len() - 1].trim();
            if section_name.is_empty() {
                return Err(ConfigError::parse_error("INI", "Empty section name"));
            }
            let path: Vec<String> = section_name
                .split('.')
                .map(|s| s.trim().to_string())
                .collect();
            if path.iter().any(String::is_empty) {
                return Err(ConfigError::parse_error(
                    "INI",
                    format!("Invalid section name: {section_name}"),
                ));
            }
            current_section = Some(path);
            continue;
        }

        let Some(eq_pos) = line.find('=') else {
            return Err(ConfigError::parse_error(
                "INI",
                format!("Invalid line format: {line}"),
            ));
        };

        let key = line[..eq_pos].trim().to_string();
        if key.is_empty() {
            return Err(ConfigError::parse_error("INI", "Empty key name"));
        }
        let value = parse_ini_value(line[eq_pos + 1..].trim());

        let mut target = &mut result;
        for segment in current_section.iter().flatten() {
            let entry = target
                .entry(segment.clone())
                .or_insert_with(|| Value::Map(BTreeMap::new()));
            target = match entry {
                Value::Map(map) => map,
                _ => {
                    return Err(ConfigError::parse_error(
                        "INI",
                        format!("Section '{segment}' clashes with a property"),
                    ))
                }
            };
        }
        target.insert(key, value);
    }

    Ok(result)
}

fn serialize_ini_data(data: &Document) -> ConfigResult<String> {
    let mut output = String::new();
    let mut sections: Vec<(String, &Document)> = Vec::new();

    // General properties first, sections after
    for (key, value) in data {
        match value {
            Value::Map(section) => sections.push((key.clone(), section)),
            other => output.push_str(&format!("{} = {}\n", key, value_to_ini_string(other))),
        }
    }

    while !sections.is_empty() {
        let (name, section) = sections.remove(0);
        let mut nested = Vec::new();

        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&format!("[{name}]\n"));
        for (key, value) in section {
            match value {
                Value::Map(inner) => nested.push((format!("{name}.{key}"), inner)),
                other => output.push_str(&format!("{} = {}\n", key, value_to_ini_string(other))),
            }
        }

        for (offset, entry) in nested.into_iter().enumerate() {
            sections.insert(offset, entry);
        }
    }

    Ok(output)
}

fn parse_ini_value(value: &str) -> Value {
    // Try integer first so that "0" and "1" stay numbers
    if let Ok(i) = value.parse::<i64>() {
        return Value::I64(i);
    }

    if let Ok(f) = value.parse::<f64>() {
        return Value::F64(f);
    }

    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" => return Value::Bool(true),
        "false" | "no" | "off" => return Value::Bool(false),
        _ => {}
    }

    Value::String(value.to_string())
}

fn value_to_ini_string(value: &Value) -> String {
    match value {
        // INI has no arrays, lists are written comma-separated
        Value::List(items) => items
            .iter()
            .map(value_to_ini_string)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

/// Widens typed scalars into the variants every format can express.
fn widen(value: &Value) -> Value {
    match value {
        Value::I8(v) => Value::I64(*v as i64),
        Value::I16(v) => Value::I64(*v as i64),
        Value::I32(v) => Value::I64(*v as i64),
        Value::U8(v) => Value::I64(*v as i64),
        Value::U16(v) => Value::I64(*v as i64),
        Value::U32(v) => Value::I64(*v as i64),
        Value::U64(v) => match i64::try_from(*v) {
            Ok(i) => Value::I64(i),
            Err(_) => Value::String(v.to_string()),
        },
        Value::F32(v) => Value::F64(*v as f64),
        Value::Duration(d) => Value::String(format_duration(*d)),
        other => other.clone(),
    }
}

fn json_to_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::I64(i)
            } else if let Some(f) = n.as_f64() {
                Value::F64(f)
            } else {
                Value::Null
            }
        }
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Array(arr) => Value::List(arr.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(obj) => Value::Map(
            obj.into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect(),
        ),
        serde_json::Value::Null => Value::Null,
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match widen(value) {
        Value::String(s) => serde_json::Value::String(s),
        Value::I64(i) => serde_json::Value::Number(serde_json::Number::from(i)),
        Value::F64(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Bool(b) => serde_json::Value::Bool(b),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
        _ => serde_json::Value::Null,
    }
}

fn yaml_to_value(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::I64(i)
            } else if let Some(f) = n.as_f64() {
                Value::F64(f)
            } else {
                Value::Null
            }
        }
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Sequence(arr) => {
            Value::List(arr.into_iter().map(yaml_to_value).collect())
        }
        serde_yaml::Value::Mapping(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (yaml_key_to_string(k), yaml_to_value(v)))
                .collect(),
        ),
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Tagged(tagged) => yaml_to_value(tagged.value),
    }
}

fn yaml_key_to_string(value: serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => format!("{other:?}"),
    }
}

fn value_to_yaml(value: &Value) -> serde_yaml::Value {
    match widen(value) {
        Value::String(s) => serde_yaml::Value::String(s),
        Value::I64(i) => serde_yaml::Value::Number(serde_yaml::Number::from(i)),
        Value::F64(f) => serde_yaml::Value::Number(serde_yaml::Number::from(f)),
        Value::Bool(b) => serde_yaml::Value::Bool(b),
        Value::List(items) => serde_yaml::Value::Sequence(items.iter().map(value_to_yaml).collect()),
        Value::Map(map) => {
            let mut mapping = serde_yaml::Mapping::new();
            for (k, v) in &map {
                mapping.insert(serde_yaml::Value::String(k.clone()), value_to_yaml(v));
            }
            serde_yaml::Value::Mapping(mapping)
        }
        _ => serde_yaml::Value::Null,
    }
}

fn toml_to_value(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::I64(i),
        toml::Value::Float(f) => Value::F64(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Array(arr) => Value::List(arr.into_iter().map(toml_to_value).collect()),
        toml::Value::Table(table) => Value::Map(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_value(v)))
                .collect(),
        ),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
    }
}

fn value_to_toml(value: &Value) -> toml::Value {
    match widen(value) {
        Value::String(s) => toml::Value::String(s),
        Value::I64(i) => toml::Value::Integer(i),
        Value::F64(f) => toml::Value::Float(f),
        Value::Bool(b) => toml::Value::Boolean(b),
        Value::List(items) => toml::Value::Array(items.iter().map(value_to_toml).collect()),
        Value::Map(map) => {
            let mut table = toml::map::Map::new();
            for (k, v) in &map {
                table.insert(k.clone(), value_to_toml(v));
            }
            toml::Value::Table(table)
        }
        // TOML doesn't have a null value
        _ => toml::Value::String(String::new()),
    }
}
