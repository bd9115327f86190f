//! The settings manager: builds the item tree once and merges every source
//! into the live settings object.

use crate::cli::{FlagRegistry, FlagSpec};
use crate::env::{process_env, EnvLookup};
use crate::error::{ConfigError, ConfigResult, MergeError, Phase};
use crate::hooks::{call_parse, find_hooks, HookFamily};
use crate::item::{Item, ItemId, ItemTree};
use crate::kind::classify;
use crate::schema::Group;
use crate::source::{flatten_keys, ConfigSource, Store};
use crate::value::{FieldType, Kind, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, error, warn, Level};

/// Resolves a settings object from the environment, config files and flags.
///
/// Sources are applied in a fixed order, each overriding the previous one:
/// environment variables, then registered config files, then flags set on the
/// command line. Merge and validation hooks run last.
///
/// # Example
/// ```
/// use spicetree::cli::MemoryFlags;
/// use spicetree::{field, Group, Manager, Schema, Value};
///
/// #[derive(Debug, Default)]
/// struct Naru {
///     a: i32,
///     b: String,
/// }
///
/// impl Group for Naru {
///     fn describe(schema: &mut Schema<Self>) {
///         field!(schema, a);
///         field!(schema, b);
///     }
/// }
///
/// let mut flags = MemoryFlags::new("naru");
/// flags.set("a", Value::I32(10));
///
/// let mut manager = Manager::new("", Naru::default(), flags).unwrap();
/// manager.add_config("yaml", "naru:\n  b: from-file\n").unwrap();
/// manager.set_env_lookup(|_| None);
/// manager.merge().unwrap();
///
/// assert_eq!(manager.settings().a, 10);
/// assert_eq!(manager.settings().b, "from-file");
/// ```
pub struct Manager<S: Group, F: FlagRegistry> {
    name: String,
    group: String,
    groups: Vec<String>,
    settings: S,
    tree: ItemTree,
    flag_index: HashMap<String, ItemId>,
    flags: F,
    sources: Vec<ConfigSource>,
    store: Store,
    env_lookup: EnvLookup,
    use_env: bool,
}

impl<S: Group, F: FlagRegistry> Manager<S, F> {
    /// Creates a manager whose group is the flag registry's command name.
    ///
    /// # Arguments
    /// * `name` - Program name, prepended to every environment name; may be empty
    /// * `settings` - The settings object, owned by the manager until
    ///   [`into_settings`](Self::into_settings)
    /// * `flags` - Registry that receives one flag per flagged leaf
    ///
    /// # Errors
    /// * `ConfigError::DuplicateName` - If two items share a name or flag name
    /// * `ConfigError::UnsupportedType` - If a parse hook takes a non-primitive input
    /// * `ConfigError::Construction` - If the schema cannot be expanded
    pub fn new(name: &str, settings: S, flags: F) -> ConfigResult<Self> {
        let group = flags
            .command_name()
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        Self::with_groups(name, settings, flags, vec![group])
    }

    /// Creates a manager for a nested subcommand.
    ///
    /// `groups` lists the command path from the outermost subcommand down,
    /// e.g. `["cluster", "join"]`, and forms the group `cluster-join`.
    pub fn with_groups(
        name: &str,
        mut settings: S,
        flags: F,
        groups: Vec<String>,
    ) -> ConfigResult<Self> {
        let tree = ItemTree::build(&mut settings)?;

        let mut flag_index = HashMap::new();
        for item in tree.leaves() {
            if let Some(flag) = item.flag_name() {
                if flag_index.insert(flag.clone(), item.id()).is_some() {
                    return Err(ConfigError::DuplicateName { name: flag });
                }
            }
        }

        let mut manager = Self {
            name: name.to_string(),
            group: groups.join("-"),
            groups,
            settings,
            tree,
            flag_index,
            flags,
            sources: Vec::new(),
            store: Store::new(),
            env_lookup: process_env(),
            use_env: true,
        };
        manager.register_flags()?;

        if tracing::enabled!(Level::DEBUG) {
            debug!(envs = ?manager.envs(), "available envs");
        }

        Ok(manager)
    }

    fn register_flags(&mut self) -> ConfigResult<()> {
        let leaves: Vec<ItemId> = self.tree.leaves().map(Item::id).collect();
        for id in leaves {
            let item = self.tree.item(id);
            let Some(flag) = item.flag_name() else {
                continue;
            };

            let kind = classify(&self.tree, id)?;
            let default = match (kind, self.flag_default(id)?) {
                (Kind::String, default) => Value::String(default.to_string()),
                (kind, default) => default.coerce_to(kind).unwrap_or_else(|raw| raw),
            };
            self.flags.register(FlagSpec {
                name: flag,
                kind,
                default: default.clone(),
                help: item.help().map(str::to_string),
            })?;

            let key = self.store_key(item.full_name());
            self.store.set_default(&key, default);
        }
        Ok(())
    }

    /// The flag default of a leaf: its `FlagValue` hook, else its current value.
    fn flag_default(&self, id: ItemId) -> ConfigResult<Value> {
        let resolved = find_hooks(&self.tree, id, HookFamily::FlagValue);
        if let Some(found) = resolved.first() {
            if let Some(hook) = found.flag_value_hook() {
                if let Some(object) = self.tree.object(&self.settings, found.owner)? {
                    return hook(object);
                }
            }
        }
        Ok(self.tree.read(&self.settings, id)?.unwrap_or(Value::Null))
    }

    fn store_key(&self, full_name: &str) -> String {
        if self.group.is_empty() {
            full_name.to_string()
        } else {
            format!("{}.{}", self.group, full_name)
        }
    }

    /// Runs every phase in order, stopping at the first failure.
    ///
    /// Values assigned before a failure stay assigned.
    pub fn merge(&mut self) -> Result<(), MergeError> {
        if self.use_env {
            self.merge_from_env()?;
        }
        self.merge_from_config()?;
        self.merge_from_flags()?;
        self.validate()
    }

    /// Assigns every leaf whose environment variable is set.
    ///
    /// Values go through the leaf's `ParseEnv` hook. Without one, only leaves
    /// classified as strings can be set from the environment.
    pub fn merge_from_env(&mut self) -> Result<(), MergeError> {
        debug!(source = "env", "trying to merge");

        let leaves: Vec<ItemId> = self.tree.leaves().map(Item::id).collect();
        for id in leaves {
            let env = self.env_name(self.tree.item(id));
            if env.is_empty() {
                continue;
            }
            let Some(input) = (self.env_lookup)(&env) else {
                continue;
            };
            debug!(name = %env, value = %input, "env found");

            let value = self
                .parse_env(id, input.clone())
                .map_err(|e| MergeError::new(Phase::Env, &env, e))?;

            let key = self.tree.item(id).full_name().to_string();
            if let Err(e) = self.set_raw(&key, value) {
                error!(env = %env, value = %input, error = %e, "failed to merge");
                return Err(MergeError::new(Phase::Env, env, e));
            }
        }

        Ok(())
    }

    /// Assigns every leaf found in the registered config sources.
    ///
    /// Sources are decoded in registration order and deep-merged, so later
    /// sources override only the keys they define. Only keys under the
    /// manager's group are considered; unknown keys are skipped with a warning.
    pub fn merge_from_config(&mut self) -> Result<(), MergeError> {
        debug!(source = "config", "trying to merge");
        if self.sources.is_empty() {
            debug!(source = "config", "no config found; skip merging");
            return Ok(());
        }

        let mut discovered: Vec<String> = Vec::new();
        for source in &self.sources {
            let document = source
                .decode()
                .map_err(|e| MergeError::new(Phase::Config, source.name(), e))?;

            let keys = flatten_keys(&document);
            if keys.is_empty() {
                debug!(source = %source.name(), "no config values found");
                continue;
            }
            debug!(source = %source.name(), keys = ?keys, "keys loaded");

            for key in keys {
                if !discovered.contains(&key) {
                    discovered.push(key);
                }
            }
            self.store.merge(document);
        }

        let group = self.group.to_lowercase();
        for raw_key in discovered {
            let key = if group.is_empty() {
                raw_key.as_str()
            } else {
                let Some((first, rest)) = raw_key.split_once('.') else {
                    warn!(key = %raw_key, "unknown key found");
                    continue;
                };
                if first != group {
                    continue;
                }
                rest
            };

            let Some(id) = self.tree.find(key).map(Item::id) else {
                warn!(raw = %raw_key, key = %key, "unknown key found");
                continue;
            };
            let raw = match self.store.get(&raw_key) {
                Some(Value::Null) | None => {
                    warn!(raw = %raw_key, "empty config value; skipped");
                    continue;
                }
                Some(raw) => raw.clone(),
            };

            let value = match self.parse(id, raw.clone()) {
                Ok(value) => value,
                Err(e) => {
                    error!(raw = %raw_key, key = %key, input = %raw, error = %e, "failed to parse");
                    return Err(MergeError::new(Phase::Config, raw_key, e));
                }
            };
            if let Err(e) = self.set_raw(key, value.clone()) {
                error!(raw = %raw_key, key = %key, value = %raw, error = %e, "failed to merge");
                return Err(MergeError::new(Phase::Config, raw_key, e));
            }
            debug!(raw = %raw_key, key = %key, value = %value, "item merged");
        }

        debug!(source = "config", "merged");
        Ok(())
    }

    /// Assigns every leaf whose flag was set on the command line.
    ///
    /// A changed flag the manager never registered is an error.
    pub fn merge_from_flags(&mut self) -> Result<(), MergeError> {
        debug!(source = "flag", "trying to merge");

        for flag in self.flags.changed() {
            let Some(id) = self.flag_index.get(&flag).copied() else {
                return Err(MergeError::new(
                    Phase::Flags,
                    &flag,
                    ConfigError::UnknownFlag { flag: flag.clone() },
                ));
            };
            let Some(input) = self.flags.captured(&flag) else {
                continue;
            };

            let parsed = self.parse(id, input.clone());
            debug!(flag = %flag, value = %input, ok = parsed.is_ok(), "parsed");
            let value = parsed.map_err(|e| MergeError::new(Phase::Flags, &flag, e))?;

            let key = self.tree.item(id).full_name().to_string();
            if let Err(e) = self.set_raw(&key, value) {
                error!(flag = %flag, value = %input, error = %e, "failed to merge");
                return Err(MergeError::new(Phase::Flags, flag, e));
            }
            debug!(flag = %flag, value = %input, "item merged");
        }

        debug!(source = "flag", "merged");
        Ok(())
    }

    /// Runs merge and validation hooks over the tree, children first.
    ///
    /// For each item the first resolved `Merge` hook runs, then the first
    /// resolved `Validate` hook. Unset optional groups are skipped along with
    /// everything below them.
    pub fn validate(&mut self) -> Result<(), MergeError> {
        self.validate_item(ItemId::ROOT)
    }

    fn validate_item(&mut self, id: ItemId) -> Result<(), MergeError> {
        let item = self.tree.item(id);
        let location = item.full_name().to_string();

        if item.is_group() {
            let object = self
                .tree
                .object(&self.settings, id)
                .map_err(|e| MergeError::new(Phase::Validate, &location, e))?;
            if object.is_none() {
                return Ok(());
            }
        }

        for child in item.children().to_vec() {
            self.validate_item(child)?;
        }

        self.run_hooks(id)
            .map_err(|e| MergeError::new(Phase::Validate, location, e))
    }

    fn run_hooks(&mut self, id: ItemId) -> ConfigResult<()> {
        let merge = find_hooks(&self.tree, id, HookFamily::Merge);
        if let Some(found) = merge.first() {
            if let Some(hook) = found.merge_hook() {
                let object = self.tree.object_mut(&mut self.settings, found.owner)?;
                hook(object)?;
            }
        }

        let validate = find_hooks(&self.tree, id, HookFamily::Validate);
        if let Some(found) = validate.first() {
            if let Some(hook) = found.validate_hook() {
                if let Some(object) = self.tree.object(&self.settings, found.owner)? {
                    hook(object)?;
                }
            }
        }

        Ok(())
    }

    /// Runs the first resolved parse hook of `family`, `None` without one.
    fn call_hook(&self, id: ItemId, family: HookFamily, input: Value) -> ConfigResult<Option<Value>> {
        let resolved = find_hooks(&self.tree, id, family);
        let Some(found) = resolved.first() else {
            return Ok(None);
        };
        let Some(hook) = found.parse_hook(family) else {
            return Ok(None);
        };

        let object = self.tree.object(&self.settings, found.owner)?.ok_or_else(|| {
            ConfigError::CannotSet {
                key: self.tree.item(id).full_name().to_string(),
            }
        })?;
        call_parse(hook, object, input).map(Some)
    }

    /// Converts a raw value for a leaf.
    ///
    /// The `Parse` hook decides when there is one. Otherwise the value is
    /// converted losslessly to the leaf's kind where possible and left as is
    /// elsewhere, for the setter to accept or refuse.
    fn parse(&self, id: ItemId, input: Value) -> ConfigResult<Value> {
        if let Some(value) = self.call_hook(id, HookFamily::Parse, input.clone())? {
            return Ok(value);
        }
        Ok(match self.tree.item(id).kind() {
            Some(kind) => input.coerce_to(kind).unwrap_or_else(|raw| raw),
            None => input,
        })
    }

    fn parse_env(&self, id: ItemId, input: String) -> ConfigResult<Value> {
        if let Some(value) = self.call_hook(id, HookFamily::ParseEnv, Value::String(input.clone()))? {
            return Ok(value);
        }

        match classify(&self.tree, id)? {
            Kind::String => self.parse(id, Value::String(input)),
            kind => {
                let item = self.tree.item(id);
                error!(item = %item.full_name(), kind = %kind, input = %input, "not supported type");
                Err(ConfigError::EnvParse {
                    type_name: item.type_name().unwrap_or(kind.name()).to_string(),
                })
            }
        }
    }

    pub fn settings(&self) -> &S {
        &self.settings
    }

    /// Mutable access to the settings object.
    ///
    /// Optional groups set to `None` here are skipped by validation.
    pub fn settings_mut(&mut self) -> &mut S {
        &mut self.settings
    }

    pub fn into_settings(self) -> S {
        self.settings
    }

    /// The item tree.
    pub fn tree(&self) -> &ItemTree {
        &self.tree
    }

    pub fn root(&self) -> &Item {
        self.tree.root()
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.tree.get(id)
    }

    /// Looks an item up by canonical name.
    pub fn get(&self, key: &str) -> Option<&Item> {
        self.tree.find(key)
    }

    /// Every item except the root, in declaration order.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.tree.iter()
    }

    pub fn item_by_flag(&self, flag: &str) -> Option<&Item> {
        self.flag_index.get(flag).and_then(|id| self.tree.get(*id))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn use_env(&self) -> bool {
        self.use_env
    }

    pub fn set_use_env(&mut self, use_env: bool) {
        self.use_env = use_env;
    }

    /// Replaces the environment lookup, the process environment by default.
    pub fn set_env_lookup<L>(&mut self, lookup: L)
    where
        L: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env_lookup = Box::new(lookup);
    }

    /// The environment variable of an item, prefixed with the program name
    /// and group.
    pub fn env_name(&self, item: &Item) -> String {
        let prefix: Vec<&str> = [self.name.as_str(), self.group.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect();
        item.env_name(&prefix.join("-"))
    }

    /// Environment variables of every leaf, sorted.
    pub fn envs(&self) -> Vec<String> {
        let mut envs: Vec<String> = self
            .tree
            .leaves()
            .map(|item| self.env_name(item))
            .filter(|env| !env.is_empty())
            .collect();
        envs.sort();
        envs
    }

    /// Reads a leaf.
    ///
    /// # Errors
    /// * `ConfigError::KeyNotFound` - If no leaf has that name or its group is unset
    /// * `ConfigError::NotAssignable` - If the leaf does not hold a `T`
    pub fn get_value<T: FieldType>(&self, key: &str) -> ConfigResult<T> {
        let item = self
            .tree
            .find(key)
            .ok_or_else(|| ConfigError::key_not_found(key))?;
        let value = self
            .tree
            .read(&self.settings, item.id())?
            .ok_or_else(|| ConfigError::key_not_found(key))?;
        T::from_value(value).map_err(|raw| ConfigError::not_assignable(T::type_name(), raw.type_name()))
    }

    /// Parses `value` through the leaf's `Parse` hook and assigns it.
    pub fn set_value(&mut self, key: &str, value: impl Into<Value>) -> ConfigResult<()> {
        let id = self
            .tree
            .find(key)
            .map(Item::id)
            .ok_or_else(|| ConfigError::key_not_found(key))?;
        let value = self.parse(id, value.into())?;
        self.set_raw(key, value)
    }

    /// Assigns a leaf, accepting only a value of exactly the leaf's type.
    ///
    /// # Errors
    /// * `ConfigError::KeyNotFound` - If no item has that name
    /// * `ConfigError::CannotSet` - If the item is a group
    /// * `ConfigError::NotAssignable` - If the value has another type
    pub fn set_raw(&mut self, key: &str, value: impl Into<Value>) -> ConfigResult<()> {
        let id = self
            .tree
            .find(key)
            .map(Item::id)
            .ok_or_else(|| ConfigError::key_not_found(key))?;
        self.tree.write(&mut self.settings, id, value.into())
    }

    /// Canonical names and current values of every readable leaf.
    pub fn config_pairs(&self) -> Vec<(String, Value)> {
        self.tree
            .leaves()
            .filter_map(|item| match self.tree.read(&self.settings, item.id()) {
                Ok(Some(value)) => Some((item.full_name().to_string(), value)),
                _ => None,
            })
            .collect()
    }

    /// The settings object as pretty printed JSON.
    pub fn config_string(&self) -> ConfigResult<String>
    where
        S: Serialize,
    {
        Ok(serde_json::to_string_pretty(&self.settings)?)
    }

    /// The key-value store, registered defaults overlaid by config files,
    /// rendered in `format`.
    pub fn store_string(&self, format: &str) -> ConfigResult<String> {
        self.store.render(format)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn flags(&self) -> &F {
        &self.flags
    }

    pub fn flags_mut(&mut self) -> &mut F {
        &mut self.flags
    }

    /// Registers an in-memory config source.
    ///
    /// # Errors
    /// * `ConfigError::UnsupportedFormat` - If `format` has no parser
    pub fn add_config(&mut self, format: &str, bytes: impl Into<Vec<u8>>) -> ConfigResult<()> {
        self.sources.push(ConfigSource::new(format, bytes)?);
        Ok(())
    }

    /// Reads and registers config files, taking each format from its extension.
    ///
    /// Stops at the first file that cannot be read or has no supported
    /// extension; files before it stay registered.
    pub fn add_config_files<I, P>(&mut self, paths: I) -> ConfigResult<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            self.sources.push(ConfigSource::from_file(path)?);
        }
        Ok(())
    }

    pub fn sources(&self) -> &[ConfigSource] {
        &self.sources
    }
}

impl<S, F> fmt::Debug for Manager<S, F>
where
    S: Group + fmt::Debug,
    F: FlagRegistry,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("settings", &self.settings)
            .field("items", &self.tree.len())
            .field("sources", &self.sources.len())
            .field("use_env", &self.use_env)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::MemoryFlags;
    use crate::env::from_pairs;
    use crate::error::HookError;
    use crate::field;
    use crate::schema::Schema;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Plain {
        a: i32,
        b: String,
    }

    impl Group for Plain {
        fn describe(schema: &mut Schema<Self>) {
            field!(schema, a);
            field!(schema, b);
        }
    }

    fn plain() -> Plain {
        Plain {
            a: 1,
            b: "2".to_string(),
        }
    }

    #[derive(Debug, Default)]
    struct WithHooks {
        a: i32,
        b: String,
        fixed: bool,
    }

    impl Group for WithHooks {
        fn describe(schema: &mut Schema<Self>) {
            field!(schema, a);
            field!(schema, b);
            schema.on_parse("a", |s: &WithHooks, raw: String| {
                if s.fixed {
                    return Ok(1000);
                }
                raw.trim().parse::<i32>().map_err(HookError::from)
            });
        }

        fn merge(&mut self) -> Result<(), HookError> {
            if self.b == "override" {
                self.a = 200;
            }
            Ok(())
        }
    }

    fn manager<S: Group>(settings: S, flags: MemoryFlags) -> Manager<S, MemoryFlags> {
        let mut manager = Manager::new("", settings, flags).unwrap();
        manager.set_env_lookup(|_| None);
        manager
    }

    #[test]
    fn test_new_registers_flags_and_defaults() {
        let manager = manager(plain(), MemoryFlags::new("naru"));
        assert_eq!(manager.group(), "naru");
        assert_eq!(manager.groups(), ["naru".to_string()]);
        assert_eq!(manager.root().children().len(), 2);

        let specs = manager.flags().specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "a");
        assert_eq!(specs[0].kind, Kind::I32);
        assert_eq!(specs[0].default, Value::I32(1));
        assert_eq!(specs[1].default, Value::from("2"));

        assert_eq!(manager.store().get("naru.a"), Some(&Value::I32(1)));
        assert!(manager.item_by_flag("b").is_some());
        assert!(manager.item_by_flag("c").is_none());
    }

    #[test]
    fn test_group_from_command_use_line() {
        let manager = manager(plain(), MemoryFlags::new("serve [flags]"));
        assert_eq!(manager.group(), "serve");

        let nested = Manager::with_groups(
            "app",
            plain(),
            MemoryFlags::new("join"),
            vec!["cluster".to_string(), "join".to_string()],
        )
        .unwrap();
        assert_eq!(nested.group(), "cluster-join");
        assert_eq!(nested.envs(), vec!["APP_CLUSTER_JOIN_A", "APP_CLUSTER_JOIN_B"]);
    }

    #[test]
    fn test_envs() {
        let manager = manager(plain(), MemoryFlags::new("naru"));
        assert_eq!(manager.envs(), vec!["NARU_A", "NARU_B"]);

        let named = Manager::new("myapp", plain(), MemoryFlags::new("naru")).unwrap();
        let a = named.get("a").unwrap();
        assert_eq!(named.env_name(a), "MYAPP_NARU_A");
    }

    #[test]
    fn test_merge_from_flags() {
        let mut flags = MemoryFlags::new("naru");
        flags.set("a", Value::I32(10)).set("b", Value::from("20"));

        let mut manager = manager(plain(), flags);
        manager.merge().unwrap();

        assert_eq!(manager.get_value::<i32>("a").unwrap(), 10);
        assert_eq!(manager.get_value::<String>("b").unwrap(), "20");
    }

    #[test]
    fn test_unknown_flag_is_fatal() {
        let mut flags = MemoryFlags::new("naru");
        flags.set("c", Value::from("x"));

        let mut manager = manager(plain(), flags);
        let err = manager.merge().unwrap_err();
        assert_eq!(err.phase, Phase::Flags);
        assert_eq!(err.location(), "c");
        assert!(matches!(err.source, ConfigError::UnknownFlag { .. }));
    }

    #[test]
    fn test_parse_hook_wins() {
        let mut flags = MemoryFlags::new("naru");
        flags.set("a", Value::from("10"));

        let settings = WithHooks {
            fixed: true,
            ..WithHooks::default()
        };
        let mut manager = manager(settings, flags);
        assert_eq!(manager.flags().spec("a").unwrap().kind, Kind::String);

        manager.merge().unwrap();
        assert_eq!(manager.settings().a, 1000);
    }

    #[test]
    fn test_merge_from_config() {
        let mut manager = manager(WithHooks::default(), MemoryFlags::new("naru"));
        manager
            .add_config("yml", "naru:\n  a: \"10\"\n  b: \"2\"\nother:\n  a: 5\n")
            .unwrap();
        manager.merge().unwrap();

        assert_eq!(manager.settings().a, 10);
        assert_eq!(manager.settings().b, "2");
    }

    #[test]
    fn test_config_sources_layer() {
        let mut manager = manager(WithHooks::default(), MemoryFlags::new("naru"));
        manager.add_config("yml", "naru:\n  a: \"10\"\n  b: \"2\"\n").unwrap();
        manager.add_config("json", r#"{"naru": {"a": "3"}}"#).unwrap();
        manager.merge().unwrap();

        assert_eq!(manager.settings().a, 3);
        assert_eq!(manager.settings().b, "2");
    }

    #[test]
    fn test_config_unknown_keys_are_skipped() {
        let mut manager = manager(plain(), MemoryFlags::new("naru"));
        manager
            .add_config("toml", "top = 1\n[naru]\nmissing = 1\na = 7\n")
            .unwrap();
        manager.merge().unwrap();
        assert_eq!(manager.settings().a, 7);
    }

    #[test]
    fn test_config_type_mismatch_names_the_key() {
        let mut manager = manager(plain(), MemoryFlags::new("naru"));
        manager.add_config("json", r#"{"naru": {"a": "ten"}}"#).unwrap();

        let err = manager.merge().unwrap_err();
        assert_eq!(err.phase, Phase::Config);
        assert_eq!(err.location(), "naru.a");
        assert!(err.source.is_not_assignable());
        assert!(err.to_string().starts_with("failed to parse config, 'naru.a': "));
    }

    #[test]
    fn test_merge_from_env() {
        let mut manager = manager(WithHooks::default(), MemoryFlags::new("naru"));
        manager.set_env_lookup(from_pairs([("NARU_A", "33"), ("NARU_B", "from-env")]));
        manager.merge().unwrap();

        assert_eq!(manager.settings().a, 33);
        assert_eq!(manager.settings().b, "from-env");
    }

    #[test]
    fn test_env_without_hook_needs_string_leaf() {
        let mut manager = manager(plain(), MemoryFlags::new("naru"));
        manager.set_env_lookup(from_pairs([("NARU_A", "33")]));

        let err = manager.merge().unwrap_err();
        assert_eq!(err.phase, Phase::Env);
        assert_eq!(err.location(), "NARU_A");
        assert!(matches!(err.source, ConfigError::EnvParse { .. }));

        manager.set_use_env(false);
        assert!(manager.merge().is_ok());
        assert_eq!(manager.settings().a, 1);
    }

    #[test]
    fn test_precedence() {
        let mut flags = MemoryFlags::new("naru");
        flags.set("b", Value::from("flag"));

        let mut manager = manager(plain(), flags);
        manager.set_env_lookup(from_pairs([("NARU_B", "env")]));
        manager.add_config("json", r#"{"naru": {"a": 5, "b": "file"}}"#).unwrap();
        manager.merge().unwrap();

        assert_eq!(manager.settings().a, 5);
        assert_eq!(manager.settings().b, "flag");
    }

    #[test]
    fn test_group_merge_hook_runs_last() {
        let mut flags = MemoryFlags::new("naru");
        flags.set("b", Value::from("override"));

        let mut manager = manager(WithHooks::default(), flags);
        manager.merge().unwrap();
        assert_eq!(manager.settings().a, 200);
    }

    #[derive(Debug, Default)]
    struct Hooked {
        code: i32,
        label: String,
        retries: u32,
        tag: String,
        prefix: String,
        width: i64,
    }

    impl Group for Hooked {
        fn describe(schema: &mut Schema<Self>) {
            field!(schema, code)
                .parse(|raw: String| raw.trim().parse::<i32>().map_err(HookError::from))
                .parse_env(|raw: String| Ok::<_, HookError>(raw.len() as i32));
            field!(schema, label);
            field!(schema, retries)
                .merge(|n: &mut u32| {
                    *n = (*n).min(10);
                    Ok::<_, HookError>(())
                })
                .validate(|n: &u32| {
                    if *n > 10 {
                        return Err("too many retries");
                    }
                    Ok(())
                });
            field!(schema, tag);
            field!(schema, prefix).env("-").flag("-");
            field!(schema, width);
            schema
                .on_parse_env("label", |s: &Hooked, raw: String| {
                    Ok::<_, HookError>(format!("{}{raw}", s.prefix))
                })
                .on_merge("tag", |s: &mut Hooked| {
                    if s.tag.is_empty() {
                        s.tag = s.label.to_uppercase();
                    }
                    Ok::<_, HookError>(())
                })
                .on_flag_value("width", |s: &Hooked| Ok::<_, HookError>(i64::from(s.code) * 2));
        }
    }

    fn hooked() -> Hooked {
        Hooked {
            code: 21,
            label: "initial".to_string(),
            prefix: "env:".to_string(),
            ..Hooked::default()
        }
    }

    #[test]
    fn test_parse_env_hook_wins_over_parse_hook() {
        let mut from_env = manager(hooked(), MemoryFlags::new("naru"));
        from_env.set_env_lookup(from_pairs([("NARU_CODE", "abcd")]));
        from_env.merge().unwrap();
        assert_eq!(from_env.settings().code, 4);

        let mut flags = MemoryFlags::new("naru");
        flags.set("code", " 12 ");
        let mut from_flags = manager(hooked(), flags);
        assert_eq!(from_flags.flags().spec("code").unwrap().kind, Kind::String);
        from_flags.merge().unwrap();
        assert_eq!(from_flags.settings().code, 12);
    }

    #[test]
    fn test_group_parse_env_hook() {
        let mut manager = manager(hooked(), MemoryFlags::new("naru"));
        manager.set_env_lookup(from_pairs([("NARU_LABEL", "x")]));
        manager.merge().unwrap();
        assert_eq!(manager.settings().label, "env:x");
    }

    #[test]
    fn test_merge_hook_rewrites_before_validation() {
        let mut flags = MemoryFlags::new("naru");
        flags.set("retries", 50u32);

        let mut manager = manager(hooked(), flags);
        manager.merge().unwrap();
        assert_eq!(manager.settings().retries, 10);

        manager.settings_mut().retries = 50;
        manager.validate().unwrap();
        assert_eq!(manager.settings().retries, 10);
    }

    #[test]
    fn test_group_merge_hook_for_child() {
        let mut derived = manager(hooked(), MemoryFlags::new("naru"));
        derived.merge().unwrap();
        assert_eq!(derived.settings().tag, "INITIAL");

        let mut flags = MemoryFlags::new("naru");
        flags.set("tag", "kept");
        let mut kept = manager(hooked(), flags);
        kept.merge().unwrap();
        assert_eq!(kept.settings().tag, "kept");
    }

    #[test]
    fn test_group_flag_value_hook() {
        let manager = manager(hooked(), MemoryFlags::new("naru"));
        assert_eq!(manager.flags().spec("width").unwrap().default, Value::I64(42));
        assert_eq!(manager.store().get("naru.width"), Some(&Value::I64(42)));
        assert!(manager.flags().spec("prefix").is_none());
        assert!(manager.store().get("naru.prefix").is_none());
    }

    #[test]
    fn test_config_null_values_are_skipped() {
        let mut manager = manager(hooked(), MemoryFlags::new("naru"));
        manager
            .add_config("json", r#"{"naru": {"label": null, "tag": "set"}}"#)
            .unwrap();
        manager.merge().unwrap();

        assert_eq!(manager.settings().label, "initial");
        assert_eq!(manager.settings().tag, "set");
    }

    #[derive(Debug, Default)]
    struct Pool {
        size: u32,
        idle: Duration,
    }

    impl Group for Pool {
        fn describe(schema: &mut Schema<Self>) {
            field!(schema, size).validate(|n: &u32| {
                if *n == 0 {
                    return Err("pool size must be positive");
                }
                Ok(())
            });
            field!(schema, idle);
        }
    }

    #[derive(Debug, Default)]
    struct Service {
        pool: Option<Pool>,
        level: u8,
    }

    impl Group for Service {
        fn describe(schema: &mut Schema<Self>) {
            schema.optional_group("pool", |s| &s.pool, |s| &mut s.pool);
            field!(schema, level).flag_value(|_: &u8| Ok::<_, HookError>(3u8));
        }

        fn validate(&self) -> Result<(), HookError> {
            if self.level > 5 {
                return Err(format!("level {} is too high", self.level).into());
            }
            Ok(())
        }
    }

    #[test]
    fn test_validation_errors_carry_the_path() {
        let mut manager = manager(Service::default(), MemoryFlags::new("svc"));
        let err = manager.merge().unwrap_err();
        assert_eq!(err.phase, Phase::Validate);
        assert_eq!(err.location(), "pool.size");
        assert_eq!(
            err.to_string(),
            "failed to validate, 'pool.size': pool size must be positive"
        );

        manager.set_raw("pool.size", 4u32).unwrap();
        manager.set_raw("level", 9u8).unwrap();
        let err = manager.merge().unwrap_err();
        assert_eq!(err.location(), "");
        assert_eq!(err.to_string(), "failed to validate, '': level 9 is too high");
    }

    #[test]
    fn test_unset_optional_group_is_skipped() {
        let mut manager = manager(Service::default(), MemoryFlags::new("svc"));
        assert!(manager.settings().pool.is_some());

        manager.settings_mut().pool = None;
        manager.merge().unwrap();
        assert!(manager.get_value::<u32>("pool.size").unwrap_err().is_key_not_found());
    }

    #[test]
    fn test_flag_value_hook_sets_default() {
        let manager = manager(Service::default(), MemoryFlags::new("svc"));
        let spec = manager.flags().spec("level").unwrap();
        assert_eq!(spec.default, Value::U8(3));
        assert_eq!(manager.flags().spec("pool-idle").unwrap().kind, Kind::Duration);
    }

    #[test]
    fn test_config_durations() {
        let mut manager = manager(Service::default(), MemoryFlags::new("svc"));
        manager
            .add_config("yaml", "svc:\n  pool:\n    size: 2\n    idle: 90s\n")
            .unwrap();
        manager.merge().unwrap();

        let pool = manager.settings().pool.as_ref().unwrap();
        assert_eq!(pool.size, 2);
        assert_eq!(pool.idle, Duration::from_secs(90));
    }

    #[test]
    fn test_setters() {
        let mut manager = manager(WithHooks::default(), MemoryFlags::new("naru"));

        manager.set_value("a", "42").unwrap();
        assert_eq!(manager.settings().a, 42);

        assert!(manager.set_raw("a", "42").unwrap_err().is_not_assignable());
        assert!(manager.set_raw("zzz", 1i32).unwrap_err().is_key_not_found());
        manager.set_raw("a", 7i32).unwrap();
        assert_eq!(manager.get_value::<i32>("a").unwrap(), 7);
        assert!(manager.get_value::<String>("a").unwrap_err().is_not_assignable());
    }

    #[test]
    fn test_set_raw_refuses_groups() {
        let mut manager = manager(Service::default(), MemoryFlags::new("svc"));
        let err = manager.set_raw("pool", 1u32).unwrap_err();
        assert!(matches!(err, ConfigError::CannotSet { .. }));
    }

    #[test]
    fn test_config_pairs_and_store_string() {
        let mut manager = manager(plain(), MemoryFlags::new("naru"));
        manager.add_config("json", r#"{"naru": {"a": 9}}"#).unwrap();
        manager.merge().unwrap();

        assert_eq!(
            manager.config_pairs(),
            vec![
                ("a".to_string(), Value::I32(9)),
                ("b".to_string(), Value::from("2")),
            ]
        );

        let rendered = manager.store_string("toml").unwrap();
        assert!(rendered.starts_with("[naru]"));
        assert!(rendered.contains("a = 9"));
        assert!(rendered.contains("b = \"2\""));
    }

    #[test]
    fn test_add_config_rejects_formats() {
        let mut manager = manager(plain(), MemoryFlags::new("naru"));
        assert!(matches!(
            manager.add_config("xml", "<a/>"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
        assert!(manager.sources().is_empty());
    }

    #[derive(Debug, Default)]
    struct Clash {
        a_b: i32,
        a: Inner,
    }

    #[derive(Debug, Default)]
    struct Inner {
        b: i32,
    }

    impl Group for Inner {
        fn describe(schema: &mut Schema<Self>) {
            field!(schema, b);
        }
    }

    impl Group for Clash {
        fn describe(schema: &mut Schema<Self>) {
            field!(schema, a_b);
            schema.group("a", |s| &s.a, |s| &mut s.a);
        }
    }

    #[test]
    fn test_flag_name_collision() {
        let err = Manager::new("", Clash::default(), MemoryFlags::new("x")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName { ref name } if name == "a-b"));
    }
}
