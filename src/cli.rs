//! Command line flag registration.
//!
//! The manager talks to flags through [`FlagRegistry`]: it registers one flag
//! per flagged leaf, then asks which flags were set on the command line and
//! what they captured. [`ClapFlags`] implements it on top of a clap
//! [`Command`](clap::Command); [`MemoryFlags`] keeps everything in memory.

use crate::error::{ConfigError, ConfigResult};
use crate::value::{Kind, Value};

/// A flag the manager asks the registry to expose.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagSpec {
    /// Long flag name, e.g. `database-pool-size`
    pub name: String,
    /// Primitive kind the captured value must have
    pub kind: Kind,
    /// Default shown to the user and captured when the flag is absent
    pub default: Value,
    pub help: Option<String>,
}

/// Flag registry collaborator of the [`Manager`](crate::Manager).
pub trait FlagRegistry {
    /// Name of the command the flags belong to, used as the settings group.
    fn command_name(&self) -> &str;

    /// Registers a flag.
    ///
    /// # Errors
    /// * `ConfigError::DuplicateName` - If the name is taken
    fn register(&mut self, spec: FlagSpec) -> ConfigResult<()>;

    /// Names of the flags explicitly set by the user.
    fn changed(&self) -> Vec<String>;

    /// The value captured for a flag, typed by its registered kind.
    fn captured(&self, name: &str) -> Option<Value>;
}

fn check_reserved(name: &str, taken: bool) -> ConfigResult<()> {
    if taken || name == "help" || name == "version" {
        return Err(ConfigError::DuplicateName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// In-memory registry, for programs that parse arguments themselves.
///
/// # Example
/// ```
/// use spicetree::cli::{FlagRegistry, MemoryFlags};
/// use spicetree::Value;
///
/// let mut flags = MemoryFlags::new("serve");
/// flags.set("port", Value::I32(8080));
/// assert_eq!(flags.changed(), vec!["port"]);
/// assert_eq!(flags.captured("port"), Some(Value::I32(8080)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryFlags {
    name: String,
    specs: Vec<FlagSpec>,
    values: Vec<(String, Value)>,
}

impl MemoryFlags {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Marks a flag as set on the command line with `value`.
    pub fn set(&mut self, flag: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        match self.values.iter_mut().find(|(name, _)| name == flag) {
            Some(entry) => entry.1 = value,
            None => self.values.push((flag.to_string(), value)),
        }
        self
    }

    pub fn specs(&self) -> &[FlagSpec] {
        &self.specs
    }

    pub fn spec(&self, name: &str) -> Option<&FlagSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }
}

impl FlagRegistry for MemoryFlags {
    fn command_name(&self) -> &str {
        &self.name
    }

    fn register(&mut self, spec: FlagSpec) -> ConfigResult<()> {
        check_reserved(&spec.name, self.spec(&spec.name).is_some())?;
        self.specs.push(spec);
        Ok(())
    }

    fn changed(&self) -> Vec<String> {
        self.values.iter().map(|(name, _)| name.clone()).collect()
    }

    fn captured(&self, name: &str) -> Option<Value> {
        self.values
            .iter()
            .find(|(flag, _)| flag == name)
            .map(|(_, value)| value.clone())
            .or_else(|| self.spec(name).map(|spec| spec.default.clone()))
    }
}

#[cfg(feature = "cli")]
pub use self::clap_flags::ClapFlags;

#[cfg(feature = "cli")]
mod clap_flags {
    use super::{check_reserved, FlagRegistry, FlagSpec};
    use crate::error::{ConfigError, ConfigResult};
    use crate::value::{parse_duration, Kind, Value};
    use clap::parser::ValueSource;
    use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
    use std::collections::HashMap;
    use std::ffi::OsString;

    /// Flag registry backed by a clap [`Command`].
    ///
    /// Every registered flag becomes a `--long` argument with a typed value
    /// parser. Boolean flags accept `--flag`, `--flag=true` and `--flag=false`.
    ///
    /// # Example
    /// ```
    /// use clap::Command;
    /// use spicetree::cli::{ClapFlags, FlagRegistry, FlagSpec};
    /// use spicetree::{Kind, Value};
    ///
    /// let mut flags = ClapFlags::new(Command::new("serve"));
    /// flags
    ///     .register(FlagSpec {
    ///         name: "port".to_string(),
    ///         kind: Kind::U16,
    ///         default: Value::U16(80),
    ///         help: None,
    ///     })
    ///     .unwrap();
    /// flags.parse_from(["serve", "--port", "8080"]).unwrap();
    ///
    /// assert_eq!(flags.changed(), vec!["port"]);
    /// assert_eq!(flags.captured("port"), Some(Value::U16(8080)));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ClapFlags {
        command: Command,
        matches: Option<ArgMatches>,
        specs: HashMap<String, FlagSpec>,
    }

    impl ClapFlags {
        pub fn new(command: Command) -> Self {
            Self {
                command,
                matches: None,
                specs: HashMap::new(),
            }
        }

        /// The command with every registered flag attached.
        pub fn command(&self) -> &Command {
            &self.command
        }

        pub fn into_command(self) -> Command {
            self.command
        }

        /// Parses `args` against the command; the first item is the binary name.
        ///
        /// # Errors
        /// * `ConfigError::Flags` - If clap rejects the arguments
        pub fn parse_from<I, T>(&mut self, args: I) -> ConfigResult<()>
        where
            I: IntoIterator<Item = T>,
            T: Into<OsString> + Clone,
        {
            let matches = self
                .command
                .try_get_matches_from_mut(args)
                .map_err(|e| ConfigError::Flags(e.to_string()))?;
            self.matches = Some(matches);
            Ok(())
        }

        /// Uses matches produced elsewhere, e.g. by a parent command.
        pub fn set_matches(&mut self, matches: ArgMatches) {
            self.matches = Some(matches);
        }

        pub fn matches(&self) -> Option<&ArgMatches> {
            self.matches.as_ref()
        }

        pub fn spec(&self, name: &str) -> Option<&FlagSpec> {
            self.specs.get(name)
        }

        fn build_arg(spec: &FlagSpec) -> Arg {
            let mut arg = Arg::new(spec.name.clone())
                .long(spec.name.clone())
                .action(ArgAction::Set);

            if let Some(help) = &spec.help {
                arg = arg.help(help.clone());
            }

            let default = spec.default.to_string();
            if !default.is_empty() {
                arg = arg.default_value(default);
            }

            match spec.kind {
                Kind::Bool => arg
                    .value_parser(value_parser!(bool))
                    .num_args(0..=1)
                    .require_equals(true)
                    .default_missing_value("true"),
                Kind::I8 => arg
                    .value_parser(value_parser!(i8))
                    .allow_negative_numbers(true),
                Kind::I16 => arg
                    .value_parser(value_parser!(i16))
                    .allow_negative_numbers(true),
                Kind::I32 => arg
                    .value_parser(value_parser!(i32))
                    .allow_negative_numbers(true),
                Kind::I64 => arg
                    .value_parser(value_parser!(i64))
                    .allow_negative_numbers(true),
                Kind::U8 => arg.value_parser(value_parser!(u8)),
                Kind::U16 => arg.value_parser(value_parser!(u16)),
                Kind::U32 => arg.value_parser(value_parser!(u32)),
                Kind::U64 => arg.value_parser(value_parser!(u64)),
                Kind::F32 => arg
                    .value_parser(value_parser!(f32))
                    .allow_negative_numbers(true),
                Kind::F64 => arg
                    .value_parser(value_parser!(f64))
                    .allow_negative_numbers(true),
                Kind::String => arg.value_parser(value_parser!(String)),
                Kind::Duration => arg.value_parser(parse_duration),
            }
        }
    }

    fn one<T>(matches: &ArgMatches, name: &str) -> Option<Value>
    where
        T: Clone + Send + Sync + 'static,
        Value: From<T>,
    {
        matches
            .try_get_one::<T>(name)
            .ok()
            .flatten()
            .cloned()
            .map(Value::from)
    }

    impl FlagRegistry for ClapFlags {
        fn command_name(&self) -> &str {
            self.command.get_name()
        }

        fn register(&mut self, spec: FlagSpec) -> ConfigResult<()> {
            let taken = self
                .command
                .get_arguments()
                .any(|arg| arg.get_id().as_str() == spec.name);
            check_reserved(&spec.name, taken)?;

            let arg = Self::build_arg(&spec);
            self.command = std::mem::take(&mut self.command).arg(arg);
            self.specs.insert(spec.name.clone(), spec);
            Ok(())
        }

        fn changed(&self) -> Vec<String> {
            let Some(matches) = &self.matches else {
                return Vec::new();
            };
            matches
                .ids()
                .map(|id| id.as_str())
                .filter(|id| matches.value_source(id) == Some(ValueSource::CommandLine))
                .map(str::to_string)
                .collect()
        }

        fn captured(&self, name: &str) -> Option<Value> {
            let matches = self.matches.as_ref()?;
            match self.specs.get(name).map(|spec| spec.kind) {
                Some(Kind::Bool) => one::<bool>(matches, name),
                Some(Kind::I8) => one::<i8>(matches, name),
                Some(Kind::I16) => one::<i16>(matches, name),
                Some(Kind::I32) => one::<i32>(matches, name),
                Some(Kind::I64) => one::<i64>(matches, name),
                Some(Kind::U8) => one::<u8>(matches, name),
                Some(Kind::U16) => one::<u16>(matches, name),
                Some(Kind::U32) => one::<u32>(matches, name),
                Some(Kind::U64) => one::<u64>(matches, name),
                Some(Kind::F32) => one::<f32>(matches, name),
                Some(Kind::F64) => one::<f64>(matches, name),
                Some(Kind::Duration) => one::<std::time::Duration>(matches, name),
                // Arguments attached to the command outside the registry
                Some(Kind::String) | None => one::<String>(matches, name),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::time::Duration;

        fn spec(name: &str, kind: Kind, default: Value) -> FlagSpec {
            FlagSpec {
                name: name.to_string(),
                kind,
                default,
                help: Some(format!("{name} flag")),
            }
        }

        fn registry() -> ClapFlags {
            let mut flags = ClapFlags::new(Command::new("naru"));
            flags.register(spec("a", Kind::I32, Value::I32(0))).unwrap();
            flags.register(spec("b", Kind::String, Value::from(""))).unwrap();
            flags.register(spec("debug", Kind::Bool, Value::Bool(false))).unwrap();
            flags
                .register(spec(
                    "timeout",
                    Kind::Duration,
                    Value::Duration(Duration::from_secs(30)),
                ))
                .unwrap();
            flags
        }

        #[test]
        fn test_typed_values() {
            let mut flags = registry();
            flags
                .parse_from(["naru", "--a", "10", "--b", "20", "--timeout", "1m"])
                .unwrap();

            assert_eq!(flags.captured("a"), Some(Value::I32(10)));
            assert_eq!(flags.captured("b"), Some(Value::from("20")));
            assert_eq!(
                flags.captured("timeout"),
                Some(Value::Duration(Duration::from_secs(60)))
            );

            let mut changed = flags.changed();
            changed.sort();
            assert_eq!(changed, vec!["a", "b", "timeout"]);
        }

        #[test]
        fn test_defaults_are_captured_but_not_changed() {
            let mut flags = registry();
            flags.parse_from(["naru"]).unwrap();

            assert!(flags.changed().is_empty());
            assert_eq!(flags.captured("a"), Some(Value::I32(0)));
            assert_eq!(flags.captured("debug"), Some(Value::Bool(false)));
            assert_eq!(
                flags.captured("timeout"),
                Some(Value::Duration(Duration::from_secs(30)))
            );
            // Empty defaults are not registered
            assert_eq!(flags.captured("b"), None);
        }

        #[test]
        fn test_bool_forms() {
            let mut flags = registry();
            flags.parse_from(["naru", "--debug"]).unwrap();
            assert_eq!(flags.captured("debug"), Some(Value::Bool(true)));

            let mut flags = registry();
            flags.parse_from(["naru", "--debug=false"]).unwrap();
            assert_eq!(flags.captured("debug"), Some(Value::Bool(false)));
            assert_eq!(flags.changed(), vec!["debug"]);
        }

        #[test]
        fn test_negative_numbers() {
            let mut flags = registry();
            flags
                .register(spec("ratio", Kind::F64, Value::F64(1.0)))
                .unwrap();
            flags
                .parse_from(["naru", "--a", "-5", "--ratio", "-0.5"])
                .unwrap();

            assert_eq!(flags.captured("a"), Some(Value::I32(-5)));
            assert_eq!(flags.captured("ratio"), Some(Value::F64(-0.5)));
        }

        #[test]
        fn test_invalid_value_is_flag_error() {
            let mut flags = registry();
            let err = flags.parse_from(["naru", "--a", "ten"]).unwrap_err();
            assert!(matches!(err, ConfigError::Flags(_)));

            let mut flags = registry();
            assert!(flags.parse_from(["naru", "--timeout", "soon"]).is_err());
        }

        #[test]
        fn test_duplicate_and_reserved_names() {
            let mut flags = registry();
            let err = flags.register(spec("a", Kind::I32, Value::I32(1))).unwrap_err();
            assert!(matches!(err, ConfigError::DuplicateName { .. }));
            assert!(flags.register(spec("help", Kind::Bool, Value::Bool(false))).is_err());
            assert!(flags.register(spec("version", Kind::Bool, Value::Bool(false))).is_err());
        }

        #[test]
        fn test_command_carries_help() {
            let flags = registry();
            assert_eq!(flags.command_name(), "naru");
            let arg = flags
                .command()
                .get_arguments()
                .find(|arg| arg.get_id().as_str() == "a")
                .unwrap();
            assert_eq!(arg.get_long(), Some("a"));
            assert_eq!(arg.get_help().map(|h| h.to_string()), Some("a flag".to_string()));
        }

        #[test]
        fn test_captured_before_parse() {
            let flags = registry();
            assert_eq!(flags.captured("a"), None);
            assert!(flags.changed().is_empty());
        }
    }
}
