//! # spicetree
//!
//! Resolves a typed settings object from environment variables, configuration
//! files and command line flags.
//!
//! A settings type describes its fields once through [`Group`]. From that
//! description the [`Manager`] builds an item tree, derives a canonical name,
//! a flag name and an environment variable for every field, registers the
//! flags and finally merges every source into the object in place.
//!
//! ## Precedence
//!
//! Sources are merged in this order, each one overriding the previous:
//!
//! 1. **Current values** - Whatever the object held when the manager was built
//! 2. **Environment variables** - `<NAME>_<GROUP>_<PATH>`
//! 3. **Configuration files** - JSON, YAML, TOML or INI, under a `<group>` key
//! 4. **Command line flags** - Only flags explicitly set by the user
//!
//! Merge and validation hooks run after all sources, children before parents.
//!
//! ## Quick Start
//!
//! ```rust
//! # #[cfg(feature = "cli")]
//! # {
//! use clap::Command;
//! use spicetree::{field, ClapFlags, Group, HookError, Manager, Schema};
//!
//! #[derive(Debug, Default)]
//! struct Database {
//!     host: String,
//!     pool_size: u32,
//! }
//!
//! impl Group for Database {
//!     fn describe(schema: &mut Schema<Self>) {
//!         field!(schema, host).help("database host");
//!         field!(schema, pool_size);
//!     }
//!
//!     fn validate(&self) -> Result<(), HookError> {
//!         if self.pool_size == 0 {
//!             return Err("pool size must be positive".into());
//!         }
//!         Ok(())
//!     }
//! }
//!
//! #[derive(Debug, Default)]
//! struct Settings {
//!     verbose: bool,
//!     database: Database,
//! }
//!
//! impl Group for Settings {
//!     fn describe(schema: &mut Schema<Self>) {
//!         field!(schema, verbose);
//!         schema.group("database", |s| &s.database, |s| &mut s.database);
//!     }
//! }
//!
//! let flags = ClapFlags::new(Command::new("serve"));
//! let mut manager = Manager::new("myapp", Settings::default(), flags).unwrap();
//!
//! manager
//!     .add_config("toml", "[serve.database]\nhost = \"db.local\"\npool_size = 4\n")
//!     .unwrap();
//! manager
//!     .flags_mut()
//!     .parse_from(["serve", "--verbose", "--database-pool-size", "8"])
//!     .unwrap();
//! manager.set_env_lookup(|name| {
//!     (name == "MYAPP_SERVE_DATABASE_HOST").then(|| "db.prod".to_string())
//! });
//! manager.merge().unwrap();
//!
//! let settings = manager.settings();
//! assert!(settings.verbose);
//! assert_eq!(settings.database.host, "db.local");
//! assert_eq!(settings.database.pool_size, 8);
//! # }
//! ```
//!
//! ## Names
//!
//! | Field path | Canonical name | Flag | Environment (`myapp`, group `serve`) |
//! |---|---|---|---|
//! | `database.pool_size` | `database.pool_size` | `--database-pool-size` | `MYAPP_SERVE_DATABASE_POOL_SIZE` |
//! | `TestFindMe` | `test_find_me` | `--test-find-me` | `MYAPP_SERVE_TEST_FIND_ME` |
//!
//! Fields opt out with `.flag("-")` or `.env("-")` and rename themselves with
//! `.flag("name")` or `.env("NAME")`.
//!
//! ## Hooks
//!
//! A field can carry its own `parse`, `parse_env`, `validate`, `merge` and
//! `flag_value` hooks, and its group can register the same hooks for it with
//! `on_parse`, `on_parse_env`, `on_validate`, `on_merge` and `on_flag_value`.
//! The field's own hook is preferred. A parse hook's input type decides the
//! kind of flag the field is registered as.

pub mod cli;
pub mod env;
pub mod error;
pub mod hooks;
pub mod item;
pub mod kind;
pub mod logging;
pub mod manager;
pub mod naming;
pub mod parser;
pub mod schema;
pub mod source;
pub mod value;

// Re-export main types for convenience
pub use cli::{FlagRegistry, FlagSpec, MemoryFlags};
pub use error::{ConfigError, ConfigResult, HookError, MergeError, Phase};
pub use hooks::HookFamily;
pub use item::{Item, ItemId, ItemTree};
pub use manager::Manager;
pub use schema::{Field, Group, GroupField, Schema, Tags};
pub use value::{FieldType, Kind, Value};

#[cfg(feature = "cli")]
pub use cli::ClapFlags;
