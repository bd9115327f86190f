//! Resolving a small server configuration from every source.
//!
//! Try it with:
//!
//! ```text
//! MYAPP_SERVE_DATABASE_HOST=db.prod cargo run --example basic_usage -- --port 9000
//! ```

use clap::Command;
use spicetree::{field, ClapFlags, Group, HookError, Manager, Schema};
use std::time::Duration;

#[derive(Debug, Default)]
struct Database {
    host: String,
    pool_size: u32,
    idle: Duration,
}

impl Group for Database {
    fn describe(schema: &mut Schema<Self>) {
        field!(schema, host).help("Database host");
        field!(schema, pool_size).help("Connections kept open");
        field!(schema, idle).help("Idle timeout, e.g. 90s or 5m");
    }

    fn validate(&self) -> Result<(), HookError> {
        if self.pool_size == 0 {
            return Err("pool size must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Settings {
    verbose: bool,
    port: u16,
    database: Database,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            verbose: false,
            port: 8080,
            database: Database {
                host: "localhost".to_string(),
                pool_size: 4,
                idle: Duration::from_secs(60),
            },
        }
    }
}

impl Group for Settings {
    fn describe(schema: &mut Schema<Self>) {
        field!(schema, verbose).help("Enable verbose output");
        field!(schema, port)
            .help("Listen port")
            .parse(|raw: i64| u16::try_from(raw).map_err(HookError::from));
        schema.group("database", |s| &s.database, |s| &mut s.database);
    }
}

const CONFIG: &str = r#"
[serve]
port = 8081

[serve.database]
pool_size = 8
idle = "90s"
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    spicetree::logging::init();

    let command = Command::new("serve").about("Example server using spicetree");
    let mut manager = Manager::new("myapp", Settings::default(), ClapFlags::new(command))?;

    println!("Environment variables read:");
    for env in manager.envs() {
        println!("  {env}");
    }

    manager.add_config("toml", CONFIG)?;
    manager.flags_mut().parse_from(std::env::args())?;
    manager.merge()?;

    println!("Resolved settings:");
    for (key, value) in manager.config_pairs() {
        println!("  {key} = {value}");
    }

    let settings = manager.into_settings();
    if settings.verbose {
        println!("{settings:#?}");
    }
    Ok(())
}
