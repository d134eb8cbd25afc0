use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

impl Database {
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Auth {
    pub session_ttl_hours: i64,
    /// Seeded as the first Admin when the users table is empty.
    pub bootstrap_email: String,
    /// Left unset, a random password is generated and logged once at startup.
    pub bootstrap_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Upload {
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Students {
    /// Municipalities reported with `areaType = "Urban"`; everything else is rural.
    pub urban_municipalities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: Server,
    pub database: Database,
    pub auth: Auth,
    pub upload: Upload,
    pub students: Students,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: Server {
                host: "0.0.0.0".into(),
                port: 8000,
            },
            database: Database {
                url: "sqlite://freshgroup.db?mode=rwc".into(),
                max_connections: 5,
            },
            auth: Auth {
                session_ttl_hours: 24,
                bootstrap_email: "admin@freshgroup.local".into(),
                bootstrap_password: None,
            },
            upload: Upload {
                max_bytes: 20 * 1024 * 1024,
            },
            students: Students {
                urban_municipalities: Vec::new(),
            },
        }
    }
}

impl Settings {
    /// Defaults, then `freshgroup.toml`, then `FRESHGROUP_*` variables
    /// (`FRESHGROUP_SERVER__PORT=9000`).
    pub fn new() -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let config = Config::builder()
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", defaults.server.port)?
            .set_default("database.url", defaults.database.url)?
            .set_default("database.max_connections", defaults.database.max_connections)?
            .set_default("auth.session_ttl_hours", defaults.auth.session_ttl_hours)?
            .set_default("auth.bootstrap_email", defaults.auth.bootstrap_email)?
            .set_default("upload.max_bytes", defaults.upload.max_bytes as u64)?
            .set_default("students.urban_municipalities", Vec::<String>::new())?
            .add_source(
                File::with_name("freshgroup.toml")
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("FRESHGROUP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("students.urban_municipalities")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Settings for tests and one-off tools: a single-connection in-memory
    /// database whose bootstrap Admin signs in with `changeme`.
    pub fn in_memory() -> Self {
        let mut settings = Settings::default();
        settings.database.url = "sqlite::memory:".into();
        settings.database.max_connections = 1;
        settings.auth.bootstrap_password = Some("changeme".into());
        settings
    }
}
