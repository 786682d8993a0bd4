use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LendingConfig {
    /// Run the consistency repair pass in the background.
    pub auto_repair: bool,
    pub repair_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepartmentsConfig {
    /// Departments seeded at startup.
    pub defaults: Vec<String>,
    /// Effective value of a feature flag without an explicit row.
    pub features_enabled_by_default: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub admin_token: Option<String>,
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub lending: LendingConfig,
    pub departments: DepartmentsConfig,
    pub security: Option<SecurityConfig>,
}

impl AppConfig {
    /// The admin token, if one is configured and non-empty.
    pub fn admin_token(&self) -> Option<&str> {
        self.security
            .as_ref()
            .and_then(|s| s.admin_token.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        let defaults: &str = include_str!("../config/default.toml");
        match ::config::Config::builder()
            .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

impl Default for LendingConfig {
    fn default() -> Self {
        // Mirror defaults from config/default.toml
        Self { auto_repair: true, repair_interval_secs: 3600 }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let defaults: &str = include_str!("../config/default.toml");
    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
        // Optional local file: scandy.toml (in CWD)
        .add_source(::config::File::with_name("scandy").required(false));

    if let Ok(custom_path) = std::env::var("SCANDY_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(
        ::config::Environment::with_prefix("SCANDY")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("departments.defaults")
            .try_parsing(true),
    );

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub(crate) fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    if cfg.database.url.trim().is_empty() {
        return Err(anyhow::anyhow!("database.url must not be empty"));
    }

    if cfg.lending.auto_repair && cfg.lending.repair_interval_secs < 60 {
        return Err(anyhow::anyhow!(
            "lending.repair_interval_secs must be >= 60 when auto_repair is enabled (got {})",
            cfg.lending.repair_interval_secs
        ));
    }

    for name in &cfg.departments.defaults {
        if name.trim().is_empty() {
            return Err(anyhow::anyhow!("departments.defaults must not contain empty names"));
        }
    }

    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        // sqlite:///C:/... auf Windows: führenden '/' vor dem Laufwerksbuchstaben entfernen
        #[cfg(windows)]
        let path = {
            let bytes = path.as_bytes();
            if bytes.len() >= 3 && bytes[0] == b'/' && bytes[2] == b':' && bytes[1].is_ascii_alphabetic() {
                &path[1..]
            } else {
                path
            }
        };
        let path = path.split('?').next().unwrap_or(path);
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}
