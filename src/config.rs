use std::env;

/// Runtime configuration, read once at startup.
///
/// Every value has a development default so the engine can run against a
/// local PostgreSQL without any environment set up. Production deployments
/// override through the environment (or a `.env` file, loaded by
/// [`Settings::from_env`]).
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,

    /// Hard ceiling on registered accounts, admin included.
    pub user_limit: i64,

    pub admin_username: String,
    pub admin_password: String,
    pub admin_department: String,

    pub openai_api_key: Option<String>,
    pub model_name: String,
    pub max_tokens: u32,
    pub temperature: f64,

    /// Directory CSV exports are written into.
    pub export_dir: String,
}

pub const DEFAULT_USER_LIMIT: i64 = 50;

impl Settings {
    /// Loads settings from the process environment, reading `.env` first
    /// if one is present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Settings {
            db_host: env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            db_port: env::var("DB_PORT")
                .unwrap_or_else(|_| "5432".to_string())
                .parse()
                .unwrap_or(5432),
            db_name: env::var("DB_NAME").unwrap_or_else(|_| "phishguard_db".to_string()),
            db_user: env::var("DB_USER").unwrap_or_else(|_| "phishguard".to_string()),
            db_password: env::var("DB_PASSWORD").unwrap_or_else(|_| "".to_string()),
            user_limit: env::var("PHISHGUARD_USER_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_USER_LIMIT),
            admin_username: env::var("PHISHGUARD_ADMIN_USER")
                .unwrap_or_else(|_| "admin".to_string()),
            admin_password: env::var("PHISHGUARD_ADMIN_PASSWORD")
                .unwrap_or_else(|_| "admin123".to_string()),
            admin_department: env::var("PHISHGUARD_ADMIN_DEPARTMENT")
                .unwrap_or_else(|_| "TI".to_string()),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            model_name: env::var("PHISHGUARD_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            max_tokens: env::var("PHISHGUARD_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(200),
            temperature: env::var("PHISHGUARD_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.7),
            export_dir: env::var("PHISHGUARD_EXPORT_DIR").unwrap_or_else(|_| "exports".to_string()),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        // Defaults without touching the environment; used by tests.
        Settings {
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_name: "phishguard_db".to_string(),
            db_user: "phishguard".to_string(),
            db_password: "".to_string(),
            user_limit: DEFAULT_USER_LIMIT,
            admin_username: "admin".to_string(),
            admin_password: "admin123".to_string(),
            admin_department: "TI".to_string(),
            openai_api_key: None,
            model_name: "gpt-4o-mini".to_string(),
            max_tokens: 200,
            temperature: 0.7,
            export_dir: "exports".to_string(),
        }
    }
}
