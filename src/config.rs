use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub cookie_ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct ResetConfig {
    pub ttl_minutes: i64,
    /// Scheme and host that reset links point at, without a trailing slash.
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub starttls: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub environment: Environment,
    pub jwt: JwtConfig,
    pub reset: ResetConfig,
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let number = |key: &'static str, default: i64| match lookup(key) {
            None => Ok(default),
            Some(v) => match v.parse::<i64>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(ConfigError::Invalid { key, value: v }),
            },
        };

        let environment = match lookup("APP_ENV").as_deref() {
            Some("production") => Environment::Production,
            _ => Environment::Development,
        };

        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "natours".into()),
            audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| "natours-users".into()),
            ttl_minutes: number("JWT_TTL_MINUTES", 60 * 24 * 90)?,
            cookie_ttl_minutes: number("JWT_COOKIE_EXPIRES_MINUTES", 60 * 24 * 90)?,
        };

        let reset = ResetConfig {
            ttl_minutes: number("PASSWORD_RESET_EXPIRES_MINUTES", 10)?,
            public_base_url: lookup("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8080".into())
                .trim_end_matches('/')
                .to_string(),
        };

        let port = match lookup("MAIL_PORT") {
            None => 587,
            Some(v) => v.parse::<u16>().map_err(|_| ConfigError::Invalid {
                key: "MAIL_PORT",
                value: v,
            })?,
        };
        let mail = MailConfig {
            host: required("MAIL_HOST")?,
            port,
            username: lookup("MAIL_USERNAME"),
            password: lookup("MAIL_PASSWORD"),
            from: lookup("MAIL_FROM").unwrap_or_else(|| "Natours <hello@natours.io>".into()),
            starttls: lookup("MAIL_STARTTLS").map(|v| v == "true").unwrap_or(false),
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            environment,
            jwt,
            reset,
            mail,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}
