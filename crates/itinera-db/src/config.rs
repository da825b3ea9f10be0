use std::env;

/// Database configuration.
///
/// Reads `ITINERA_DATABASE_URL`, falling back to
/// `postgresql://localhost:5432/itinera` when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
}

impl DbConfig {
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/itinera";

    /// Build a config from the environment.
    pub fn from_env() -> Self {
        let database_url =
            env::var("ITINERA_DATABASE_URL").unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self { database_url }
    }

    /// Build a config from an explicit URL (tests and CLI flags).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// An explicit URL when given, else the environment.
    pub fn from_env_or(url: Option<String>) -> Self {
        match url {
            Some(url) => Self::new(url),
            None => Self::from_env(),
        }
    }

    /// The database name component of the URL, when present.
    pub fn database_name(&self) -> Option<&str> {
        self.database_url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
    }

    /// The same host, pointed at the `postgres` maintenance database.
    /// Used to issue `CREATE DATABASE` when the target does not exist yet.
    pub fn maintenance_url(&self) -> String {
        match self.database_url.rfind('/') {
            Some(pos) => format!("{}/postgres", &self.database_url[..pos]),
            None => self.database_url.clone(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
