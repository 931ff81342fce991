use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::authz::{RoleRegistry, RoleTable};
use crate::errors::{AppError, AppResult};
use crate::geo::{GeoDirectory, GeographicScope};
use crate::migration::DEFAULT_GOVERNED_COLLECTIONS;
use crate::notifications::StaticUserDirectory;

/// Process configuration read from the environment (after `.env` loading).
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// SQLite url; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub port: u16,
    pub notification_timeout: Duration,
    pub role_table_path: Option<PathBuf>,
    pub geo_directory_path: Option<PathBuf>,
    pub user_directory_path: Option<PathBuf>,
    pub governed_collections: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            port: 8000,
            notification_timeout: Duration::from_millis(2000),
            role_table_path: None,
            geo_directory_path: None,
            user_directory_path: None,
            governed_collections: DEFAULT_GOVERNED_COLLECTIONS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match var("APP_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| AppError::configuration("APP_PORT must be a valid port number"))?,
            None => defaults.port,
        };

        let notification_timeout = match var("NOTIFICATION_TIMEOUT_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| AppError::configuration("NOTIFICATION_TIMEOUT_MS must be a valid integer"))?,
            None => defaults.notification_timeout,
        };

        let governed_collections = match var("GOVERNED_COLLECTIONS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.governed_collections,
        };

        Ok(Self {
            database_url: var("DATABASE_URL"),
            port,
            notification_timeout,
            role_table_path: var("ROLE_TABLE_PATH").map(PathBuf::from),
            geo_directory_path: var("GEO_DIRECTORY_PATH").map(PathBuf::from),
            user_directory_path: var("USER_DIRECTORY_PATH").map(PathBuf::from),
            governed_collections,
        })
    }

    pub fn load_registry(&self) -> AppResult<RoleRegistry> {
        let table = match &self.role_table_path {
            Some(path) => RoleTable::from_path(path)?,
            None => RoleTable::dealership_default(),
        };
        RoleRegistry::from_table(table)
    }

    pub fn load_directory(&self) -> AppResult<GeoDirectory> {
        match &self.geo_directory_path {
            Some(path) => GeoDirectory::from_path(path),
            None => Ok(GeoDirectory::dealership_default()),
        }
    }

    pub fn load_users(&self, scope: Arc<GeographicScope>) -> AppResult<StaticUserDirectory> {
        match &self.user_directory_path {
            Some(path) => StaticUserDirectory::from_path(path, scope),
            None => Ok(StaticUserDirectory::empty(scope)),
        }
    }
}
