use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::authz::{CurrentUser, Role};
use crate::errors::{AppError, AppResult};
use crate::geo::GeographicScope;

/// Resolves who should be told that a step is waiting on them.
#[async_trait]
pub trait ApproverDirectory: Send + Sync {
    /// Ids of users holding `role` with `branch` in their scope.
    async fn approvers_for(&self, role: Role, branch: &str) -> AppResult<BTreeSet<String>>;
}

/// Fixed user list, typically loaded from `USER_DIRECTORY_PATH`.
#[derive(Debug, Clone)]
pub struct StaticUserDirectory {
    users: Vec<CurrentUser>,
    scope: Arc<GeographicScope>,
}

impl StaticUserDirectory {
    pub fn new(users: Vec<CurrentUser>, scope: Arc<GeographicScope>) -> Self {
        Self { users, scope }
    }

    pub fn empty(scope: Arc<GeographicScope>) -> Self {
        Self::new(Vec::new(), scope)
    }

    pub fn from_json(text: &str, scope: Arc<GeographicScope>) -> AppResult<Self> {
        let de = &mut serde_json::Deserializer::from_str(text);
        let users: Vec<CurrentUser> = serde_path_to_error::deserialize(de).map_err(|err| {
            AppError::configuration(format!("user directory at `{}`: {}", err.path(), err.inner()))
        })?;
        Ok(Self::new(users, scope))
    }

    pub fn from_path(path: impl AsRef<Path>, scope: Arc<GeographicScope>) -> AppResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            AppError::configuration(format!("cannot read user directory {}: {err}", path.display()))
        })?;
        Self::from_json(&text, scope)
    }

    pub fn users(&self) -> &[CurrentUser] {
        &self.users
    }
}

#[async_trait]
impl ApproverDirectory for StaticUserDirectory {
    async fn approvers_for(&self, role: Role, branch: &str) -> AppResult<BTreeSet<String>> {
        Ok(self
            .users
            .iter()
            .filter(|user| user.role == role && self.scope.can_access_branch(user, branch))
            .map(|user| user.id.clone())
            .collect())
    }
}
