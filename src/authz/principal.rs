use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::Role;

/// The authenticated user as supplied by the identity/session provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: String,
    pub role: Role,
    pub home_branch: String,
    pub home_province: String,
    /// Explicit branch override; empty means "home branch only".
    #[serde(default)]
    pub allowed_branches: Vec<String>,
    #[serde(default)]
    pub allowed_provinces: Vec<String>,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, role: Role, home_branch: impl Into<String>, home_province: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            home_branch: home_branch.into(),
            home_province: home_province.into(),
            allowed_branches: Vec::new(),
            allowed_provinces: Vec::new(),
        }
    }

    pub fn with_allowed_branches<I, S>(mut self, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_branches = branches.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_allowed_provinces<I, S>(mut self, provinces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_provinces = provinces.into_iter().map(Into::into).collect();
        self
    }
}

/// Resource context for geographically scoped permission checks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province_id: Option<String>,
}

impl ResourceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_branch(mut self, branch_id: impl Into<String>) -> Self {
        self.branch_id = Some(branch_id.into());
        self
    }

    pub fn with_province(mut self, province_id: impl Into<String>) -> Self {
        self.province_id = Some(province_id.into());
        self
    }
}
