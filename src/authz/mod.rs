//! Authorization module - role registry and permission resolution
//!
//! This module implements the dealership RBAC engine with support for:
//! - A closed set of roles ranked by authority level (lower = more authority)
//! - Permission inheritance along role category chains
//! - Geographic (branch/province) scoping of every check

mod evaluator;
mod principal;
mod registry;

pub use evaluator::{PermissionGrant, PermissionResolver, PolicyEvaluator};
pub use principal::{CurrentUser, ResourceContext};
pub use registry::{CategoryConfig, RoleConfig, RoleRegistry, RoleTable};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::AppError;

/// Permission required to act on an approval step.
pub const APPROVE_PERMISSION: Permission = Permission::DocumentApprove;

/// Every role known to the dealership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    Executive,
    GeneralManager,
    ProvinceManager,
    BranchManager,
    Lead,
    Staff,
    Accountant,
    AccountingOfficer,
    SalesStaff,
    CreditOfficer,
    WarehouseStaff,
    HrOfficer,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 14] = [
        Role::SuperAdmin,
        Role::Executive,
        Role::GeneralManager,
        Role::ProvinceManager,
        Role::BranchManager,
        Role::Lead,
        Role::Staff,
        Role::Accountant,
        Role::AccountingOfficer,
        Role::SalesStaff,
        Role::CreditOfficer,
        Role::WarehouseStaff,
        Role::HrOfficer,
        Role::Viewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::Executive => "EXECUTIVE",
            Role::GeneralManager => "GENERAL_MANAGER",
            Role::ProvinceManager => "PROVINCE_MANAGER",
            Role::BranchManager => "BRANCH_MANAGER",
            Role::Lead => "LEAD",
            Role::Staff => "STAFF",
            Role::Accountant => "ACCOUNTANT",
            Role::AccountingOfficer => "ACCOUNTING_OFFICER",
            Role::SalesStaff => "SALES_STAFF",
            Role::CreditOfficer => "CREDIT_OFFICER",
            Role::WarehouseStaff => "WAREHOUSE_STAFF",
            Role::HrOfficer => "HR_OFFICER",
            Role::Viewer => "VIEWER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::configuration(format!("unknown role `{s}`")))
    }
}

/// The global permission enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    // Documents and approvals
    DocumentView,
    DocumentCreate,
    DocumentApprove,
    DocumentCancelAny,

    // Sales
    SalesView,
    SalesManage,

    // Accounting
    AccountingView,
    AccountingPost,

    // Credit
    CreditView,
    CreditApprove,

    // Warehouse
    WarehouseView,
    WarehouseManage,

    // HR
    HrView,
    HrManage,

    // Administration
    ReportView,
    UserManage,
    SettingsManage,
}

impl Permission {
    pub const ALL: [Permission; 17] = [
        Permission::DocumentView,
        Permission::DocumentCreate,
        Permission::DocumentApprove,
        Permission::DocumentCancelAny,
        Permission::SalesView,
        Permission::SalesManage,
        Permission::AccountingView,
        Permission::AccountingPost,
        Permission::CreditView,
        Permission::CreditApprove,
        Permission::WarehouseView,
        Permission::WarehouseManage,
        Permission::HrView,
        Permission::HrManage,
        Permission::ReportView,
        Permission::UserManage,
        Permission::SettingsManage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::DocumentView => "DOCUMENT_VIEW",
            Permission::DocumentCreate => "DOCUMENT_CREATE",
            Permission::DocumentApprove => "DOCUMENT_APPROVE",
            Permission::DocumentCancelAny => "DOCUMENT_CANCEL_ANY",
            Permission::SalesView => "SALES_VIEW",
            Permission::SalesManage => "SALES_MANAGE",
            Permission::AccountingView => "ACCOUNTING_VIEW",
            Permission::AccountingPost => "ACCOUNTING_POST",
            Permission::CreditView => "CREDIT_VIEW",
            Permission::CreditApprove => "CREDIT_APPROVE",
            Permission::WarehouseView => "WAREHOUSE_VIEW",
            Permission::WarehouseManage => "WAREHOUSE_MANAGE",
            Permission::HrView => "HR_VIEW",
            Permission::HrManage => "HR_MANAGE",
            Permission::ReportView => "REPORT_VIEW",
            Permission::UserManage => "USER_MANAGE",
            Permission::SettingsManage => "SETTINGS_MANAGE",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|perm| perm.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::configuration(format!("unknown permission `{s}`")))
    }
}
