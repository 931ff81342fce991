use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Permission, Role};
use crate::errors::{AppError, AppResult};

static NO_PERMISSIONS: BTreeSet<Permission> = BTreeSet::new();

/// A role category; roles inherit along the chain formed by `parent` links.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryConfig {
    pub id: String,
    #[serde(default)]
    pub parent: Option<String>,
}

/// One row of the role table as written in configuration.
///
/// Role and permission names stay strings here so that unknown names surface
/// as configuration errors instead of opaque deserialization failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleConfig {
    pub role: String,
    pub level: u8,
    pub category: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleTable {
    pub categories: Vec<CategoryConfig>,
    pub roles: Vec<RoleConfig>,
}

impl RoleTable {
    /// Parse a role table from JSON, reporting the path of the offending entry.
    pub fn from_json(text: &str) -> AppResult<Self> {
        let de = &mut serde_json::Deserializer::from_str(text);
        serde_path_to_error::deserialize(de).map_err(|err| {
            AppError::configuration(format!("role table at `{}`: {}", err.path(), err.inner()))
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            AppError::configuration(format!("cannot read role table {}: {err}", path.display()))
        })?;
        Self::from_json(&text)
    }

    /// The table shipped with the dealership ERP.
    pub fn dealership_default() -> Self {
        fn category(id: &str, parent: Option<&str>) -> CategoryConfig {
            CategoryConfig {
                id: id.to_string(),
                parent: parent.map(str::to_string),
            }
        }

        fn role(role: Role, level: u8, category: &str, permissions: &[Permission]) -> RoleConfig {
            RoleConfig {
                role: role.as_str().to_string(),
                level,
                category: category.to_string(),
                permissions: permissions.iter().map(|p| p.as_str().to_string()).collect(),
            }
        }

        use Permission::*;

        Self {
            categories: vec![
                category("organization", None),
                category("branch_operations", Some("organization")),
                category("accounting", Some("branch_operations")),
                category("sales", Some("branch_operations")),
                category("credit", Some("branch_operations")),
                category("warehouse", Some("branch_operations")),
                category("hr", Some("branch_operations")),
            ],
            roles: vec![
                role(Role::SuperAdmin, 0, "organization", &Permission::ALL),
                role(
                    Role::Executive,
                    1,
                    "organization",
                    &[DocumentCancelAny, SalesView, AccountingView, CreditView, WarehouseView, HrView],
                ),
                role(Role::GeneralManager, 2, "organization", &[DocumentCreate, DocumentApprove, ReportView]),
                role(Role::ProvinceManager, 5, "branch_operations", &[ReportView, HrView]),
                role(
                    Role::BranchManager,
                    6,
                    "branch_operations",
                    &[DocumentApprove, AccountingView, CreditView, WarehouseView],
                ),
                role(Role::Lead, 7, "branch_operations", &[SalesView]),
                role(Role::Staff, 8, "branch_operations", &[DocumentCreate]),
                role(Role::Accountant, 7, "accounting", &[DocumentApprove, AccountingPost]),
                role(Role::AccountingOfficer, 8, "accounting", &[AccountingView]),
                role(Role::SalesStaff, 8, "sales", &[SalesView, SalesManage]),
                role(Role::CreditOfficer, 8, "credit", &[CreditView, CreditApprove]),
                role(Role::WarehouseStaff, 8, "warehouse", &[WarehouseView, WarehouseManage]),
                role(Role::HrOfficer, 8, "hr", &[HrView, HrManage]),
                role(Role::Viewer, 9, "organization", &[DocumentView]),
            ],
        }
    }
}

#[derive(Debug, Clone)]
struct RoleEntry {
    level: u8,
    category: String,
    /// The role's category followed by its ancestors, root last.
    chain: Vec<String>,
    permissions: BTreeSet<Permission>,
}

/// Immutable role → level → permission mapping, built once at startup.
#[derive(Debug, Clone)]
pub struct RoleRegistry {
    entries: HashMap<Role, RoleEntry>,
}

impl RoleRegistry {
    pub fn from_table(table: RoleTable) -> AppResult<Self> {
        let parents = validate_categories(&table.categories)?;

        let mut declared: BTreeMap<Role, (u8, String, BTreeSet<Permission>)> = BTreeMap::new();
        for row in &table.roles {
            let role: Role = row.role.parse()?;
            if !parents.contains_key(row.category.as_str()) {
                return Err(AppError::configuration(format!(
                    "role {role} references undefined category `{}`",
                    row.category
                )));
            }

            let permissions = row
                .permissions
                .iter()
                .map(|p| p.parse::<Permission>())
                .collect::<AppResult<BTreeSet<_>>>()
                .map_err(|err| AppError::configuration(format!("role {role}: {err}")))?;

            if declared
                .insert(role, (row.level, row.category.clone(), permissions))
                .is_some()
            {
                return Err(AppError::configuration(format!("role {role} is defined twice")));
            }
        }

        if let Some(missing) = Role::ALL.iter().find(|role| !declared.contains_key(*role)) {
            return Err(AppError::configuration(format!("role {missing} is not configured")));
        }

        let chains: BTreeMap<Role, Vec<String>> = declared
            .iter()
            .map(|(role, (_, category, _))| (*role, category_chain(&parents, category)))
            .collect();
        let shares_chain = |a: &Role, b: &Role| match (declared.get(a), declared.get(b)) {
            (Some((_, cat_a, _)), Some((_, cat_b, _))) => {
                chains[a].contains(cat_b) || chains[b].contains(cat_a)
            }
            _ => false,
        };

        // Least authority first, so every role below the current one on a
        // shared chain already carries its final set.
        let mut order: Vec<Role> = declared.keys().copied().collect();
        order.sort_by_key(|role| std::cmp::Reverse(declared[role].0));

        let mut entries: HashMap<Role, RoleEntry> = HashMap::with_capacity(declared.len());
        for role in order {
            let (level, category, own) = &declared[&role];
            let chain = chains[&role].clone();

            let mut permissions = own.clone();
            for (other, (other_level, other_category, grants)) in &declared {
                if *other == role {
                    continue;
                }
                if other_level == level && chain.contains(other_category) {
                    permissions.extend(grants.iter().copied());
                } else if other_level > level && shares_chain(&role, other) {
                    if let Some(entry) = entries.get(other) {
                        permissions.extend(entry.permissions.iter().copied());
                    }
                }
            }

            entries.insert(
                role,
                RoleEntry {
                    level: *level,
                    category: category.clone(),
                    chain,
                    permissions,
                },
            );
        }

        tracing::debug!(roles = entries.len(), "role registry built");
        Ok(Self { entries })
    }

    pub fn dealership_default() -> AppResult<Self> {
        Self::from_table(RoleTable::dealership_default())
    }

    /// Effective permission set of `role`.
    pub fn permissions_for(&self, role: Role) -> &BTreeSet<Permission> {
        self.entries
            .get(&role)
            .map(|entry| &entry.permissions)
            .unwrap_or(&NO_PERMISSIONS)
    }

    /// Authority level of `role`; lower means more authority.
    pub fn level_of(&self, role: Role) -> u8 {
        // Construction guarantees every role is present; an absent entry
        // would rank below everything.
        self.entries.get(&role).map(|entry| entry.level).unwrap_or(u8::MAX)
    }

    /// True when `role` has equal or more authority than `required`.
    pub fn is_at_least(&self, role: Role, required: Role) -> bool {
        self.level_of(role) <= self.level_of(required)
    }

    /// True when `role` has strictly more authority than `other`.
    pub fn outranks(&self, role: Role, other: Role) -> bool {
        self.level_of(role) < self.level_of(other)
    }

    pub fn has_permission(&self, role: Role, permission: Permission) -> bool {
        self.permissions_for(role).contains(&permission)
    }

    pub fn category_of(&self, role: Role) -> Option<&str> {
        self.entries.get(&role).map(|entry| entry.category.as_str())
    }

    /// True when `other`'s category lies on `role`'s category chain.
    pub fn category_chain_contains(&self, role: Role, other: Role) -> bool {
        match (self.entries.get(&role), self.entries.get(&other)) {
            (Some(entry), Some(other)) => entry.chain.contains(&other.category),
            _ => false,
        }
    }

    /// True when one role's category is an ancestor of (or equal to) the
    /// other's. The more authoritative of two such roles holds every
    /// permission of the other.
    pub fn shares_category_chain(&self, role: Role, other: Role) -> bool {
        self.category_chain_contains(role, other) || self.category_chain_contains(other, role)
    }

    /// Roles ordered by authority, most authoritative first.
    pub fn roles_by_level(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self.entries.keys().copied().collect();
        roles.sort_by_key(|role| (self.level_of(*role), *role));
        roles
    }
}

fn validate_categories(categories: &[CategoryConfig]) -> AppResult<HashMap<&str, Option<&str>>> {
    let mut parents: HashMap<&str, Option<&str>> = HashMap::with_capacity(categories.len());
    for category in categories {
        if parents
            .insert(category.id.as_str(), category.parent.as_deref())
            .is_some()
        {
            return Err(AppError::configuration(format!(
                "category `{}` is defined twice",
                category.id
            )));
        }
    }

    for category in categories {
        if let Some(parent) = category.parent.as_deref() {
            if !parents.contains_key(parent) {
                return Err(AppError::configuration(format!(
                    "category `{}` references undefined parent category `{parent}`",
                    category.id
                )));
            }
        }

        let mut seen = BTreeSet::new();
        let mut cursor = Some(category.id.as_str());
        while let Some(id) = cursor {
            if !seen.insert(id) {
                return Err(AppError::configuration(format!(
                    "category `{}` is part of a parent cycle",
                    category.id
                )));
            }
            cursor = parents.get(id).copied().flatten();
        }
    }

    Ok(parents)
}

fn category_chain(parents: &HashMap<&str, Option<&str>>, category: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut cursor = Some(category);
    while let Some(id) = cursor {
        chain.push(id.to_string());
        cursor = parents.get(id).copied().flatten();
    }
    chain
}
