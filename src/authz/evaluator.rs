use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use super::principal::{CurrentUser, ResourceContext};
use super::registry::RoleRegistry;
use super::{Permission, Role};
use crate::geo::GeographicScope;

/// Policy evaluator trait for pluggable authorization logic
pub trait PolicyEvaluator: Send + Sync {
    /// Check if the user may exercise `permission` in `ctx`. Never errors.
    fn can(&self, user: &CurrentUser, permission: Permission, ctx: &ResourceContext) -> bool;
}

/// Resolved, read-only view of what a user may do and where.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub user_id: String,
    pub role: Role,
    pub level: u8,
    pub permissions: BTreeSet<Permission>,
    pub branches: BTreeSet<String>,
    pub provinces: BTreeSet<String>,
}

/// Default evaluator: role permissions AND geographic scope.
///
/// Evaluation:
/// 1. the role's effective permission set must contain the permission
/// 2. a branch in the context must be in the user's scope
/// 3. a province in the context must be in the user's scope
///
/// Every check is mandatory; any failure denies.
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    registry: Arc<RoleRegistry>,
    scope: Arc<GeographicScope>,
}

impl PermissionResolver {
    pub fn new(registry: Arc<RoleRegistry>, scope: Arc<GeographicScope>) -> Self {
        Self { registry, scope }
    }

    pub fn registry(&self) -> &RoleRegistry {
        &self.registry
    }

    pub fn scope(&self) -> &GeographicScope {
        &self.scope
    }

    pub fn grant(&self, user: &CurrentUser) -> PermissionGrant {
        PermissionGrant {
            user_id: user.id.clone(),
            role: user.role,
            level: self.registry.level_of(user.role),
            permissions: self.registry.permissions_for(user.role).clone(),
            branches: self.scope.accessible_branches(user),
            provinces: self.scope.accessible_provinces(user),
        }
    }
}

impl PolicyEvaluator for PermissionResolver {
    fn can(&self, user: &CurrentUser, permission: Permission, ctx: &ResourceContext) -> bool {
        if !self.registry.has_permission(user.role, permission) {
            tracing::debug!(
                user_id = %user.id,
                role = %user.role,
                permission = %permission,
                "permission denied: role lacks permission"
            );
            return false;
        }

        if let Some(branch_id) = ctx.branch_id.as_deref() {
            if !self.scope.can_access_branch(user, branch_id) {
                tracing::debug!(
                    user_id = %user.id,
                    permission = %permission,
                    branch_id = %branch_id,
                    "permission denied: branch out of scope"
                );
                return false;
            }
        }

        if let Some(province_id) = ctx.province_id.as_deref() {
            if !self.scope.can_access_province(user, province_id) {
                tracing::debug!(
                    user_id = %user.id,
                    permission = %permission,
                    province_id = %province_id,
                    "permission denied: province out of scope"
                );
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoDirectory;

    fn resolver() -> PermissionResolver {
        PermissionResolver::new(
            Arc::new(RoleRegistry::dealership_default().unwrap()),
            Arc::new(GeographicScope::new(GeoDirectory::dealership_default())),
        )
    }

    #[test]
    fn role_permission_without_context_allows() {
        let resolver = resolver();
        let manager = CurrentUser::new("m1", Role::BranchManager, "0452", "nakhon-ratchasima");
        assert!(resolver.can(&manager, Permission::DocumentApprove, &ResourceContext::new()));
        assert!(!resolver.can(&manager, Permission::UserManage, &ResourceContext::new()));
    }

    #[test]
    fn branch_context_must_be_in_scope() {
        let resolver = resolver();
        let manager = CurrentUser::new("m1", Role::BranchManager, "0452", "nakhon-ratchasima");

        let home = ResourceContext::new().with_branch("0452");
        let other = ResourceContext::new().with_branch("0401");
        assert!(resolver.can(&manager, Permission::DocumentApprove, &home));
        assert!(!resolver.can(&manager, Permission::DocumentApprove, &other));
    }

    #[test]
    fn both_checks_are_required() {
        let resolver = resolver();
        let lead = CurrentUser::new("l1", Role::Lead, "0452", "nakhon-ratchasima");
        let in_scope = ResourceContext::new().with_branch("0452");
        // Scope alone is not enough.
        assert!(!resolver.can(&lead, Permission::DocumentApprove, &in_scope));
    }

    #[test]
    fn province_context_is_checked() {
        let resolver = resolver();
        let manager = CurrentUser::new("m1", Role::BranchManager, "0452", "nakhon-ratchasima");
        let same = ResourceContext::new().with_province("nakhon-ratchasima");
        let other = ResourceContext::new().with_province("khon-kaen");
        assert!(resolver.can(&manager, Permission::DocumentView, &same));
        assert!(!resolver.can(&manager, Permission::DocumentView, &other));
    }

    #[test]
    fn unknown_home_branch_denies_scoped_checks() {
        let resolver = resolver();
        let ghost = CurrentUser::new("g1", Role::SuperAdmin, "0000", "nowhere");
        assert!(resolver.can(&ghost, Permission::SettingsManage, &ResourceContext::new()));
        assert!(!resolver.can(&ghost, Permission::DocumentView, &ResourceContext::new().with_branch("0000")));
    }

    #[test]
    fn grant_reports_resolved_view() {
        let resolver = resolver();
        let user = CurrentUser::new("s1", Role::Staff, "0451", "nakhon-ratchasima");
        let grant = resolver.grant(&user);
        assert_eq!(grant.level, 8);
        assert!(grant.permissions.contains(&Permission::DocumentCreate));
        assert_eq!(grant.branches.len(), 1);
        assert!(grant.provinces.contains("nakhon-ratchasima"));
    }
}
