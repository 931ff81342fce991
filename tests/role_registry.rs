use anyhow::Result;

use dealer_approvals::authz::{Permission, Role, RoleRegistry, RoleTable};

#[test]
fn branch_manager_includes_lead_and_can_approve() -> Result<()> {
    let registry = RoleRegistry::dealership_default()?;

    assert_eq!(registry.level_of(Role::BranchManager), 6);
    assert_eq!(registry.level_of(Role::Lead), 7);

    let manager = registry.permissions_for(Role::BranchManager);
    for permission in registry.permissions_for(Role::Lead) {
        assert!(manager.contains(permission), "BRANCH_MANAGER missing {permission}");
    }
    assert!(manager.contains(&Permission::DocumentApprove));
    Ok(())
}

#[test]
fn more_authority_never_means_fewer_permissions_within_a_chain() -> Result<()> {
    let registry = RoleRegistry::dealership_default()?;

    for role in Role::ALL {
        for other in Role::ALL {
            let inherits = registry.level_of(role) < registry.level_of(other)
                && registry.shares_category_chain(role, other);
            if !inherits {
                continue;
            }
            let have = registry.permissions_for(role);
            let missing: Vec<_> = registry
                .permissions_for(other)
                .iter()
                .filter(|p| !have.contains(*p))
                .collect();
            assert!(missing.is_empty(), "{role} should inherit {missing:?} from {other}");
        }
    }
    Ok(())
}

#[test]
fn organization_roles_cover_branch_roles_below_them() -> Result<()> {
    let registry = RoleRegistry::dealership_default()?;
    let general_manager = registry.permissions_for(Role::GeneralManager);

    for below in [Role::Lead, Role::BranchManager, Role::SalesStaff, Role::Accountant] {
        assert!(registry.shares_category_chain(Role::GeneralManager, below));
        assert!(
            general_manager.is_superset(registry.permissions_for(below)),
            "GENERAL_MANAGER lacks permissions of {below}"
        );
    }
    assert!(registry
        .permissions_for(Role::Executive)
        .is_superset(general_manager));
    Ok(())
}

#[test]
fn inheritance_is_transitive_across_sibling_categories() -> Result<()> {
    // An accounting role above a branch role that sits above a sales role
    // must end up with the sales grants too.
    let mut table = RoleTable::dealership_default();
    for row in &mut table.roles {
        match row.role.as_str() {
            "ACCOUNTANT" => row.level = 5,
            "BRANCH_MANAGER" => row.level = 6,
            "SALES_STAFF" => row.level = 7,
            _ => {}
        }
    }
    let registry = RoleRegistry::from_table(table)?;

    assert!(!registry.shares_category_chain(Role::Accountant, Role::SalesStaff));
    assert!(registry.has_permission(Role::BranchManager, Permission::SalesManage));
    assert!(registry.has_permission(Role::Accountant, Permission::SalesManage));
    Ok(())
}

#[test]
fn super_admin_holds_every_permission() -> Result<()> {
    let registry = RoleRegistry::dealership_default()?;
    for permission in Permission::ALL {
        assert!(registry.has_permission(Role::SuperAdmin, permission));
    }
    Ok(())
}

#[test]
fn specialist_categories_do_not_leak_sideways() -> Result<()> {
    let registry = RoleRegistry::dealership_default()?;

    // same level, different branch of the category tree
    assert!(!registry.has_permission(Role::SalesStaff, Permission::CreditApprove));
    assert!(!registry.has_permission(Role::CreditOfficer, Permission::SalesManage));
    assert!(!registry.has_permission(Role::HrOfficer, Permission::WarehouseManage));
    Ok(())
}

#[test]
fn rank_comparisons_follow_levels() -> Result<()> {
    let registry = RoleRegistry::dealership_default()?;

    assert!(registry.is_at_least(Role::BranchManager, Role::BranchManager));
    assert!(registry.is_at_least(Role::GeneralManager, Role::BranchManager));
    assert!(!registry.is_at_least(Role::Staff, Role::BranchManager));

    assert!(registry.outranks(Role::ProvinceManager, Role::BranchManager));
    assert!(!registry.outranks(Role::BranchManager, Role::BranchManager));

    let ordered = registry.roles_by_level();
    assert_eq!(ordered.first(), Some(&Role::SuperAdmin));
    assert_eq!(ordered.last(), Some(&Role::Viewer));
    Ok(())
}

#[test]
fn table_loaded_from_json_is_validated() -> Result<()> {
    let table = RoleTable::dealership_default();
    let text = serde_json::to_string(&table)?;
    let reloaded = RoleRegistry::from_table(RoleTable::from_json(&text)?)?;
    assert_eq!(reloaded.level_of(Role::Accountant), 7);

    let broken = text.replace("\"VIEWER\"", "\"NOT_A_ROLE\"");
    let err = RoleTable::from_json(&broken).and_then(RoleRegistry::from_table);
    assert!(err.is_err(), "unknown role names must be rejected");
    Ok(())
}
