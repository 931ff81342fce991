use std::collections::BTreeSet;

use serde_json::Value;

use super::{BranchId, GeoDirectory, ProvinceId};
use crate::authz::CurrentUser;

/// Resolves which branches and provinces a user may see or act on.
///
/// Scoping is fail-closed: a user whose home branch has disappeared from the
/// directory ends up with an empty scope, and records without a readable
/// branch field are never returned.
#[derive(Debug, Clone)]
pub struct GeographicScope {
    directory: GeoDirectory,
}

impl GeographicScope {
    pub fn new(directory: GeoDirectory) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &GeoDirectory {
        &self.directory
    }

    pub fn accessible_branches(&self, user: &CurrentUser) -> BTreeSet<BranchId> {
        let requested: Vec<&String> = if user.allowed_branches.is_empty() {
            vec![&user.home_branch]
        } else {
            user.allowed_branches.iter().collect()
        };

        requested
            .into_iter()
            .filter(|code| self.directory.branch(code).is_some())
            .cloned()
            .collect()
    }

    pub fn accessible_provinces(&self, user: &CurrentUser) -> BTreeSet<ProvinceId> {
        let mut provinces: BTreeSet<ProvinceId> = self
            .accessible_branches(user)
            .iter()
            .filter_map(|code| self.directory.province_for_branch(code))
            .cloned()
            .collect();

        provinces.extend(
            user.allowed_provinces
                .iter()
                .filter(|id| self.directory.province(id).is_some())
                .cloned(),
        );
        provinces
    }

    pub fn can_access_branch(&self, user: &CurrentUser, branch_id: &str) -> bool {
        self.accessible_branches(user).contains(branch_id)
    }

    pub fn can_access_province(&self, user: &CurrentUser, province_id: &str) -> bool {
        self.accessible_provinces(user).contains(province_id)
    }

    /// Keep only the records whose `branch_field` names an accessible branch.
    ///
    /// `branch_field` is a top-level key, or a dotted path for nested fields.
    pub fn filter_by_scope<'a>(
        &self,
        user: &CurrentUser,
        records: &'a [Value],
        branch_field: &str,
    ) -> Vec<&'a Value> {
        let branches = self.accessible_branches(user);
        if branches.is_empty() {
            return Vec::new();
        }

        records
            .iter()
            .filter(|record| {
                field_str(record, branch_field)
                    .map(|code| branches.contains(code))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Same as [`filter_by_scope`](Self::filter_by_scope) but on a province field.
    pub fn filter_by_province_scope<'a>(
        &self,
        user: &CurrentUser,
        records: &'a [Value],
        province_field: &str,
    ) -> Vec<&'a Value> {
        let provinces = self.accessible_provinces(user);
        records
            .iter()
            .filter(|record| {
                field_str(record, province_field)
                    .map(|id| provinces.contains(id))
                    .unwrap_or(false)
            })
            .collect()
    }
}

/// Dotted path lookup; keys are matched literally, so `/` and `~` in a key
/// need no escaping.
fn field_str<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
    field
        .split('.')
        .try_fold(record, |value, key| value.get(key))
        .and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::Role;
    use serde_json::json;

    fn scope() -> GeographicScope {
        GeographicScope::new(GeoDirectory::dealership_default())
    }

    #[test]
    fn home_branch_is_the_default_scope() {
        let user = CurrentUser::new("u1", Role::Staff, "0452", "nakhon-ratchasima");
        let scope = scope();
        assert_eq!(scope.accessible_branches(&user), BTreeSet::from(["0452".to_string()]));
        assert_eq!(
            scope.accessible_provinces(&user),
            BTreeSet::from(["nakhon-ratchasima".to_string()])
        );
    }

    #[test]
    fn allow_list_replaces_home_branch() {
        let user = CurrentUser::new("u1", Role::ProvinceManager, "0450", "nakhon-ratchasima")
            .with_allowed_branches(["0401", "0402"]);
        let scope = scope();
        assert!(!scope.can_access_branch(&user, "0450"));
        assert!(scope.can_access_branch(&user, "0401"));
        assert_eq!(
            scope.accessible_provinces(&user),
            BTreeSet::from(["khon-kaen".to_string()])
        );
    }

    #[test]
    fn allowed_provinces_widen_province_scope_only() {
        let user = CurrentUser::new("u1", Role::ProvinceManager, "0450", "nakhon-ratchasima")
            .with_allowed_provinces(["buriram", "atlantis"]);
        let scope = scope();
        let provinces = scope.accessible_provinces(&user);
        assert!(provinces.contains("buriram"));
        assert!(!provinces.contains("atlantis"));
        assert!(!scope.can_access_branch(&user, "0311"));
    }

    #[test]
    fn vanished_home_branch_yields_empty_scope() {
        let user = CurrentUser::new("u1", Role::Staff, "0999", "nakhon-ratchasima");
        let scope = scope();
        assert!(scope.accessible_branches(&user).is_empty());
        assert!(scope.accessible_provinces(&user).is_empty());

        let records = vec![json!({"branchCode": "0999"})];
        assert!(scope.filter_by_scope(&user, &records, "branchCode").is_empty());
    }

    #[test]
    fn filter_excludes_records_without_branch() {
        let user = CurrentUser::new("u1", Role::Staff, "0452", "nakhon-ratchasima");
        let records = vec![
            json!({"id": "a", "branchCode": "0452"}),
            json!({"id": "b", "branchCode": "0451"}),
            json!({"id": "c"}),
            json!({"id": "d", "branchCode": 452}),
            json!({"id": "e", "meta": {"branch": "0452"}}),
        ];
        let scope = scope();

        let visible: Vec<&str> = scope
            .filter_by_scope(&user, &records, "branchCode")
            .into_iter()
            .filter_map(|r| r["id"].as_str())
            .collect();
        assert_eq!(visible, vec!["a"]);

        let nested = scope.filter_by_scope(&user, &records, "meta.branch");
        assert_eq!(nested.len(), 1);
        assert_eq!(records.len(), 5);
    }

    #[test]
    fn path_segments_with_slashes_and_tildes_match_literally() {
        let user = CurrentUser::new("u1", Role::Staff, "0452", "nakhon-ratchasima");
        let records = vec![
            json!({"id": "a", "site/info": {"branch~code": "0452"}}),
            json!({"id": "b", "site": {"info": {"branch~code": "0452"}}}),
        ];
        let scope = scope();

        let visible: Vec<&str> = scope
            .filter_by_scope(&user, &records, "site/info.branch~code")
            .into_iter()
            .filter_map(|r| r["id"].as_str())
            .collect();
        assert_eq!(visible, vec!["a"]);
    }
}
