//! Geographic units (provinces and branches) and the per-user visibility
//! scope derived from them.

mod scope;

pub use scope::GeographicScope;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult};

pub type BranchId = String;
pub type ProvinceId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Province {
    pub id: ProvinceId,
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: UnitStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    /// Branch code, e.g. `"0452"`; this is the identifier used for scoping.
    pub code: BranchId,
    #[serde(default)]
    pub name: String,
    pub province_id: ProvinceId,
    #[serde(default)]
    pub status: UnitStatus,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct DirectoryFile {
    provinces: Vec<Province>,
    branches: Vec<Branch>,
}

/// Read-only lookup tables for provinces and branches.
#[derive(Debug, Clone, Default)]
pub struct GeoDirectory {
    provinces: BTreeMap<ProvinceId, Province>,
    branches: BTreeMap<BranchId, Branch>,
}

impl GeoDirectory {
    pub fn new(provinces: Vec<Province>, branches: Vec<Branch>) -> AppResult<Self> {
        let mut directory = GeoDirectory::default();

        for province in provinces {
            let id = province.id.clone();
            if directory.provinces.insert(id.clone(), province).is_some() {
                return Err(AppError::configuration(format!("province `{id}` is defined twice")));
            }
        }

        for branch in branches {
            if !directory.provinces.contains_key(&branch.province_id) {
                return Err(AppError::configuration(format!(
                    "branch `{}` references undefined province `{}`",
                    branch.code, branch.province_id
                )));
            }
            let code = branch.code.clone();
            if directory.branches.insert(code.clone(), branch).is_some() {
                return Err(AppError::configuration(format!("branch `{code}` is defined twice")));
            }
        }

        Ok(directory)
    }

    pub fn from_json(text: &str) -> AppResult<Self> {
        let de = &mut serde_json::Deserializer::from_str(text);
        let file: DirectoryFile = serde_path_to_error::deserialize(de).map_err(|err| {
            AppError::configuration(format!("geo directory at `{}`: {}", err.path(), err.inner()))
        })?;
        Self::new(file.provinces, file.branches)
    }

    pub fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            AppError::configuration(format!("cannot read geo directory {}: {err}", path.display()))
        })?;
        Self::from_json(&text)
    }

    /// Built-in directory for the north-eastern dealership network.
    pub fn dealership_default() -> Self {
        fn province(id: &str, code: &str, name: &str) -> Province {
            Province {
                id: id.to_string(),
                code: code.to_string(),
                name: name.to_string(),
                status: UnitStatus::Active,
            }
        }

        fn branch(code: &str, name: &str, province_id: &str) -> Branch {
            Branch {
                id: format!("branch-{code}"),
                code: code.to_string(),
                name: name.to_string(),
                province_id: province_id.to_string(),
                status: UnitStatus::Active,
            }
        }

        let provinces = vec![
            province("bangkok", "BKK", "Bangkok"),
            province("nakhon-ratchasima", "NMA", "Nakhon Ratchasima"),
            province("khon-kaen", "KKN", "Khon Kaen"),
            province("buriram", "BRM", "Buri Ram"),
        ];
        let branches = vec![
            branch("0101", "Bangkok Head Office", "bangkok"),
            branch("0450", "Nakhon Ratchasima", "nakhon-ratchasima"),
            branch("0451", "Pak Chong", "nakhon-ratchasima"),
            branch("0452", "Sikhio", "nakhon-ratchasima"),
            branch("0453", "Bua Yai", "nakhon-ratchasima"),
            branch("0401", "Khon Kaen", "khon-kaen"),
            branch("0402", "Ban Phai", "khon-kaen"),
            branch("0311", "Buri Ram", "buriram"),
        ];

        let mut directory = GeoDirectory::default();
        for province in provinces {
            directory.provinces.insert(province.id.clone(), province);
        }
        for branch in branches {
            directory.branches.insert(branch.code.clone(), branch);
        }
        directory
    }

    pub fn branch(&self, code: &str) -> Option<&Branch> {
        self.branches.get(code)
    }

    pub fn province(&self, id: &str) -> Option<&Province> {
        self.provinces.get(id)
    }

    /// The `branchCode → provinceId` lookup.
    pub fn province_for_branch(&self, code: &str) -> Option<&ProvinceId> {
        self.branches.get(code).map(|branch| &branch.province_id)
    }

    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    pub fn provinces(&self) -> impl Iterator<Item = &Province> {
        self.provinces.values()
    }
}
