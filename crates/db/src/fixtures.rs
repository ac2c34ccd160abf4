use faultdesk_core::domain::directory::DirectoryUser;

use crate::connection::DbPool;
use crate::repositories::{
    DirectoryRepository, RepositoryError, SqlDirectoryRepository, SqlVendorOverrideRepository,
    VendorOverrideRepository,
};

/// Deterministic demo directory covering every routing scope: two
/// circle-bound AMC vendors, the override vendor, one division team per
/// sample division, equipment inspectors and two CCR controllers.
const SEED_USERS: &[(&str, &str, &str, Option<&str>, Option<&str>, &[&str])] = &[
    ("u-amc-east", "Ravi Kumar", "amc_technician", Some("northgrid"), Some("east"), &[]),
    ("u-amc-se", "Meena Rao", "amc_technician", Some("northgrid"), Some("southeast"), &[]),
    ("u-amc-west", "Anil Joshi", "amc_technician", Some("ringcom"), Some("west"), &[]),
    ("u-amc-central", "Farid Khan", "amc_technician", Some("ringcom"), Some("central"), &[]),
    ("u-amc-sky-1", "Dinesh Patil", "amc_technician", Some("skybridge"), Some("west"), &[]),
    ("u-sig-hsr", "Lata Verma", "signal_maintainer", None, None, &["HSR"]),
    ("u-sig-bza", "Suresh Naidu", "signal_maintainer", None, None, &["BZA", "NED"]),
    ("u-ele-hsr", "Kavya Iyer", "electrical_maintainer", None, None, &["HSR", "GNT"]),
    ("u-ops-gnt", "Mohan Das", "operating_staff", None, None, &["GNT"]),
    ("u-equip-1", "Priya Menon", "equipment_inspector", None, None, &["HSR", "GNT"]),
    ("u-equip-2", "Vikram Singh", "equipment_inspector", None, None, &["BZA", "NED"]),
    ("u-ccr-1", "S. Raghavan", "ccr_controller", None, None, &[]),
    ("u-ccr-2", "Nisha Pillai", "ccr_controller", None, None, &[]),
];

const SEED_OVERRIDE_SITES: &[&str] = &["3W2872", "7A5544", "9K1001"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub users_seeded: usize,
    pub override_sites_seeded: usize,
}

/// Deterministic fixtures backing demos, smoke runs and tests.
pub struct SeedDataset;

impl SeedDataset {
    pub fn users() -> Vec<DirectoryUser> {
        SEED_USERS
            .iter()
            .map(|(id, name, role, vendor, circle, divisions)| DirectoryUser {
                user_id: (*id).to_string(),
                display_name: (*name).to_string(),
                role: (*role).to_string(),
                vendor: vendor.map(str::to_string),
                circle: circle.map(str::to_string),
                divisions: divisions.iter().map(|d| (*d).to_string()).collect(),
                active: true,
                approved: true,
            })
            .collect()
    }

    pub fn override_sites() -> Vec<String> {
        SEED_OVERRIDE_SITES.iter().map(|s| (*s).to_string()).collect()
    }

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let directory = SqlDirectoryRepository::new(pool.clone());
        let users = Self::users();
        for user in &users {
            directory.upsert_user(user.clone()).await?;
        }

        let overrides = SqlVendorOverrideRepository::new(pool.clone());
        let sites = Self::override_sites();
        overrides.replace_all(sites.clone()).await?;

        Ok(SeedResult { users_seeded: users.len(), override_sites_seeded: sites.len() })
    }
}
