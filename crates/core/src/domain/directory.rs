use serde::{Deserialize, Serialize};

/// A user as seen in the externally maintained directory. Read-only here:
/// membership, activation and approval are managed by another system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub user_id: String,
    pub display_name: String,
    pub role: String,
    pub vendor: Option<String>,
    pub circle: Option<String>,
    pub divisions: Vec<String>,
    pub active: bool,
    pub approved: bool,
}

impl DirectoryUser {
    /// Only active, approved users are ever eligible for routing.
    pub fn is_eligible(&self) -> bool {
        self.active && self.approved
    }

    pub fn in_division(&self, division: &str) -> bool {
        let wanted = division.trim().to_ascii_lowercase();
        self.divisions.iter().any(|d| d.trim().to_ascii_lowercase() == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::DirectoryUser;

    fn user() -> DirectoryUser {
        DirectoryUser {
            user_id: "u-1".to_string(),
            display_name: "Field Tech".to_string(),
            role: "amc_technician".to_string(),
            vendor: Some("northgrid".to_string()),
            circle: Some("east".to_string()),
            divisions: vec!["HSR".to_string(), "GNT".to_string()],
            active: true,
            approved: true,
        }
    }

    #[test]
    fn division_match_is_case_insensitive() {
        let user = user();
        assert!(user.in_division("hsr"));
        assert!(user.in_division(" GNT "));
        assert!(!user.in_division("BZA"));
    }

    #[test]
    fn inactive_or_unapproved_users_are_ineligible() {
        let mut user = user();
        assert!(user.is_eligible());
        user.active = false;
        assert!(!user.is_eligible());
        user.active = true;
        user.approved = false;
        assert!(!user.is_eligible());
    }
}
