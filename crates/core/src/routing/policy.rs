use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Assignment scope of a canonical role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteScope {
    /// Vendor-based assignment: override set first, circle-derived vendor
    /// otherwise.
    VendorMaintenance,
    /// Not filtered by division or circle; any holder of the role.
    RoleWide,
    /// Matched against the row's division.
    DivisionScoped,
}

/// One entry of the team-label → canonical-role table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRoute {
    pub team_label: String,
    pub role: String,
    pub scope: RouteScope,
}

/// A geographic circle group bound to exactly one maintenance vendor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleGroup {
    pub vendor: String,
    pub circles: Vec<String>,
}

/// The routing policy, expressed as data so operations can change it
/// without a redeploy. A compiled-in default covers the standing
/// team/vendor topology; deployments may load a replacement from config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub teams: Vec<TeamRoute>,
    /// Header aliases accepted for the site-code column, matched after
    /// trim + lowercase on the header name.
    pub site_code_headers: Vec<String>,
    pub division_headers: Vec<String>,
    pub circle_headers: Vec<String>,
    /// Vendor that owns every site in the override set.
    pub override_vendor: String,
    pub circle_groups: Vec<CircleGroup>,
    /// Fallback when a row carries a division but no circle.
    pub division_circles: BTreeMap<String, String>,
    /// Role the equipment-review tier routes to.
    pub equipment_review_role: String,
    /// Role the final sign-off tier routes to. Role-wide by definition.
    pub final_sign_off_role: String,
    /// Issue types that never enter the review chain. Everything else
    /// participates.
    pub chain_exempt_issue_types: Vec<String>,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        let team = |label: &str, role: &str, scope: RouteScope| TeamRoute {
            team_label: label.to_string(),
            role: role.to_string(),
            scope,
        };

        Self {
            teams: vec![
                team("AMC", "amc_technician", RouteScope::VendorMaintenance),
                team("Signal", "signal_maintainer", RouteScope::DivisionScoped),
                team("Electrical", "electrical_maintainer", RouteScope::DivisionScoped),
                team("Operating", "operating_staff", RouteScope::DivisionScoped),
                team("Equipment", "equipment_inspector", RouteScope::DivisionScoped),
                team("CCR", "ccr_controller", RouteScope::RoleWide),
            ],
            site_code_headers: vec![
                "site code".to_string(),
                "site_code".to_string(),
                "site id".to_string(),
                "siteid".to_string(),
                "station code".to_string(),
                "site".to_string(),
            ],
            division_headers: vec!["division".to_string(), "div".to_string()],
            circle_headers: vec!["circle".to_string()],
            override_vendor: "skybridge".to_string(),
            circle_groups: vec![
                CircleGroup {
                    vendor: "northgrid".to_string(),
                    circles: vec!["east".to_string(), "southeast".to_string()],
                },
                CircleGroup {
                    vendor: "ringcom".to_string(),
                    circles: vec!["west".to_string(), "central".to_string()],
                },
            ],
            division_circles: BTreeMap::from([
                ("HSR".to_string(), "east".to_string()),
                ("GNT".to_string(), "southeast".to_string()),
                ("BZA".to_string(), "west".to_string()),
                ("NED".to_string(), "central".to_string()),
            ]),
            equipment_review_role: "equipment_inspector".to_string(),
            final_sign_off_role: "ccr_controller".to_string(),
            chain_exempt_issue_types: vec!["informational".to_string()],
        }
    }
}

impl RoutingPolicy {
    pub fn route_for(&self, team_label: &str) -> Option<&TeamRoute> {
        let wanted = normalize_key(team_label);
        self.teams.iter().find(|t| normalize_key(&t.team_label) == wanted)
    }

    pub fn scope_of_role(&self, role: &str) -> Option<RouteScope> {
        let wanted = normalize_key(role);
        self.teams
            .iter()
            .find(|t| normalize_key(&t.role) == wanted)
            .map(|t| t.scope)
    }

    pub fn vendor_for_circle(&self, circle: &str) -> Option<&CircleGroup> {
        let wanted = normalize_key(circle);
        self.circle_groups
            .iter()
            .find(|g| g.circles.iter().any(|c| normalize_key(c) == wanted))
    }

    pub fn circle_for_division(&self, division: &str) -> Option<&str> {
        let wanted = normalize_key(division);
        self.division_circles
            .iter()
            .find(|(d, _)| normalize_key(d) == wanted)
            .map(|(_, c)| c.as_str())
    }

    pub fn site_code_from_row(&self, row: &BTreeMap<String, String>) -> Option<String> {
        self.value_from_row(row, &self.site_code_headers).map(|v| normalize_site_code(&v))
    }

    pub fn division_from_row(&self, row: &BTreeMap<String, String>) -> Option<String> {
        self.value_from_row(row, &self.division_headers)
    }

    pub fn circle_from_row(&self, row: &BTreeMap<String, String>) -> Option<String> {
        self.value_from_row(row, &self.circle_headers)
    }

    pub fn issue_type_participates(&self, issue_type: &str) -> bool {
        let wanted = normalize_key(issue_type);
        !self.chain_exempt_issue_types.iter().any(|t| normalize_key(t) == wanted)
    }

    fn value_from_row(
        &self,
        row: &BTreeMap<String, String>,
        headers: &[String],
    ) -> Option<String> {
        let aliases: Vec<String> = headers.iter().map(|h| normalize_key(h)).collect();
        row.iter()
            .find(|(header, value)| {
                aliases.contains(&normalize_key(header)) && !value.trim().is_empty()
            })
            .map(|(_, value)| value.trim().to_string())
    }
}

pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Site codes compare after trim + uppercase, matching how the override
/// ingestion normalizes them.
pub fn normalize_site_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{normalize_site_code, RouteScope, RoutingPolicy};

    #[test]
    fn team_lookup_is_case_and_whitespace_insensitive() {
        let policy = RoutingPolicy::default();
        let route = policy.route_for("  amc ").expect("AMC team is known");
        assert_eq!(route.role, "amc_technician");
        assert_eq!(route.scope, RouteScope::VendorMaintenance);
    }

    #[test]
    fn unknown_team_is_none() {
        assert!(RoutingPolicy::default().route_for("Catering").is_none());
    }

    #[test]
    fn site_code_is_found_under_any_alias_and_normalized() {
        let policy = RoutingPolicy::default();
        let row = BTreeMap::from([
            ("Station Code".to_string(), " 3w2872 ".to_string()),
            ("fault".to_string(), "battery low".to_string()),
        ]);

        assert_eq!(policy.site_code_from_row(&row), Some("3W2872".to_string()));
    }

    #[test]
    fn blank_site_code_cells_are_skipped() {
        let policy = RoutingPolicy::default();
        let row = BTreeMap::from([("site code".to_string(), "   ".to_string())]);
        assert_eq!(policy.site_code_from_row(&row), None);
    }

    #[test]
    fn circle_falls_back_through_division_table() {
        let policy = RoutingPolicy::default();
        assert_eq!(policy.circle_for_division("hsr"), Some("east"));
        assert_eq!(policy.circle_for_division("XXX"), None);
    }

    #[test]
    fn each_circle_maps_to_exactly_one_vendor() {
        let policy = RoutingPolicy::default();
        let east = policy.vendor_for_circle("EAST").expect("east is mapped");
        assert_eq!(east.vendor, "northgrid");
        let central = policy.vendor_for_circle("central").expect("central is mapped");
        assert_eq!(central.vendor, "ringcom");
    }

    #[test]
    fn normalizes_site_codes_like_the_ingestion_does() {
        assert_eq!(normalize_site_code("  3w2872\t"), "3W2872");
    }

    #[test]
    fn exempt_issue_types_skip_the_chain() {
        let policy = RoutingPolicy::default();
        assert!(policy.issue_type_participates("battery fault"));
        assert!(!policy.issue_type_participates(" Informational "));
    }
}
