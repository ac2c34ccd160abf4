pub mod policy;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::RouteClass;
use crate::domain::directory::DirectoryUser;
use policy::{normalize_key, normalize_site_code, RouteScope, RoutingPolicy};

pub use policy::{CircleGroup, TeamRoute};

/// Externally maintained priority site-code set. Consumed here only as a
/// membership test; ingestion and refresh belong to a collaborator.
pub trait VendorOverrideSet {
    fn contains(&self, site_code: &str) -> bool;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryVendorOverrideSet {
    sites: HashSet<String>,
}

impl InMemoryVendorOverrideSet {
    pub fn with_sites(sites: impl IntoIterator<Item = String>) -> Self {
        Self { sites: sites.into_iter().map(|s| normalize_site_code(&s)).collect() }
    }
}

impl VendorOverrideSet for InMemoryVendorOverrideSet {
    fn contains(&self, site_code: &str) -> bool {
        self.sites.contains(&normalize_site_code(site_code))
    }
}

/// Read-only probe into the action store: is there already a non-completed
/// action routing this site+role to this vendor? Injected so resolution
/// stays pure while the caller decides where the answer comes from.
pub trait OpenRouteProbe {
    fn has_open_vendor_route(&self, site_code: &str, role: &str, vendor: &str) -> bool;
}

/// Probe for contexts with no existing actions (first routing, tests).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpenRoutes;

impl OpenRouteProbe for NoOpenRoutes {
    fn has_open_vendor_route(&self, _site_code: &str, _role: &str, _vendor: &str) -> bool {
        false
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingInput {
    pub team_label: String,
    pub row: BTreeMap<String, String>,
    pub requested_by: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingBasis {
    VendorOverride,
    CircleVendor,
    RoleWide,
    DivisionScoped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAssignee {
    pub user_id: String,
    pub role: String,
    pub vendor: Option<String>,
    pub circle: Option<String>,
    pub division: Option<String>,
    pub site_code: Option<String>,
    pub basis: RoutingBasis,
}

impl ResolvedAssignee {
    pub fn route_class(&self) -> RouteClass {
        match self.basis {
            RoutingBasis::VendorOverride | RoutingBasis::CircleVendor => {
                RouteClass::VendorMaintenance
            }
            RoutingBasis::RoleWide | RoutingBasis::DivisionScoped => RouteClass::TeamScoped,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("unknown team label `{team_label}`")]
    UnknownTeamLabel { team_label: String },
    #[error("row for team `{team_label}` carries no site code under any known header")]
    MissingSiteCode { team_label: String },
    #[error("row for team `{team_label}` carries neither a circle nor a mappable division")]
    MissingCircle { team_label: String },
    #[error("circle `{circle}` belongs to no configured circle group")]
    UnmappedCircle { circle: String },
    #[error("row for team `{team_label}` carries no division under any known header")]
    MissingDivision { team_label: String },
    #[error(
        "no eligible assignee for role `{role}` (vendor: {vendor:?}, circle: {circle:?}, division: {division:?})"
    )]
    NoEligibleAssignee {
        role: String,
        vendor: Option<String>,
        circle: Option<String>,
        division: Option<String>,
    },
}

/// Pure assignment resolution: team label + row snapshot in, one eligible
/// user (or a typed failure) out. Never persists anything; the caller owns
/// what happens with the result.
#[derive(Clone, Debug)]
pub struct RoutingResolver<O, P> {
    users: Vec<DirectoryUser>,
    policy: RoutingPolicy,
    overrides: O,
    probe: P,
}

impl<O, P> RoutingResolver<O, P>
where
    O: VendorOverrideSet,
    P: OpenRouteProbe,
{
    pub fn new(users: Vec<DirectoryUser>, policy: RoutingPolicy, overrides: O, probe: P) -> Self {
        Self { users, policy, overrides, probe }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    pub fn resolve(&self, input: &RoutingInput) -> Result<ResolvedAssignee, RoutingError> {
        let route = self.policy.route_for(&input.team_label).ok_or_else(|| {
            RoutingError::UnknownTeamLabel { team_label: input.team_label.clone() }
        })?;

        match route.scope {
            RouteScope::VendorMaintenance => self.resolve_vendor(input, &route.role),
            RouteScope::RoleWide => self.resolve_role_wide(&route.role, input),
            RouteScope::DivisionScoped => self.resolve_division(input, &route.role),
        }
    }

    /// Resolves the reviewer for a chain tier by canonical role instead of
    /// team label (the chain runner has no row team cell to start from).
    pub fn resolve_role(
        &self,
        role: &str,
        input: &RoutingInput,
    ) -> Result<ResolvedAssignee, RoutingError> {
        match self.policy.scope_of_role(role) {
            Some(RouteScope::VendorMaintenance) => self.resolve_vendor(input, role),
            Some(RouteScope::RoleWide) => self.resolve_role_wide(role, input),
            Some(RouteScope::DivisionScoped) | None => self.resolve_division(input, role),
        }
    }

    fn resolve_vendor(
        &self,
        input: &RoutingInput,
        role: &str,
    ) -> Result<ResolvedAssignee, RoutingError> {
        let site_code = self.policy.site_code_from_row(&input.row).ok_or_else(|| {
            RoutingError::MissingSiteCode { team_label: input.team_label.clone() }
        })?;

        // Override membership wins over circle routing even when the circle
        // is known, unless an open action already routes this site+role to
        // the override vendor.
        if self.overrides.contains(&site_code)
            && !self.probe.has_open_vendor_route(
                &site_code,
                role,
                &self.policy.override_vendor,
            )
        {
            let vendor = self.policy.override_vendor.clone();
            let assignee = self
                .pick(|u| u.role_matches(role) && u.vendor_matches(&vendor))
                .ok_or_else(|| RoutingError::NoEligibleAssignee {
                    role: role.to_string(),
                    vendor: Some(vendor.clone()),
                    circle: None,
                    division: None,
                })?;

            return Ok(ResolvedAssignee {
                user_id: assignee.user_id.clone(),
                role: role.to_string(),
                vendor: Some(vendor),
                circle: assignee.circle.clone(),
                division: None,
                site_code: Some(site_code),
                basis: RoutingBasis::VendorOverride,
            });
        }

        let circle = self
            .policy
            .circle_from_row(&input.row)
            .or_else(|| {
                self.policy
                    .division_from_row(&input.row)
                    .and_then(|d| self.policy.circle_for_division(&d).map(str::to_string))
            })
            .ok_or_else(|| RoutingError::MissingCircle {
                team_label: input.team_label.clone(),
            })?;

        let group = self
            .policy
            .vendor_for_circle(&circle)
            .ok_or_else(|| RoutingError::UnmappedCircle { circle: circle.clone() })?;

        let vendor = group.vendor.clone();
        let circles: Vec<String> = group.circles.iter().map(|c| normalize_key(c)).collect();
        let assignee = self
            .pick(|u| {
                u.role_matches(role)
                    && u.vendor_matches(&vendor)
                    && u.circle
                        .as_deref()
                        .is_some_and(|c| circles.contains(&normalize_key(c)))
            })
            .ok_or_else(|| RoutingError::NoEligibleAssignee {
                role: role.to_string(),
                vendor: Some(vendor.clone()),
                circle: Some(circle.clone()),
                division: None,
            })?;

        Ok(ResolvedAssignee {
            user_id: assignee.user_id.clone(),
            role: role.to_string(),
            vendor: Some(vendor),
            circle: Some(circle),
            division: None,
            site_code: Some(site_code),
            basis: RoutingBasis::CircleVendor,
        })
    }

    fn resolve_role_wide(
        &self,
        role: &str,
        input: &RoutingInput,
    ) -> Result<ResolvedAssignee, RoutingError> {
        // Any-of policy, kept deliberately: no load balancing, no claim
        // semantics. Lowest user id makes the pick reproducible.
        let assignee = self.pick(|u| u.role_matches(role)).ok_or_else(|| {
            RoutingError::NoEligibleAssignee {
                role: role.to_string(),
                vendor: None,
                circle: None,
                division: None,
            }
        })?;

        Ok(ResolvedAssignee {
            user_id: assignee.user_id.clone(),
            role: role.to_string(),
            vendor: assignee.vendor.clone(),
            circle: assignee.circle.clone(),
            division: None,
            site_code: self.policy.site_code_from_row(&input.row),
            basis: RoutingBasis::RoleWide,
        })
    }

    fn resolve_division(
        &self,
        input: &RoutingInput,
        role: &str,
    ) -> Result<ResolvedAssignee, RoutingError> {
        let division = self.policy.division_from_row(&input.row).ok_or_else(|| {
            RoutingError::MissingDivision { team_label: input.team_label.clone() }
        })?;

        let assignee = self
            .pick(|u| u.role_matches(role) && u.in_division(&division))
            .ok_or_else(|| RoutingError::NoEligibleAssignee {
                role: role.to_string(),
                vendor: None,
                circle: None,
                division: Some(division.clone()),
            })?;

        Ok(ResolvedAssignee {
            user_id: assignee.user_id.clone(),
            role: role.to_string(),
            vendor: assignee.vendor.clone(),
            circle: assignee.circle.clone(),
            division: Some(division),
            site_code: self.policy.site_code_from_row(&input.row),
            basis: RoutingBasis::DivisionScoped,
        })
    }

    fn pick<F>(&self, filter: F) -> Option<&DirectoryUser>
    where
        F: Fn(&DirectoryUser) -> bool,
    {
        self.users
            .iter()
            .filter(|u| u.is_eligible() && filter(u))
            .min_by(|a, b| a.user_id.cmp(&b.user_id))
    }
}

trait DirectoryMatch {
    fn role_matches(&self, role: &str) -> bool;
    fn vendor_matches(&self, vendor: &str) -> bool;
}

impl DirectoryMatch for DirectoryUser {
    fn role_matches(&self, role: &str) -> bool {
        normalize_key(&self.role) == normalize_key(role)
    }

    fn vendor_matches(&self, vendor: &str) -> bool {
        self.vendor.as_deref().is_some_and(|v| normalize_key(v) == normalize_key(vendor))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::domain::directory::DirectoryUser;

    use super::{
        InMemoryVendorOverrideSet, NoOpenRoutes, OpenRouteProbe, RoutingBasis, RoutingError,
        RoutingInput, RoutingResolver,
    };
    use super::policy::RoutingPolicy;

    fn user(
        id: &str,
        role: &str,
        vendor: Option<&str>,
        circle: Option<&str>,
        divisions: &[&str],
    ) -> DirectoryUser {
        DirectoryUser {
            user_id: id.to_string(),
            display_name: id.to_string(),
            role: role.to_string(),
            vendor: vendor.map(str::to_string),
            circle: circle.map(str::to_string),
            divisions: divisions.iter().map(|d| d.to_string()).collect(),
            active: true,
            approved: true,
        }
    }

    fn directory() -> Vec<DirectoryUser> {
        vec![
            user("u-amc-east", "amc_technician", Some("northgrid"), Some("east"), &[]),
            user("u-amc-west", "amc_technician", Some("ringcom"), Some("west"), &[]),
            user("u-amc-sky", "amc_technician", Some("skybridge"), Some("west"), &[]),
            user("u-sig-hsr", "signal_maintainer", None, None, &["HSR"]),
            user("u-equip-1", "equipment_inspector", None, None, &["HSR", "BZA"]),
            user("u-ccr-2", "ccr_controller", None, None, &[]),
            user("u-ccr-1", "ccr_controller", None, None, &[]),
        ]
    }

    fn amc_row(site: &str, circle: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("Site Code".to_string(), site.to_string()),
            ("circle".to_string(), circle.to_string()),
        ])
    }

    fn input(team: &str, row: BTreeMap<String, String>) -> RoutingInput {
        RoutingInput { team_label: team.to_string(), row, requested_by: "u-control".to_string() }
    }

    fn resolver(
        overrides: InMemoryVendorOverrideSet,
    ) -> RoutingResolver<InMemoryVendorOverrideSet, NoOpenRoutes> {
        RoutingResolver::new(directory(), RoutingPolicy::default(), overrides, NoOpenRoutes)
    }

    #[test]
    fn override_site_routes_to_override_vendor_regardless_of_circle() {
        let resolver =
            resolver(InMemoryVendorOverrideSet::with_sites(vec!["3w2872".to_string()]));

        let resolved = resolver
            .resolve(&input("AMC", amc_row("3W2872", "east")))
            .expect("override routing succeeds");

        assert_eq!(resolved.user_id, "u-amc-sky");
        assert_eq!(resolved.vendor.as_deref(), Some("skybridge"));
        assert_eq!(resolved.basis, RoutingBasis::VendorOverride);
    }

    #[test]
    fn non_override_site_follows_circle_vendor_mapping() {
        let resolver = resolver(InMemoryVendorOverrideSet::default());

        let resolved = resolver
            .resolve(&input("AMC", amc_row("9K1001", "east")))
            .expect("circle routing succeeds");

        assert_eq!(resolved.user_id, "u-amc-east");
        assert_eq!(resolved.vendor.as_deref(), Some("northgrid"));
        assert_eq!(resolved.basis, RoutingBasis::CircleVendor);
    }

    #[test]
    fn circle_is_derived_from_division_when_absent() {
        let resolver = resolver(InMemoryVendorOverrideSet::default());
        let row = BTreeMap::from([
            ("site code".to_string(), "9K1002".to_string()),
            ("Division".to_string(), "HSR".to_string()),
        ]);

        let resolved = resolver.resolve(&input("AMC", row)).expect("division fallback works");

        assert_eq!(resolved.circle.as_deref(), Some("east"));
        assert_eq!(resolved.vendor.as_deref(), Some("northgrid"));
    }

    #[test]
    fn open_override_route_falls_back_to_circle_vendor() {
        struct AlwaysOpen;
        impl OpenRouteProbe for AlwaysOpen {
            fn has_open_vendor_route(&self, _s: &str, _r: &str, _v: &str) -> bool {
                true
            }
        }

        let resolver = RoutingResolver::new(
            directory(),
            RoutingPolicy::default(),
            InMemoryVendorOverrideSet::with_sites(vec!["3W2872".to_string()]),
            AlwaysOpen,
        );

        let resolved = resolver
            .resolve(&input("AMC", amc_row("3W2872", "east")))
            .expect("falls back when the override route is already open");

        assert_eq!(resolved.basis, RoutingBasis::CircleVendor);
        assert_eq!(resolved.vendor.as_deref(), Some("northgrid"));
    }

    #[test]
    fn role_wide_routing_ignores_division_and_picks_deterministically() {
        let resolver = resolver(InMemoryVendorOverrideSet::default());

        let resolved = resolver
            .resolve(&input("CCR", BTreeMap::new()))
            .expect("role-wide routing succeeds");

        assert_eq!(resolved.user_id, "u-ccr-1");
        assert_eq!(resolved.basis, RoutingBasis::RoleWide);
    }

    #[test]
    fn division_scoped_routing_matches_membership_case_insensitively() {
        let resolver = resolver(InMemoryVendorOverrideSet::default());
        let row = BTreeMap::from([("division".to_string(), "hsr".to_string())]);

        let resolved = resolver.resolve(&input("Signal", row)).expect("division routing");

        assert_eq!(resolved.user_id, "u-sig-hsr");
        assert_eq!(resolved.basis, RoutingBasis::DivisionScoped);
    }

    #[test]
    fn missing_division_with_no_eligible_user_is_a_typed_failure() {
        let resolver = resolver(InMemoryVendorOverrideSet::default());
        let row = BTreeMap::from([("division".to_string(), "NED".to_string())]);

        let error = resolver.resolve(&input("Signal", row)).expect_err("nobody covers NED");

        assert_eq!(
            error,
            RoutingError::NoEligibleAssignee {
                role: "signal_maintainer".to_string(),
                vendor: None,
                circle: None,
                division: Some("NED".to_string()),
            }
        );
    }

    #[test]
    fn unknown_team_label_is_rejected() {
        let resolver = resolver(InMemoryVendorOverrideSet::default());

        let error = resolver
            .resolve(&input("Catering", BTreeMap::new()))
            .expect_err("catering is not routable");

        assert!(matches!(error, RoutingError::UnknownTeamLabel { .. }));
    }

    #[test]
    fn vendor_routing_without_site_code_is_rejected() {
        let resolver = resolver(InMemoryVendorOverrideSet::default());

        let error = resolver
            .resolve(&input("AMC", BTreeMap::new()))
            .expect_err("no site code to route on");

        assert!(matches!(error, RoutingError::MissingSiteCode { .. }));
    }

    #[test]
    fn inactive_users_are_never_selected() {
        let mut users = directory();
        for u in &mut users {
            if u.user_id == "u-ccr-1" {
                u.active = false;
            }
        }
        let resolver = RoutingResolver::new(
            users,
            RoutingPolicy::default(),
            InMemoryVendorOverrideSet::default(),
            NoOpenRoutes,
        );

        let resolved = resolver
            .resolve(&input("CCR", BTreeMap::new()))
            .expect("second controller is still eligible");

        assert_eq!(resolved.user_id, "u-ccr-2");
    }
}
