//! Route protection.
//!
//! Every navigation is run through [`RoleRouteTable::guard`], which either lets it through or
//! names the route to redirect to. Redirects are silent: a wrong-role or signed-out visit is not
//! an error, it just lands somewhere sensible.

use crate::constants::{
    TABLET_AUTH_ROUTES, TABLET_HOME_ROUTE, TABLET_LOGIN_ROUTE, TABLET_NAMESPACE, WEB_AUTH_ROUTES,
    WEB_LOGIN_ROUTE,
};
use crate::session::{Role, SessionState};
use std::collections::HashMap;

/// Outcome of a route check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    Redirect(String),
}

/// Role → ordered list of permitted top-level routes. The first entry is the role's landing
/// route.
#[derive(Clone, Debug)]
pub struct RoleRouteTable {
    web: HashMap<Role, Vec<String>>,
    tablet: Vec<String>,
}

impl Default for RoleRouteTable {
    fn default() -> Self {
        Self::default_table()
    }
}

impl RoleRouteTable {
    /// Build a table from explicit per-role route lists.
    ///
    /// Roles without an entry (or with an empty list) can only reach auth routes.
    pub fn new(web: HashMap<Role, Vec<String>>, tablet: Vec<String>) -> Self {
        Self { web, tablet }
    }

    /// The portal's route table.
    pub fn default_table() -> Self {
        fn routes(paths: &[&str]) -> Vec<String> {
            paths.iter().map(|p| p.to_string()).collect()
        }

        let mut web = HashMap::new();
        web.insert(
            Role::Optometrist,
            routes(&[
                "/availability",
                "/create-patient-request",
                "/patient-files",
                "/payments",
                "/settings",
                "/chat",
            ]),
        );
        web.insert(
            Role::Practice,
            routes(&[
                "/overview",
                "/create-patient-request",
                "/patient-files",
                "/optometrists",
                "/payments",
                "/settings",
                "/chat",
            ]),
        );
        web.insert(
            Role::Reader,
            routes(&[
                "/todays-clinics",
                "/in-progress-file",
                "/patient-files",
                "/availability",
                "/settings",
                "/chat",
            ]),
        );
        web.insert(
            Role::Doctor,
            routes(&[
                "/todays-clinics",
                "/in-progress-file",
                "/patient-files",
                "/pending-approvals",
                "/availability",
                "/settings",
                "/chat",
            ]),
        );

        let tablet = routes(&[
            TABLET_HOME_ROUTE,
            "/tablet/patient-consent",
            "/tablet/payment",
        ]);

        Self { web, tablet }
    }

    /// Permitted routes for `role`, landing route first.
    pub fn routes_for(&self, role: Role) -> &[String] {
        self.web.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Landing route for `role`. Falls back to the login route for a role with no routes.
    pub fn default_route(&self, role: Role) -> &str {
        self.routes_for(role)
            .first()
            .map(String::as_str)
            .unwrap_or(WEB_LOGIN_ROUTE)
    }

    pub fn is_allowed(&self, role: Role, path: &str) -> bool {
        let path = normalise(path);
        self.routes_for(role)
            .iter()
            .any(|route| matches_route(route, path))
    }

    /// Decide where a navigation to `path` should end up given the current sessions.
    pub fn guard(&self, sessions: &SessionState, path: &str) -> RouteDecision {
        let path = normalise(path);

        if matches_route(TABLET_NAMESPACE, path) {
            return self.guard_tablet(sessions, path);
        }

        let is_auth_route = WEB_AUTH_ROUTES.iter().any(|r| matches_route(r, path));
        match sessions.web.as_ref() {
            Some(session) => {
                let role = session.role();
                if is_auth_route || !self.is_allowed(role, path) {
                    tracing::debug!(%role, path, "redirecting web navigation");
                    RouteDecision::Redirect(self.default_route(role).to_string())
                } else {
                    RouteDecision::Allow
                }
            }
            None if is_auth_route => RouteDecision::Allow,
            None => RouteDecision::Redirect(WEB_LOGIN_ROUTE.to_string()),
        }
    }

    fn guard_tablet(&self, sessions: &SessionState, path: &str) -> RouteDecision {
        let is_auth_route = TABLET_AUTH_ROUTES.iter().any(|r| matches_route(r, path));
        let allowed = self.tablet.iter().any(|route| matches_route(route, path));

        match (sessions.tablet.is_some(), is_auth_route) {
            (true, true) => RouteDecision::Redirect(TABLET_HOME_ROUTE.to_string()),
            (true, false) if allowed => RouteDecision::Allow,
            (true, false) => RouteDecision::Redirect(TABLET_HOME_ROUTE.to_string()),
            (false, true) => RouteDecision::Allow,
            (false, false) => RouteDecision::Redirect(TABLET_LOGIN_ROUTE.to_string()),
        }
    }
}

/// Strip query string, fragment and trailing slash.
fn normalise(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or("");
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// `route` matches itself and anything nested under it.
fn matches_route(route: &str, path: &str) -> bool {
    path == route
        || path
            .strip_prefix(route)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Identity, Session, SessionKind};

    fn signed_in(kind: SessionKind, role: Role) -> SessionState {
        let session = Session::new(
            kind,
            Identity {
                id: "user-1".into(),
                name: "User".into(),
                role,
                practice: None,
            },
            "token",
        );
        match kind {
            SessionKind::Web => SessionState {
                web: Some(session),
                tablet: None,
            },
            SessionKind::Tablet => SessionState {
                web: None,
                tablet: Some(session),
            },
        }
    }

    #[test]
    fn optometrist_on_practice_route_goes_to_availability() {
        let table = RoleRouteTable::default_table();
        let sessions = signed_in(SessionKind::Web, Role::Optometrist);
        assert_eq!(
            table.guard(&sessions, "/overview"),
            RouteDecision::Redirect("/availability".into())
        );
    }

    #[test]
    fn role_defaults() {
        let table = RoleRouteTable::default_table();
        assert_eq!(table.default_route(Role::Optometrist), "/availability");
        assert_eq!(table.default_route(Role::Practice), "/overview");
        assert_eq!(table.default_route(Role::Doctor), "/todays-clinics");
        assert_eq!(table.default_route(Role::Reader), "/todays-clinics");
    }

    #[test]
    fn nested_routes_inherit_permission() {
        let table = RoleRouteTable::default_table();
        let sessions = signed_in(SessionKind::Web, Role::Doctor);
        assert_eq!(
            table.guard(&sessions, "/patient-files/abc?tab=report"),
            RouteDecision::Allow
        );
        // Prefix without a path separator is a different route.
        assert_eq!(
            table.guard(&sessions, "/patient-files-archive"),
            RouteDecision::Redirect("/todays-clinics".into())
        );
    }

    #[test]
    fn signed_in_user_is_bounced_off_auth_routes() {
        let table = RoleRouteTable::default_table();
        let sessions = signed_in(SessionKind::Web, Role::Practice);
        assert_eq!(
            table.guard(&sessions, "/login"),
            RouteDecision::Redirect("/overview".into())
        );
    }

    #[test]
    fn signed_out_user_goes_to_matching_login() {
        let table = RoleRouteTable::default_table();
        let sessions = SessionState::default();
        assert_eq!(
            table.guard(&sessions, "/patient-files"),
            RouteDecision::Redirect("/login".into())
        );
        assert_eq!(
            table.guard(&sessions, "/tablet/patient-consent"),
            RouteDecision::Redirect("/tablet/login".into())
        );
        assert_eq!(table.guard(&sessions, "/reset-password"), RouteDecision::Allow);
        assert_eq!(table.guard(&sessions, "/tablet/login"), RouteDecision::Allow);
    }

    #[test]
    fn tablet_and_web_sessions_do_not_cross() {
        let table = RoleRouteTable::default_table();

        let tablet_only = signed_in(SessionKind::Tablet, Role::Optometrist);
        assert_eq!(
            table.guard(&tablet_only, "/tablet/login"),
            RouteDecision::Redirect("/tablet/home".into())
        );
        assert_eq!(
            table.guard(&tablet_only, "/availability"),
            RouteDecision::Redirect("/login".into())
        );

        let web_only = signed_in(SessionKind::Web, Role::Optometrist);
        assert_eq!(
            table.guard(&web_only, "/tablet/home"),
            RouteDecision::Redirect("/tablet/login".into())
        );
        assert_eq!(
            table.guard(&web_only, "/login"),
            RouteDecision::Redirect("/availability".into())
        );
    }

    #[test]
    fn root_redirects_to_landing_route() {
        let table = RoleRouteTable::default_table();
        let sessions = signed_in(SessionKind::Web, Role::Reader);
        assert_eq!(
            table.guard(&sessions, "/"),
            RouteDecision::Redirect("/todays-clinics".into())
        );
    }
}
