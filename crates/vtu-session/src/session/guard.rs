//! Route protection decisions.
//!
//! The guard only reads the current `AuthState`; it never drives transitions.

use serde::{Deserialize, Serialize};

use super::AuthState;

/// Declarative route classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteTable {
    pub login_route: String,
    /// Where signed-in users land when they open a landing page
    pub home_route: String,
    /// Pages signed-in users are moved away from (login included)
    pub landing_routes: Vec<String>,
    /// Route prefixes that require a session
    pub protected_prefixes: Vec<String>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            login_route: "/login".to_string(),
            home_route: "/dashboard".to_string(),
            landing_routes: vec![
                "/".to_string(),
                "/login".to_string(),
                "/register".to_string(),
            ],
            protected_prefixes: vec![
                "/dashboard".to_string(),
                "/profile".to_string(),
                "/wallet".to_string(),
                "/transactions".to_string(),
                "/services".to_string(),
                "/admin".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(tag = "kind", content = "to", rename_all = "snake_case")]
pub enum GuardDecision {
    Allow,
    /// Session state not settled yet: render nothing, redirect nowhere
    Defer,
    Redirect(String),
}

#[derive(Debug, Clone, Default)]
pub struct NavigationGuard {
    routes: RouteTable,
}

impl NavigationGuard {
    pub fn new(routes: RouteTable) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// The login route is never protected, even under a protected prefix
    pub fn is_protected(&self, route: &str) -> bool {
        let path = normalize(route);
        if path == normalize(&self.routes.login_route) {
            return false;
        }
        self.routes.protected_prefixes.iter().any(|prefix| {
            let prefix = normalize(prefix);
            path == prefix || path.starts_with(&format!("{}/", prefix.trim_end_matches('/')))
        })
    }

    pub fn is_landing(&self, route: &str) -> bool {
        let path = normalize(route);
        self.routes
            .landing_routes
            .iter()
            .any(|landing| normalize(landing) == path)
    }

    pub fn decide(&self, state: AuthState, route: &str) -> GuardDecision {
        if !state.is_settled() {
            return if self.is_protected(route) {
                GuardDecision::Defer
            } else {
                GuardDecision::Allow
            };
        }

        if state.is_signed_in() {
            if self.is_landing(route) {
                return GuardDecision::Redirect(self.routes.home_route.clone());
            }
            return GuardDecision::Allow;
        }

        if self.is_protected(route) {
            GuardDecision::Redirect(self.routes.login_route.clone())
        } else {
            GuardDecision::Allow
        }
    }
}

/// Strip query, fragment, and trailing slash
fn normalize(route: &str) -> &str {
    let end = route.find(['?', '#']).unwrap_or(route.len());
    let path = &route[..end];
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else if path.is_empty() {
        "/"
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> NavigationGuard {
        NavigationGuard::default()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/dashboard/"), "/dashboard");
        assert_eq!(normalize("/wallet?tab=fund#top"), "/wallet");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("?x=1"), "/");
    }

    #[test]
    fn test_protected_prefix_matching() {
        let guard = guard();
        assert!(guard.is_protected("/dashboard"));
        assert!(guard.is_protected("/dashboard/airtime"));
        assert!(guard.is_protected("/admin/providers?page=2"));
        assert!(!guard.is_protected("/dashboards"));
        assert!(!guard.is_protected("/login"));
        assert!(!guard.is_protected("/"));
    }

    #[test]
    fn test_never_redirects_while_bootstrapping() {
        let guard = guard();
        assert_eq!(guard.decide(AuthState::Bootstrapping, "/dashboard"), GuardDecision::Defer);
        assert_eq!(guard.decide(AuthState::Bootstrapping, "/login"), GuardDecision::Allow);
        assert_eq!(guard.decide(AuthState::Bootstrapping, "/"), GuardDecision::Allow);
        assert_eq!(guard.decide(AuthState::LoggingOut, "/wallet"), GuardDecision::Defer);
    }

    #[test]
    fn test_unauthenticated_redirects_protected_to_login() {
        let guard = guard();
        assert_eq!(
            guard.decide(AuthState::Unauthenticated, "/transactions"),
            GuardDecision::Redirect("/login".to_string())
        );
        assert_eq!(guard.decide(AuthState::Unauthenticated, "/login"), GuardDecision::Allow);
        assert_eq!(guard.decide(AuthState::Unauthenticated, "/about"), GuardDecision::Allow);
    }

    #[test]
    fn test_signed_in_leaves_landing_pages() {
        let guard = guard();
        for state in [
            AuthState::Authenticated,
            AuthState::Validating,
            AuthState::ExpiringSoon,
        ] {
            assert_eq!(
                guard.decide(state, "/login"),
                GuardDecision::Redirect("/dashboard".to_string())
            );
            assert_eq!(
                guard.decide(state, "/"),
                GuardDecision::Redirect("/dashboard".to_string())
            );
            assert_eq!(guard.decide(state, "/dashboard/data"), GuardDecision::Allow);
            assert_eq!(guard.decide(state, "/about"), GuardDecision::Allow);
        }
    }

    #[test]
    fn test_custom_route_table() {
        let guard = NavigationGuard::new(RouteTable {
            login_route: "/admin/login".to_string(),
            home_route: "/admin".to_string(),
            landing_routes: vec!["/admin/login".to_string()],
            protected_prefixes: vec!["/admin/".to_string()],
        });
        assert!(guard.is_protected("/admin"));
        assert!(guard.is_protected("/admin/maintenance"));
        assert!(!guard.is_protected("/admin/login"));
        assert_eq!(
            guard.decide(AuthState::Unauthenticated, "/admin/login"),
            GuardDecision::Allow
        );
        assert_eq!(
            guard.decide(AuthState::Unauthenticated, "/admin/maintenance"),
            GuardDecision::Redirect("/admin/login".to_string())
        );
    }

    #[test]
    fn test_guard_decision_serializes_for_clients() {
        let json = serde_json::to_string(&GuardDecision::Redirect("/login".to_string())).unwrap();
        assert_eq!(json, r#"{"kind":"redirect","to":"/login"}"#);
        let allow = serde_json::to_string(&GuardDecision::Allow).unwrap();
        assert_eq!(allow, r#"{"kind":"allow"}"#);
    }
}
