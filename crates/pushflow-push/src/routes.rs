//! Route resolution against the domains of an organization

use crate::error::{PushError, ResolutionError, Result};
use crate::plan::RouteBinding;
use pushflow_cloud::{ControlPlane, Domain, RemoteApp, Route, RouteQuery, Target};
use pushflow_core::{Application, RouteSpec, Warnings, random_route_host, sanitize_hostname};
use rand::seq::SliceRandom;

const ADJECTIVES: [&str; 24] = [
    "accountable", "active", "agile", "anxious", "appreciative", "balanced", "boisterous",
    "bold", "brave", "busy", "calm", "chatty", "cheerful", "clever", "courageous", "daring",
    "delightful", "fearless", "grateful", "happy", "lucky", "nimble", "quick", "wise",
];

const NOUNS: [&str; 24] = [
    "alligator", "antelope", "badger", "bat", "bear", "bison", "cheetah", "chimpanzee",
    "crocodile", "dolphin", "eland", "elephant", "fox", "gazelle", "giraffe", "hedgehog",
    "hippo", "impala", "jaguar", "kangaroo", "koala", "lemur", "lion", "wombat",
];

/// Source of the two words of a random route
pub trait RouteWords: Send + Sync {
    fn adjective_noun(&self) -> (String, String);
}

/// Picks both words at random
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomWords;

impl RouteWords for RandomWords {
    fn adjective_noun(&self) -> (String, String) {
        let mut rng = rand::thread_rng();
        let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("nimble");
        let noun = NOUNS.choose(&mut rng).copied().unwrap_or("wombat");
        (adjective.to_string(), noun.to_string())
    }
}

/// Find the domain an fqdn belongs to: the longest known suffix wins.
pub fn match_domain<'a>(spec: &RouteSpec, domains: &'a [Domain]) -> Option<&'a Domain> {
    spec.candidate_domains()
        .into_iter()
        .find_map(|candidate| domains.iter().find(|d| d.name.eq_ignore_ascii_case(candidate)))
}

/// Split a parsed route into a [`RouteQuery`] on one of `domains`.
pub fn resolve_route(spec: &RouteSpec, domains: &[Domain]) -> Result<RouteQuery> {
    let domain = match_domain(spec, domains).ok_or_else(|| ResolutionError::DomainNotFound {
        route: spec.to_string(),
    })?;

    if domain.is_tcp() && spec.port.is_none() {
        return Err(ResolutionError::TcpRouteWithoutPort {
            route: spec.to_string(),
            domain: domain.name.clone(),
        }
        .into());
    }
    if !domain.is_tcp() && spec.port.is_some() {
        return Err(ResolutionError::InvalidHttpRoute {
            route: spec.to_string(),
            domain: domain.name.clone(),
        }
        .into());
    }

    let host = if spec.fqdn.len() > domain.name.len() {
        spec.fqdn[..spec.fqdn.len() - domain.name.len() - 1].to_string()
    } else {
        String::new()
    };

    Ok(RouteQuery {
        domain_guid: domain.guid.clone(),
        domain_name: domain.name.clone(),
        host,
        path: spec.path.clone(),
        port: spec.port,
    })
}

/// Default (first listed) domain of the organization
fn default_domain<'a>(domains: &'a [Domain], target: &Target) -> Result<&'a Domain> {
    domains
        .iter()
        .find(|d| !d.internal)
        .ok_or_else(|| {
            ResolutionError::NoDefaultDomain {
                org: target.org_name.clone(),
            }
            .into()
        })
}

fn on_domain(domain: &Domain, host: String) -> RouteQuery {
    RouteQuery {
        domain_guid: domain.guid.clone(),
        domain_name: domain.name.clone(),
        host,
        path: None,
        port: None,
    }
}

/// Routes the application should have, before checking what exists.
pub(crate) fn desired_routes(
    app: &Application,
    remote: Option<&RemoteApp>,
    domains: &[Domain],
    target: &Target,
    words: &dyn RouteWords,
) -> Result<Vec<RouteQuery>> {
    if app.no_route {
        return Ok(Vec::new());
    }

    if !app.routes.is_empty() {
        return app
            .route_strings()
            .map(|route| {
                let spec: RouteSpec = route.parse().map_err(PushError::Validation)?;
                resolve_route(&spec, domains)
            })
            .collect();
    }

    // existing routes of an app are left alone
    if remote.is_some_and(|r| !r.routes.is_empty()) {
        return Ok(Vec::new());
    }

    let domain = default_domain(domains, target)?;
    let host = if app.random_route {
        let (adjective, noun) = words.adjective_noun();
        random_route_host(&app.name, &adjective, &noun)
    } else {
        sanitize_hostname(&app.name)
    };
    Ok(vec![on_domain(domain, host)])
}

/// Routes to take away from an existing app. Only `no-route` removes
/// routes; listing fewer routes than are mapped leaves the rest alone.
pub(crate) fn stale_routes(app: &Application, remote: Option<&RemoteApp>) -> Vec<Route> {
    match remote {
        Some(remote) if app.no_route => remote.routes.clone(),
        _ => Vec::new(),
    }
}

/// Look up each desired route and work out what is left to do.
pub(crate) async fn bind_routes(
    control_plane: &dyn ControlPlane,
    target: &Target,
    remote: Option<&RemoteApp>,
    queries: Vec<RouteQuery>,
    warnings: &mut Warnings,
) -> Result<Vec<RouteBinding>> {
    let mut bindings = Vec::with_capacity(queries.len());
    for query in queries {
        let (existing, w) = control_plane.find_route(&query).await?;
        warnings.extend(w);

        let binding = match existing {
            Some(route) if route.space_guid != target.space_guid => {
                return Err(ResolutionError::RouteInOtherSpace { route: query.url() }.into());
            }
            Some(route) => {
                let url = route.url();
                RouteBinding {
                    query,
                    route_guid: Some(route.guid),
                    mapped: remote.is_some_and(|r| r.has_route(&url)),
                }
            }
            None => RouteBinding {
                query,
                route_guid: None,
                mapped: false,
            },
        };
        tracing::debug!(
            "Route {}: exists={} mapped={}",
            binding.url(),
            binding.route_guid.is_some(),
            binding.mapped
        );
        bindings.push(binding);
    }
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushflow_core::ManifestRoute;

    struct FixedWords;

    impl RouteWords for FixedWords {
        fn adjective_noun(&self) -> (String, String) {
            ("brave".into(), "koala".into())
        }
    }

    fn domains() -> Vec<Domain> {
        vec![
            Domain::http("d-apps", "apps.example.com"),
            Domain::http("d-example", "example.com"),
            Domain::tcp("d-tcp", "tcp.example.com"),
        ]
    }

    fn target() -> Target {
        Target::new("org-1", "acme", "space-1", "dev")
    }

    fn web_route() -> Route {
        Route {
            guid: "route-web".into(),
            space_guid: "space-1".into(),
            domain_guid: "d-apps".into(),
            domain_name: "apps.example.com".into(),
            host: "web".into(),
            path: None,
            port: None,
        }
    }

    #[test]
    fn test_longest_suffix_wins() {
        let spec: RouteSpec = "web.apps.example.com/api".parse().unwrap();
        let query = resolve_route(&spec, &domains()).unwrap();
        assert_eq!(query.domain_guid, "d-apps");
        assert_eq!(query.host, "web");
        assert_eq!(query.path.as_deref(), Some("/api"));

        let spec: RouteSpec = "www.example.com".parse().unwrap();
        let query = resolve_route(&spec, &domains()).unwrap();
        assert_eq!(query.domain_guid, "d-example");
        assert_eq!(query.host, "www");
    }

    #[test]
    fn test_bare_domain_route() {
        let spec: RouteSpec = "apps.example.com".parse().unwrap();
        let query = resolve_route(&spec, &domains()).unwrap();
        assert_eq!(query.domain_guid, "d-apps");
        assert_eq!(query.host, "");
    }

    #[test]
    fn test_tcp_route() {
        let spec: RouteSpec = "tcp.example.com:1024".parse().unwrap();
        let query = resolve_route(&spec, &domains()).unwrap();
        assert_eq!(query.domain_guid, "d-tcp");
        assert_eq!(query.port, Some(1024));

        let spec: RouteSpec = "tcp.example.com".parse().unwrap();
        assert!(matches!(
            resolve_route(&spec, &domains()),
            Err(PushError::Resolution(ResolutionError::TcpRouteWithoutPort { .. }))
        ));
    }

    #[test]
    fn test_port_on_http_domain() {
        let spec: RouteSpec = "web.apps.example.com:8080".parse().unwrap();
        assert!(matches!(
            resolve_route(&spec, &domains()),
            Err(PushError::Resolution(ResolutionError::InvalidHttpRoute { .. }))
        ));
    }

    #[test]
    fn test_unknown_domain() {
        let spec: RouteSpec = "web.unknown.org".parse().unwrap();
        assert_eq!(
            resolve_route(&spec, &domains()),
            Err(PushError::Resolution(ResolutionError::DomainNotFound {
                route: "web.unknown.org".into()
            }))
        );
    }

    #[test]
    fn test_default_route_for_new_app() {
        let app = Application::named("My_App");
        let routes = desired_routes(&app, None, &domains(), &target(), &FixedWords).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].url(), "my-app.apps.example.com");
    }

    #[test]
    fn test_random_route() {
        let app = Application {
            random_route: true,
            ..Application::named("web")
        };
        let routes = desired_routes(&app, None, &domains(), &target(), &FixedWords).unwrap();
        assert_eq!(routes[0].url(), "web-brave-koala.apps.example.com");
    }

    #[test]
    fn test_existing_app_keeps_routes() {
        let app = Application {
            random_route: true,
            ..Application::named("web")
        };
        let remote = RemoteApp {
            routes: vec![web_route()],
            ..Default::default()
        };
        let routes =
            desired_routes(&app, Some(&remote), &domains(), &target(), &FixedWords).unwrap();
        assert!(routes.is_empty());

        // an existing app without any route gets the default one
        let plain = Application::named("web");
        let bare = RemoteApp::default();
        let routes = desired_routes(&plain, Some(&bare), &domains(), &target(), &FixedWords).unwrap();
        assert_eq!(routes[0].url(), "web.apps.example.com");
    }

    #[test]
    fn test_no_route() {
        let app = Application {
            no_route: true,
            routes: vec![],
            ..Application::named("worker")
        };
        assert!(
            desired_routes(&app, None, &domains(), &target(), &FixedWords)
                .unwrap()
                .is_empty()
        );

        let explicit = Application {
            routes: vec![ManifestRoute::new("api.example.com")],
            ..Application::named("api")
        };
        let routes = desired_routes(&explicit, None, &domains(), &target(), &FixedWords).unwrap();
        assert_eq!(routes[0].url(), "api.example.com");
    }

    #[test]
    fn test_no_route_unmaps_existing_routes() {
        let worker = Application {
            no_route: true,
            ..Application::named("web")
        };
        let remote = RemoteApp {
            routes: vec![web_route()],
            ..Default::default()
        };
        assert_eq!(stale_routes(&worker, Some(&remote)), vec![web_route()]);
        assert!(stale_routes(&worker, None).is_empty());

        let plain = Application::named("web");
        assert!(stale_routes(&plain, Some(&remote)).is_empty());
    }

    #[test]
    fn test_no_default_domain() {
        let app = Application::named("web");
        assert_eq!(
            desired_routes(&app, None, &[], &target(), &FixedWords),
            Err(PushError::Resolution(ResolutionError::NoDefaultDomain {
                org: "acme".into()
            }))
        );
    }
}
