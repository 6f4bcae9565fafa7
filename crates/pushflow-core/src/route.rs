//! Route parsing
//!
//! A manifest route looks like `host.domain.tld[:port][/path]`. Parsing
//! only checks the shape; which part is the host and which the domain is
//! decided later against the domains the platform knows about.

use crate::error::ValidationError;
use std::fmt;
use std::str::FromStr;

/// Parsed manifest route
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteSpec {
    /// Fully qualified name, host and domain not yet split.
    pub fqdn: String,
    pub port: Option<u16>,
    /// Always starts with `/` when present.
    pub path: Option<String>,
}

impl RouteSpec {
    /// Suffixes of the fqdn that could be the domain, longest first.
    ///
    /// `a.b.example.com` yields `a.b.example.com`, `b.example.com`,
    /// `example.com` and `com`.
    pub fn candidate_domains(&self) -> Vec<&str> {
        let mut candidates = vec![self.fqdn.as_str()];
        let mut rest = self.fqdn.as_str();
        while let Some((_, tail)) = rest.split_once('.') {
            candidates.push(tail);
            rest = tail;
        }
        candidates
    }

    pub fn is_wildcard(&self) -> bool {
        self.fqdn.starts_with("*.")
    }
}

impl FromStr for RouteSpec {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidRoute {
            route: s.to_string(),
        };

        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        let (authority, path) = match s.find('/') {
            Some(idx) => (&s[..idx], Some(&s[idx..])),
            None => (s, None),
        };
        if matches!(path, Some(p) if p.len() < 2 || p.starts_with("//")) {
            return Err(invalid());
        }

        let (fqdn, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port.parse().map_err(|_| invalid())?;
                (host, Some(port))
            }
            None => (authority, None),
        };

        if !is_valid_fqdn(fqdn) {
            return Err(invalid());
        }

        Ok(Self {
            fqdn: fqdn.to_ascii_lowercase(),
            port,
            path: path.map(str::to_string),
        })
    }
}

impl fmt::Display for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fqdn)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        if let Some(path) = &self.path {
            f.write_str(path)?;
        }
        Ok(())
    }
}

fn is_valid_fqdn(fqdn: &str) -> bool {
    let labels: Vec<&str> = fqdn.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    labels.iter().enumerate().all(|(i, label)| {
        if *label == "*" {
            return i == 0;
        }
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Turn an application name into something usable as a hostname.
///
/// Lowercases, maps spaces and underscores to `-`, drops every other
/// character outside `[a-z0-9-]` and trims dashes from both ends.
pub fn sanitize_hostname(name: &str) -> String {
    let mapped: String = name
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' | '_' => Some('-'),
            c if c.is_ascii_alphanumeric() || c == '-' => Some(c),
            _ => None,
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

/// Host for a random route: `<sanitized-name>-<adjective>-<noun>`.
pub fn random_route_host(name: &str, adjective: &str, noun: &str) -> String {
    let base = sanitize_hostname(name);
    if base.is_empty() {
        format!("{}-{}", adjective, noun)
    } else {
        format!("{}-{}-{}", base, adjective, noun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_routes() {
        let with_port: RouteSpec = "www.x.fun:1234".parse().unwrap();
        assert_eq!(with_port.fqdn, "www.x.fun");
        assert_eq!(with_port.port, Some(1234));
        assert_eq!(with_port.path, None);

        let with_path: RouteSpec = "www.x.fun/foo_1+2.html".parse().unwrap();
        assert_eq!(with_path.fqdn, "www.x.fun");
        assert_eq!(with_path.path.as_deref(), Some("/foo_1+2.html"));

        let wildcard: RouteSpec = "*.x.fun".parse().unwrap();
        assert!(wildcard.is_wildcard());
    }

    #[test]
    fn test_parse_invalid_routes() {
        for route in ["http:/www.hardknox.com", "I R ROUTE", "potato", "a.*.com", "x.com:abc", "x..com"] {
            assert_eq!(
                route.parse::<RouteSpec>(),
                Err(ValidationError::InvalidRoute {
                    route: route.to_string()
                }),
                "{route}"
            );
        }
    }

    #[test]
    fn test_candidate_domains_longest_first() {
        let route: RouteSpec = "a.b.example.com".parse().unwrap();
        assert_eq!(
            route.candidate_domains(),
            vec!["a.b.example.com", "b.example.com", "example.com", "com"]
        );
    }

    #[test]
    fn test_display_round_trips_text() {
        let route: RouteSpec = "Web.Example.com:8080/api".parse().unwrap();
        assert_eq!(route.to_string(), "web.example.com:8080/api");
    }

    #[test]
    fn test_sanitize_hostname() {
        assert_eq!(sanitize_hostname("some a$pp nAme"), "some-app-name");
        assert_eq!(sanitize_hostname("a--b"), "a--b");
        assert_eq!(sanitize_hostname("my_app"), "my-app");
        assert_eq!(sanitize_hostname("@@@"), "");
    }

    #[test]
    fn test_random_route_host() {
        assert_eq!(
            random_route_host("some a$pp nAme", "striped", "apple"),
            "some-app-name-striped-apple"
        );
        assert_eq!(random_route_host("@@@", "striped", "apple"), "striped-apple");
    }
}
