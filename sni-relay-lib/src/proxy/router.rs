use ahash::AHashMap;

/// Upstream dial target derived from the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub host: String,
    pub port: u16,
}

impl Upstream {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Static map from SNI hostname to upstream. Keys are lowercase ASCII and
/// matched case-sensitively; the table is immutable after startup.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: AHashMap<String, Upstream>,
}

impl RouteTable {
    pub fn new(routes: impl IntoIterator<Item = (String, Upstream)>) -> Self {
        Self { routes: routes.into_iter().collect() }
    }

    /// Exact-match lookup; absence means the route is denied.
    pub fn lookup(&self, sni: &str) -> Option<&Upstream> {
        self.routes.get(sni)
    }

    /// Sorted hostnames, for logs and the stats endpoint.
    pub fn hostnames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// The firmware-update domains this proxy fronts, each routed to itself
/// on the standard TLS port.
pub fn default_routes() -> RouteTable {
    const DOMAINS: [&str; 6] = [
        "fw-download.ubnt.com",
        "fw-update.ubnt.com",
        "fw-update.ui.com",
        "apt.artifacts.ui.com",
        "apt-beta.artifacts.ui.com",
        "apt-release-candidate.artifacts.ui.com",
    ];
    RouteTable::new(
        DOMAINS
            .iter()
            .map(|domain| (domain.to_string(), Upstream::new(*domain, 443))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_routes_cover_firmware_domains() {
        let routes = default_routes();
        assert_eq!(routes.len(), 6);
        let upstream = routes
            .lookup("fw-download.ubnt.com")
            .expect("default route present");
        assert_eq!(upstream, &Upstream::new("fw-download.ubnt.com", 443));
    }

    #[test]
    fn test_unknown_sni_denied() {
        let routes = default_routes();
        assert!(routes.lookup("example.com").is_none());
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let routes = default_routes();
        assert!(routes.lookup("FW-DOWNLOAD.UBNT.COM").is_none());
    }

    #[test]
    fn test_injected_table() {
        let routes = RouteTable::new([("svc.test".to_string(), Upstream::new("127.0.0.1", 4443))]);
        assert_eq!(routes.lookup("svc.test").map(|u| u.port), Some(4443));
    }

    #[test]
    fn test_hostnames_sorted() {
        let names = default_routes().hostnames();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
