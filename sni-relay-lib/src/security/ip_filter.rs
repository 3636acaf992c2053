use std::net::{IpAddr, Ipv4Addr};

use ipnet::Ipv4Net;
use tracing::warn;

/// One allow-list entry. The textual form the operator wrote is retained
/// for the stats endpoint; an exact address is stored as a `/32` network.
#[derive(Debug, Clone)]
struct FilterRule {
    text: String,
    net: Ipv4Net,
}

/// Source-address allow-list with CIDR support.
///
/// Decision logic:
/// - Empty rule set: allow everything (development convenience).
/// - Any universal `0.0.0.0/0` rule: allow everything.
/// - IPv6 peers: deny (the allow-list contract is IPv4 only).
/// - Otherwise: allow on the first matching rule.
#[derive(Debug, Clone, Default)]
pub struct IpFilter {
    rules: Vec<FilterRule>,
}

impl IpFilter {
    /// Parse a comma-separated list of `A.B.C.D` or `A.B.C.D/N` entries.
    ///
    /// Invalid entries are dropped with a warning; they never fail startup.
    pub fn parse(list: &str) -> Self {
        let mut rules = Vec::new();
        for entry in list.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match parse_rule(entry) {
                Some(net) => rules.push(FilterRule { text: entry.to_string(), net }),
                None => warn!(rule = entry, "dropping invalid allow-list entry"),
            }
        }
        Self { rules }
    }

    pub fn is_allowed(&self, addr: IpAddr) -> bool {
        if self.rules.is_empty() || self.allows_any() {
            return true;
        }
        let IpAddr::V4(v4) = addr else {
            return false;
        };
        self.rules.iter().any(|r| r.net.contains(&v4))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// True when a universal `0.0.0.0/0` rule is present.
    pub fn allows_any(&self) -> bool {
        self.rules.iter().any(|r| r.net.prefix_len() == 0)
    }

    /// Textual rule forms, as configured.
    pub fn rules(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.text.clone()).collect()
    }
}

fn parse_rule(entry: &str) -> Option<Ipv4Net> {
    if let Some((addr, prefix)) = entry.split_once('/') {
        let addr: Ipv4Addr = addr.parse().ok()?;
        let prefix: u8 = prefix.parse().ok()?;
        // trunc() zeroes the host bits so `10.1.2.3/8` and `10.0.0.0/8`
        // describe the same network.
        Some(Ipv4Net::new(addr, prefix).ok()?.trunc())
    } else {
        let addr: Ipv4Addr = entry.parse().ok()?;
        Ipv4Net::new(addr, 32).ok()
    }
}
