//! IP allow-list matching
//!
//! Candidate addresses come from the connection itself and, when the
//! operator trusts the proxies in front of us, from proxy-reported
//! addresses. A request is exempt from maintenance when any candidate falls
//! inside any allow-listed CIDR range. Malformed ranges or addresses never
//! match.

use hyper::Request;
use std::net::{IpAddr, SocketAddr};

/// Header carrying the proxy chain of client addresses
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Peer address of the connection a request arrived on.
///
/// The server inserts this into the request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

/// Client address already resolved by a trusted component in front of the
/// middleware, stored in the request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteIp(pub IpAddr);

/// An address range such as `192.168.0.0/24` or a single address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    /// Parse `addr/prefix` or a bare address; `None` if malformed
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix.parse::<u8>().ok()?)),
            None => (s, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = prefix.unwrap_or(max);
        if prefix_len > max {
            return None;
        }

        // IPv4-mapped ranges match the plain IPv4 addresses they map
        if let (IpAddr::V6(_), IpAddr::V4(v4)) = (network, network.to_canonical()) {
            if prefix_len >= 96 {
                return Some(Self {
                    network: IpAddr::V4(v4),
                    prefix_len: prefix_len - 96,
                });
            }
        }

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.network, ip.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_u32(self.prefix_len);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_u128(self.prefix_len);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_u32(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

fn prefix_mask_u128(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix_len))
    }
}

/// True if any candidate address lies in any allow-listed range
pub fn is_allowed(candidates: &[IpAddr], allow_list: &[String]) -> bool {
    if candidates.is_empty() || allow_list.is_empty() {
        return false;
    }

    let ranges: Vec<Cidr> = allow_list.iter().filter_map(|s| Cidr::parse(s)).collect();
    candidates
        .iter()
        .any(|ip| ranges.iter().any(|range| range.contains(ip)))
}

/// Addresses a request may be coming from, most direct first.
///
/// The connection peer always comes first. With `trust_remote_ip`, a
/// pre-resolved [`RemoteIp`] and every parseable `X-Forwarded-For` entry
/// follow in that order.
pub fn resolve_client_ips<B>(req: &Request<B>, trust_remote_ip: bool) -> Vec<IpAddr> {
    let mut ips = Vec::new();

    if let Some(ClientAddr(addr)) = req.extensions().get::<ClientAddr>() {
        ips.push(addr.ip());
    }

    if !trust_remote_ip {
        return ips;
    }

    if let Some(RemoteIp(ip)) = req.extensions().get::<RemoteIp>() {
        ips.push(*ip);
    }

    for value in req.headers().get_all(X_FORWARDED_FOR) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        ips.extend(value.split(',').filter_map(parse_forwarded_ip));
    }

    ips
}

/// Parse one X-Forwarded-For entry, tolerating a port or IPv6 brackets
fn parse_forwarded_ip(entry: &str) -> Option<IpAddr> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    if let Ok(ip) = entry.parse::<IpAddr>() {
        return Some(ip);
    }
    entry.parse::<SocketAddr>().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn list(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    fn request_from(peer: &str) -> http::request::Builder {
        let addr: SocketAddr = peer.parse().unwrap();
        Request::builder()
            .uri("/")
            .extension(ClientAddr(addr))
    }

    #[test]
    fn test_cidr_parse() {
        assert!(Cidr::parse("192.168.0.0/24").is_some());
        assert!(Cidr::parse("10.0.0.1").is_some());
        assert!(Cidr::parse("2001:db8::/32").is_some());
        assert!(Cidr::parse("0.0.0.0/0").is_some());

        assert!(Cidr::parse("192.168.0.0/33").is_none());
        assert!(Cidr::parse("300.1.1.1/8").is_none());
        assert!(Cidr::parse("not-an-ip").is_none());
        assert!(Cidr::parse("10.0.0.0/abc").is_none());
        assert!(Cidr::parse("").is_none());
    }

    #[test]
    fn test_cidr_contains() {
        let range = Cidr::parse("192.168.0.0/24").unwrap();
        assert!(range.contains(&ip("192.168.0.20")));
        assert!(range.contains(&ip("192.168.0.255")));
        assert!(!range.contains(&ip("192.168.1.1")));
        assert!(!range.contains(&ip("::1")));

        let single = Cidr::parse("203.0.113.5").unwrap();
        assert!(single.contains(&ip("203.0.113.5")));
        assert!(!single.contains(&ip("203.0.113.6")));

        let everything = Cidr::parse("0.0.0.0/0").unwrap();
        assert!(everything.contains(&ip("8.8.8.8")));

        let v6 = Cidr::parse("2001:db8::/32").unwrap();
        assert!(v6.contains(&ip("2001:db8:1::1")));
        assert!(!v6.contains(&ip("2001:db9::1")));
    }

    #[test]
    fn test_ipv4_mapped_candidate_matches_v4_range() {
        let range = Cidr::parse("192.168.0.0/24").unwrap();
        assert!(range.contains(&ip("::ffff:192.168.0.20")));
    }

    #[test]
    fn test_ipv4_mapped_range_matches_v4_candidate() {
        let range = Cidr::parse("::ffff:192.168.0.0/120").unwrap();
        assert!(range.contains(&ip("192.168.0.20")));
        assert!(range.contains(&ip("::ffff:192.168.0.20")));
        assert!(!range.contains(&ip("192.168.1.1")));

        let single = Cidr::parse("::ffff:203.0.113.5").unwrap();
        assert!(single.contains(&ip("203.0.113.5")));

        assert!(is_allowed(&[ip("192.168.0.7")], &list(&["::ffff:192.168.0.0/120"])));
    }

    #[test]
    fn test_is_allowed() {
        let allow = list(&["192.168.0.0/24"]);
        assert!(is_allowed(&[ip("192.168.0.20")], &allow));
        assert!(!is_allowed(&[ip("192.168.1.1")], &allow));

        // Any candidate matching is enough
        assert!(is_allowed(&[ip("203.0.113.5"), ip("192.168.0.7")], &allow));
    }

    #[test]
    fn test_is_allowed_empty_inputs() {
        assert!(!is_allowed(&[], &list(&["0.0.0.0/0"])));
        assert!(!is_allowed(&[ip("10.0.0.1")], &[]));
    }

    #[test]
    fn test_malformed_entries_never_match() {
        let allow = list(&["garbage", "10.0.0.0/99", "192.168.0.0/24"]);
        assert!(is_allowed(&[ip("192.168.0.1")], &allow));
        assert!(!is_allowed(&[ip("10.0.0.1")], &allow));
    }

    #[test]
    fn test_resolve_peer_only_by_default() {
        let req = request_from("203.0.113.5:5555")
            .header(X_FORWARDED_FOR, "192.168.0.20")
            .extension(RemoteIp(ip("10.0.0.1")))
            .body(())
            .unwrap();

        assert_eq!(resolve_client_ips(&req, false), vec![ip("203.0.113.5")]);
    }

    #[test]
    fn test_resolve_with_trusted_proxies() {
        let req = request_from("10.0.0.2:5555")
            .header(X_FORWARDED_FOR, "203.0.113.5, [2001:db8::1]:443, bogus")
            .extension(RemoteIp(ip("198.51.100.7")))
            .body(())
            .unwrap();

        assert_eq!(
            resolve_client_ips(&req, true),
            vec![
                ip("10.0.0.2"),
                ip("198.51.100.7"),
                ip("203.0.113.5"),
                ip("2001:db8::1"),
            ]
        );
    }

    #[test]
    fn test_resolve_without_peer() {
        let req = Request::builder()
            .uri("/")
            .header(X_FORWARDED_FOR, "203.0.113.5")
            .body(())
            .unwrap();

        assert!(resolve_client_ips(&req, false).is_empty());
        assert_eq!(resolve_client_ips(&req, true), vec![ip("203.0.113.5")]);
    }
}
