//! Client address derivation.
//!
//! Without trusted proxies the peer address of the connection is the client.
//! With trusted proxies configured, the `X-Forwarded-For` chain plus the peer
//! address is walked right to left and the first hop that is not a trusted
//! proxy is the client:
//!
//! ```text
//! X-Forwarded-For: 1.1.1.1, 3.3.3.3      peer: 10.0.0.2 (trusted)
//!                           ^^^^^^^ client
//! ```
//!
//! Spoofed entries a client prepends land left of the first untrusted hop
//! and are never reached.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use thiserror::Error;
use tracing::{debug, warn};

/// Key used when the peer address is not known.
pub const UNKNOWN_IP: &str = "unknown";

/// Longest `X-Forwarded-For` chain (peer included) that is considered.
pub const MAX_CHAIN_LEN: usize = 50;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealIpError {
    #[error("too many addresses in the forwarded chain")]
    TooManyAddresses,

    #[error("no valid IP addresses found")]
    NoValidAddresses,
}

/// A CIDR network, e.g. `10.0.0.0/8`. A bare address is a single host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max)?,
            None => max,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix_len)).unwrap_or(0);
                u32::from(net) & mask == u32::from(*addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                u128::from(net) & mask == u128::from(*addr) & mask
            }
            _ => false,
        }
    }
}

/// The set of reverse proxies whose `X-Forwarded-For` entries are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Parse CIDR strings; invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges configured");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

/// Derive the client address of `req`.
///
/// The peer address comes from the `ConnectInfo<SocketAddr>` extension set
/// by `into_make_service_with_connect_info`.
///
/// # Errors
///
/// [`RealIpError::TooManyAddresses`] for a chain longer than
/// [`MAX_CHAIN_LEN`]; [`RealIpError::NoValidAddresses`] when no entry parses
/// as an address.
pub fn client_ip<B>(
    req: &Request<B>,
    trusted: &TrustedProxyConfig,
) -> Result<Cow<'static, str>, RealIpError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let forwarded: Vec<&str> = req
        .headers()
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    if !trusted.is_enabled() || forwarded.is_empty() {
        return Ok(match peer {
            Some(ip) => Cow::Owned(ip.to_string()),
            None => Cow::Borrowed(UNKNOWN_IP),
        });
    }

    let peer = peer.map(|ip| ip.to_string()).unwrap_or_default();
    let chain: Vec<&str> = forwarded
        .iter()
        .flat_map(|v| v.split(','))
        .chain(std::iter::once(peer.as_str()))
        .collect();

    resolve_chain(&chain, trusted).map(|ip| Cow::Owned(ip.to_string()))
}

/// Walk `chain` right to left and return the first untrusted hop, or the
/// leftmost valid hop when every hop is trusted.
fn resolve_chain(chain: &[&str], trusted: &TrustedProxyConfig) -> Result<IpAddr, RealIpError> {
    if chain.len() > MAX_CHAIN_LEN {
        return Err(RealIpError::TooManyAddresses);
    }

    let mut leftmost_valid = None;
    for entry in chain.iter().rev() {
        let Some(ip) = parse_hop(entry) else {
            continue;
        };
        if !trusted.is_trusted(&ip) {
            return Ok(ip);
        }
        leftmost_valid = Some(ip);
    }

    leftmost_valid.ok_or(RealIpError::NoValidAddresses)
}

/// Parse one chain entry, tolerating `[v6]` brackets and ports.
fn parse_hop(entry: &str) -> Option<IpAddr> {
    let entry = entry.trim();
    let entry = entry
        .strip_prefix('[')
        .and_then(|e| e.strip_suffix(']'))
        .unwrap_or(entry);

    entry
        .parse::<SocketAddr>()
        .map(|addr| addr.ip())
        .or_else(|_| entry.parse::<IpAddr>())
        .ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    const CHAIN: [&str; 3] = ["1.1.1.1, 2.2.2.2", "3.3.3.3", "4.4.4.4, 5.5.5.5, 6.6.6.6"];

    fn request(peer: Option<&str>, forwarded: &[&str]) -> Request<Body> {
        let mut builder = Request::builder();
        for value in forwarded {
            builder = builder.header("x-forwarded-for", *value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            req.extensions_mut().insert(ConnectInfo(addr));
        }
        req
    }

    fn proxies(list: &[&str]) -> TrustedProxyConfig {
        TrustedProxyConfig::new(&list.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_peer_without_forwarded_header() {
        let req = request(Some("1.2.3.4:5000"), &[]);
        assert_eq!(client_ip(&req, &proxies(&["10.0.0.0/8"])).unwrap(), "1.2.3.4");
    }

    #[test]
    fn test_forwarded_ignored_without_trusted_proxies() {
        let req = request(Some("1.2.3.4:5000"), &CHAIN);
        assert_eq!(client_ip(&req, &proxies(&[])).unwrap(), "1.2.3.4");
    }

    #[test]
    fn test_untrusted_peer_is_client() {
        let req = request(Some("1.2.3.4:5000"), &CHAIN);
        let trusted = proxies(&["6.6.6.6", "2.2.2.2", "4.4.4.4", "5.5.5.5"]);
        assert_eq!(client_ip(&req, &trusted).unwrap(), "1.2.3.4");
    }

    #[test]
    fn test_first_untrusted_hop_from_the_right() {
        let req = request(Some("1.2.3.4:5000"), &CHAIN);
        let trusted = proxies(&["6.6.6.6", "2.2.2.2", "4.4.4.4", "5.5.5.5", "1.2.3.4"]);
        assert_eq!(client_ip(&req, &trusted).unwrap(), "3.3.3.3");
    }

    #[test]
    fn test_all_trusted_returns_leftmost() {
        let req = request(Some("1.2.3.4:5000"), &CHAIN);
        let trusted = proxies(&["1.0.0.0/8", "2.0.0.0/8", "3.0.0.0/8", "4.0.0.0/6"]);
        assert_eq!(client_ip(&req, &trusted).unwrap(), "1.1.1.1");
    }

    #[test]
    fn test_brackets_ports_and_garbage() {
        let trusted = proxies(&["10.0.0.1"]);
        assert_eq!(
            resolve_chain(&["nonsense", "[2001:db8::1]", "10.0.0.1"], &trusted).unwrap(),
            "2001:db8::1".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            resolve_chain(&["[2001:db8::2]:443", "10.0.0.1:80"], &trusted).unwrap(),
            "2001:db8::2".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            resolve_chain(&["junk", "10.0.0.1"], &trusted).unwrap(),
            "10.0.0.1".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            resolve_chain(&["junk", ""], &trusted),
            Err(RealIpError::NoValidAddresses)
        );
    }

    #[test]
    fn test_too_many_addresses() {
        let long = vec!["1.1.1.1"; MAX_CHAIN_LEN + 1];
        assert_eq!(
            resolve_chain(&long, &proxies(&["1.1.1.1"])),
            Err(RealIpError::TooManyAddresses)
        );
    }

    #[test]
    fn test_unknown_without_peer() {
        let req = request(None, &[]);
        let ip = client_ip(&req, &TrustedProxyConfig::default()).unwrap();
        assert!(matches!(ip, Cow::Borrowed(UNKNOWN_IP)));
    }

    #[test]
    fn test_cidr_parse_and_contains() {
        let v4 = CidrRange::parse("10.0.0.0/8").unwrap();
        assert!(v4.contains(&"10.255.0.1".parse().unwrap()));
        assert!(!v4.contains(&"11.0.0.1".parse().unwrap()));

        let host = CidrRange::parse("192.168.1.1").unwrap();
        assert!(host.contains(&"192.168.1.1".parse().unwrap()));
        assert!(!host.contains(&"192.168.1.2".parse().unwrap()));

        let all = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(all.contains(&"8.8.8.8".parse().unwrap()));
        assert!(!all.contains(&"::1".parse().unwrap()));

        assert!(CidrRange::parse("::1/128").unwrap().contains(&"::1".parse().unwrap()));
        assert!(CidrRange::parse("not-an-ip").is_none());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
    }
}
