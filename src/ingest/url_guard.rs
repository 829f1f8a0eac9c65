// src/ingest/url_guard.rs
//! Rejects user-supplied URLs that would make the service fetch internal addresses.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use url::{Host, Url};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UrlGuardError {
    #[error("invalid URL: {0}")]
    Invalid(String),
    #[error("URL scheme '{0}' is not allowed; use http or https")]
    Scheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("host '{0}' is not allowed")]
    BlockedHost(String),
    #[error("address {0} is private or reserved")]
    BlockedAddress(IpAddr),
}

const BLOCKED_HOSTNAMES: &[&str] = &["localhost", "metadata.google.internal", "metadata"];
const BLOCKED_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal", ".localdomain"];

/// Syntactic check. Numeric hosts in any notation (`2130706433`, `0x7f.1`, `0177.0.0.1`)
/// are normalised to dotted IPv4 by the URL parser before the address check runs.
pub fn validate_url(raw: &str) -> Result<Url, UrlGuardError> {
    let url = Url::parse(raw.trim()).map_err(|e| UrlGuardError::Invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlGuardError::Scheme(other.to_string())),
    }
    match url.host() {
        None => return Err(UrlGuardError::MissingHost),
        Some(Host::Domain(d)) => {
            let d = d.trim_end_matches('.').to_ascii_lowercase();
            if BLOCKED_HOSTNAMES.contains(&d.as_str())
                || BLOCKED_SUFFIXES.iter().any(|s| d.ends_with(s))
            {
                return Err(UrlGuardError::BlockedHost(d));
            }
        }
        Some(Host::Ipv4(ip)) => check_ip(IpAddr::V4(ip))?,
        Some(Host::Ipv6(ip)) => check_ip(IpAddr::V6(ip))?,
    }
    Ok(url)
}

/// Syntactic check plus DNS resolution; every resolved address must be public.
pub async fn validate_url_resolved(raw: &str) -> Result<Url, UrlGuardError> {
    let url = validate_url(raw)?;
    if let Some(Host::Domain(d)) = url.host() {
        let port = url.port_or_known_default().unwrap_or(443);
        let addrs = tokio::net::lookup_host((d, port))
            .await
            .map_err(|e| UrlGuardError::Invalid(format!("cannot resolve {d}: {e}")))?;
        for addr in addrs {
            check_ip(addr.ip())?;
        }
    }
    Ok(url)
}

fn check_ip(ip: IpAddr) -> Result<(), UrlGuardError> {
    let blocked = match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    };
    if blocked {
        Err(UrlGuardError::BlockedAddress(ip))
    } else {
        Ok(())
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || a == 0
        // carrier-grade NAT 100.64.0.0/10
        || (a == 100 && (64..=127).contains(&b))
        // benchmarking 198.18.0.0/15
        || (a == 198 && (b == 18 || b == 19))
        || a >= 240
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // unique local fc00::/7
        || (first & 0xfe00) == 0xfc00
        // link local fe80::/10
        || (first & 0xffc0) == 0xfe80
}
