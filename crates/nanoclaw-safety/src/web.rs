use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use nanoclaw_types::WebFetchMode;

/// Cause string surfaced to the user when a fetch target is denied.
pub const WEB_FETCH_BLOCKED_CAUSE: &str = "URL blocked by web fetch safety policy";

/// Hostnames that always resolve to infrastructure we must not touch.
const DENIED_HOSTS: &[&str] = &["localhost", "metadata.google.internal"];
const DENIED_SUFFIXES: &[&str] = &[".local", ".internal"];

/// Returns `Some(denial_message)` when the target must not be fetched:
/// non-http scheme, loopback/private/link-local addressing, cloud metadata
/// endpoints, or browser mode without approval.
pub fn web_fetch_policy_violation(
    url: &str,
    mode: WebFetchMode,
    requires_approval: bool,
) -> Option<String> {
    if mode == WebFetchMode::Browser && !requires_approval {
        return Some("browser mode fetches require approval".to_string());
    }

    let Ok(parsed) = Url::parse(url) else {
        return Some(WEB_FETCH_BLOCKED_CAUSE.to_string());
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return Some(WEB_FETCH_BLOCKED_CAUSE.to_string());
    }

    match parsed.host() {
        Some(Host::Domain(domain)) => {
            let lowered = domain.to_ascii_lowercase();
            if DENIED_HOSTS.contains(&lowered.as_str())
                || DENIED_SUFFIXES.iter().any(|s| lowered.ends_with(s))
            {
                return Some(WEB_FETCH_BLOCKED_CAUSE.to_string());
            }
            // A numeric host can hide behind Host::Domain when it fails to
            // parse strictly; re-check.
            if let Ok(addr) = lowered.parse::<Ipv4Addr>() {
                if is_private_ipv4(addr) {
                    return Some(WEB_FETCH_BLOCKED_CAUSE.to_string());
                }
            }
            None
        }
        Some(Host::Ipv4(addr)) => {
            if is_private_ipv4(addr) {
                Some(WEB_FETCH_BLOCKED_CAUSE.to_string())
            } else {
                None
            }
        }
        Some(Host::Ipv6(addr)) => {
            if is_private_ipv6(addr) {
                Some(WEB_FETCH_BLOCKED_CAUSE.to_string())
            } else {
                None
            }
        }
        None => Some(WEB_FETCH_BLOCKED_CAUSE.to_string()),
    }
}

/// 10/8, 127/8, 0/8, 169.254/16, 172.16/12, 192.168/16.
fn is_private_ipv4(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    matches!(octets[0], 0 | 10 | 127)
        || (octets[0] == 169 && octets[1] == 254)
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
}

/// Loopback, link-local (fe80::/10) and unique-local (fc00::/7) space.
fn is_private_ipv6(addr: Ipv6Addr) -> bool {
    if addr.is_loopback() || addr.is_unspecified() {
        return true;
    }
    let segments = addr.segments();
    (segments[0] & 0xffc0) == 0xfe80 || (segments[0] & 0xfe00) == 0xfc00
}
