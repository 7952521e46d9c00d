//! Client identifier resolution.

use axum::http::HeaderMap;

/// Proxy header listing the originating client first.
pub const FORWARDED_FOR: &str = "x-forwarded-for";
/// Single-address header set by some reverse proxies.
pub const REAL_IP: &str = "x-real-ip";

/// Identifier used when neither a user nor a network origin is known.
pub const UNKNOWN_CLIENT: &str = "ip:unknown";

/// Derive the rate limit key for a request.
///
/// Authenticated users are keyed by user id so that users sharing an address
/// get separate quotas. Anonymous requests fall back to the first
/// `x-forwarded-for` entry, then `x-real-ip`, then [`UNKNOWN_CLIENT`].
pub fn client_identifier(headers: &HeaderMap, user_id: Option<&str>) -> String {
    if let Some(user_id) = user_id.filter(|id| !id.is_empty()) {
        return format!("user:{user_id}");
    }

    let forwarded = header_str(headers, FORWARDED_FOR)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match forwarded.or_else(|| header_str(headers, REAL_IP)) {
        Some(addr) => format!("ip:{addr}"),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_forwarded_for() {
        let map = headers(&[(FORWARDED_FOR, "192.168.1.1")]);
        assert_eq!(client_identifier(&map, None), "ip:192.168.1.1");
    }

    #[test]
    fn test_forwarded_for_uses_first_hop() {
        let map = headers(&[(FORWARDED_FOR, "203.0.113.7, 10.0.0.2, 10.0.0.3")]);
        assert_eq!(client_identifier(&map, None), "ip:203.0.113.7");
    }

    #[test]
    fn test_user_id_wins_over_headers() {
        let map = headers(&[(FORWARDED_FOR, "192.168.1.1"), (REAL_IP, "10.0.0.1")]);
        assert_eq!(client_identifier(&map, Some("u-123")), "user:u-123");
    }

    #[test]
    fn test_real_ip_fallback() {
        let map = headers(&[(REAL_IP, "10.0.0.1")]);
        assert_eq!(client_identifier(&map, None), "ip:10.0.0.1");
    }

    #[test]
    fn test_forwarded_for_wins_over_real_ip() {
        let map = headers(&[(REAL_IP, "10.0.0.1"), (FORWARDED_FOR, "192.168.1.1")]);
        assert_eq!(client_identifier(&map, None), "ip:192.168.1.1");
    }

    #[test]
    fn test_unknown_client() {
        assert_eq!(client_identifier(&HeaderMap::new(), None), "ip:unknown");
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let map = headers(&[(FORWARDED_FOR, " "), (REAL_IP, "10.0.0.1")]);
        assert_eq!(client_identifier(&map, Some("")), "ip:10.0.0.1");
    }
}
