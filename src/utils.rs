use axum::http::HeaderMap;
use std::net::IpAddr;

/// Resolve the originating client address.
///
/// Order: first entry of `X-Forwarded-For`, then `X-Real-IP`, then the
/// socket peer address, else `"unknown"`. The gateway is expected to sit
/// behind a proxy that overwrites these headers.
pub fn extract_client_ip(headers: &HeaderMap, direct_ip: Option<IpAddr>) -> String {
    // 1. Check X-Forwarded-For (first IP in chain)
    if let Some(forwarded_for) = headers.get("x-forwarded-for")
        && let Ok(forwarded_str) = forwarded_for.to_str()
    {
        // "client, proxy1, proxy2"
        let first_ip = forwarded_str.split(',').next().unwrap_or("").trim();
        if let Ok(ip) = strip_brackets(first_ip).parse::<IpAddr>() {
            return normalize_ip(ip);
        }
    }

    // 2. Check X-Real-IP (single IP, often set by nginx)
    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(real_ip_str) = real_ip.to_str()
        && let Ok(ip) = strip_brackets(real_ip_str.trim()).parse::<IpAddr>()
    {
        return normalize_ip(ip);
    }

    // 3. Fallback to direct connection IP
    if let Some(ip) = direct_ip {
        return normalize_ip(ip);
    }

    "unknown".to_string()
}

fn strip_brackets(s: &str) -> &str {
    s.trim_start_matches('[').trim_end_matches(']')
}

/// IPv4-mapped IPv6 addresses collapse to their IPv4 form
fn normalize_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        IpAddr::V4(v4) => v4.to_string(),
    }
}

/// Join a base URL and a path without doubling or dropping the slash
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_takes_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(extract_client_ip(&headers, None), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        headers.insert("x-real-ip", HeaderValue::from_static("[2001:db8::1]"));
        assert_eq!(extract_client_ip(&headers, None), "2001:db8::1");
    }

    #[test]
    fn test_peer_and_unknown_fallback() {
        let headers = HeaderMap::new();
        let peer: IpAddr = "::ffff:192.0.2.5".parse().unwrap();
        assert_eq!(extract_client_ip(&headers, Some(peer)), "192.0.2.5");
        assert_eq!(extract_client_ip(&headers, None), "unknown");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://a:1/", "/x"), "http://a:1/x");
        assert_eq!(join_url("http://a:1", "x"), "http://a:1/x");
        assert_eq!(join_url("http://a:1/", ""), "http://a:1");
    }
}
