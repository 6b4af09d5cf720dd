//! Request origin computation
//!
//! Discovery documents and auth challenges advertise the gateway under the
//! identity the caller used to reach it, reconstructed per request from
//! forwarding headers. Behind a TLS-terminating proxy the forwarded proto
//! wins; bare hosts default to https unless they are loopback.

use axum::http::HeaderMap;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn is_loopback(host: &str) -> bool {
    let bare = host.rsplit_once(':').map_or(host, |(h, _)| h);
    bare == "localhost" || bare == "127.0.0.1" || bare == "[::1]" || bare == "::1"
}

/// The scheme://host origin the caller addressed, without a trailing slash.
pub fn request_origin(headers: &HeaderMap) -> String {
    let host = header_str(headers, "x-forwarded-host")
        .or_else(|| header_str(headers, "host"))
        .unwrap_or("localhost");

    // Proxies may send a comma-separated chain; the first entry is the
    // client-facing one.
    let scheme = header_str(headers, "x-forwarded-proto")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            if is_loopback(host) {
                "http".to_string()
            } else {
                "https".to_string()
            }
        });

    format!("{}://{}", scheme, host)
}
