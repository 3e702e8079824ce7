//! Client identification for per-origin quotas.

/// Header carrying the proxy forwarding chain, original client first.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
/// Header carrying a single client address set by a reverse proxy.
pub const REAL_IP_HEADER: &str = "x-real-ip";
/// Key used when the transport cannot report a peer address at all.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Key under which a client's requests are counted.
///
/// Never validated as an address; malformed header values are used verbatim.
pub type ClientKey = String;

/// Read-only view of an inbound request.
///
/// This keeps the limiter independent of any particular HTTP stack.
pub trait RequestInfo {
    /// Look up a header by (case-insensitive) name.
    fn header(&self, name: &str) -> Option<&str>;

    /// The request path, without query string.
    fn path(&self) -> &str;

    /// Raw peer address as reported by the transport, e.g. `10.0.0.1:4312`.
    fn peer_addr(&self) -> Option<String>;
}

/// Compute the client key for a request.
///
/// Priority: first entry of `X-Forwarded-For`, then `X-Real-IP`, then the
/// peer address with its port (and IPv6 brackets) removed. Forwarding headers
/// are trusted as-is.
pub fn identify<R: RequestInfo + ?Sized>(request: &R) -> ClientKey {
    if let Some(chain) = request.header(FORWARDED_FOR_HEADER).filter(|v| !v.is_empty()) {
        let first = chain.split(',').next().unwrap_or(chain);
        return first.trim().to_string();
    }

    if let Some(real_ip) = request.header(REAL_IP_HEADER).filter(|v| !v.is_empty()) {
        return real_ip.trim().to_string();
    }

    match request.peer_addr() {
        Some(addr) => host_of(&addr).to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

/// Strip the port from `host:port` and the brackets from `[v6]` or `[v6]:port`.
///
/// Anything else (bare IPv6 literals, unparseable junk) is returned unchanged.
fn host_of(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, "")) => host,
            Some((host, tail)) if tail.starts_with(':') && !tail[1..].contains(':') => host,
            _ => addr,
        };
    }

    match addr.split_once(':') {
        Some((host, port)) if !port.contains(':') => host,
        _ => addr,
    }
}
