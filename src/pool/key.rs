use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

/// A resolved socket address together with the host name it was resolved from.
///
/// Two `HostAddr`s point at the same peer when their socket addresses match;
/// the host name only matters for secure connections, where the negotiated
/// server name is part of the connection's identity.
#[derive(Debug, Clone)]
pub struct HostAddr {
    host: String,
    addr: SocketAddr,
}

impl HostAddr {
    pub fn new(host: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            host: host.into(),
            addr,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Literal addresses use the textual IP as their host name.
impl From<SocketAddr> for HostAddr {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            addr,
        }
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.addr)
    }
}

/// Identity of a pooled connection slot.
///
/// Entries are keyed by destination and/or proxy:
/// - plain, direct: destination only
/// - plain, via proxy: proxy only
/// - secure, direct: destination address + host name
/// - secure, tunnelled: destination address + host name + proxy
#[derive(Debug, Clone)]
pub struct CacheKey {
    proxy: Option<SocketAddr>,
    destination: Option<HostAddr>,
    secure: bool,
}

impl CacheKey {
    pub fn new(secure: bool, destination: Option<HostAddr>, proxy: Option<SocketAddr>) -> Self {
        Self {
            proxy,
            destination,
            secure,
        }
    }

    pub fn proxy(&self) -> Option<SocketAddr> {
        self.proxy
    }

    pub fn destination(&self) -> Option<&HostAddr> {
        self.destination.as_ref()
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        if self.secure != other.secure || self.proxy != other.proxy {
            return false;
        }
        match (&self.destination, &other.destination) {
            (None, None) => true,
            (Some(mine), Some(theirs)) => {
                // ASCII-only folding: non-ASCII names arrive punycode-encoded.
                mine.addr == theirs.addr
                    && (!self.secure || mine.host.eq_ignore_ascii_case(&theirs.host))
            }
            _ => false,
        }
    }
}

impl Eq for CacheKey {}

// Coarser than `eq` on purpose: host name and the secure flag are left out.
impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.proxy.hash(state);
        self.destination.as_ref().map(|d| d.addr).hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "secure" } else { "plain" };
        match (&self.destination, self.proxy) {
            (Some(dest), Some(proxy)) => write!(f, "{scheme}:{dest} via {proxy}"),
            (Some(dest), None) => write!(f, "{scheme}:{dest}"),
            (None, Some(proxy)) => write!(f, "{scheme}:* via {proxy}"),
            (None, None) => write!(f, "{scheme}:*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(key: &CacheKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn secure_flag_must_match() {
        let dest = HostAddr::new("example.com", addr("93.184.216.34:443"));
        let plain = CacheKey::new(false, Some(dest.clone()), None);
        let secure = CacheKey::new(true, Some(dest), None);
        assert_ne!(plain, secure);
    }

    #[test]
    fn proxy_must_match() {
        let a = CacheKey::new(false, None, Some(addr("10.0.0.1:3128")));
        let b = CacheKey::new(false, None, Some(addr("10.0.0.2:3128")));
        let c = CacheKey::new(false, None, Some(addr("10.0.0.1:3128")));
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_ne!(a, CacheKey::new(false, None, None));
    }

    #[test]
    fn secure_keys_compare_host_names_case_insensitively() {
        let ip = addr("93.184.216.34:443");
        let lower = CacheKey::new(true, Some(HostAddr::new("example.com", ip)), None);
        let upper = CacheKey::new(true, Some(HostAddr::new("EXAMPLE.com", ip)), None);
        let other = CacheKey::new(true, Some(HostAddr::new("example.org", ip)), None);

        assert_eq!(lower, upper);
        assert_eq!(hash_of(&lower), hash_of(&upper));
        assert_ne!(lower, other);
    }

    #[test]
    fn plain_keys_ignore_host_names() {
        let ip = addr("93.184.216.34:80");
        let a = CacheKey::new(false, Some(HostAddr::new("example.com", ip)), None);
        let b = CacheKey::new(false, Some(HostAddr::new("www.example.org", ip)), None);
        assert_eq!(a, b);

        let elsewhere = CacheKey::new(
            false,
            Some(HostAddr::new("example.com", addr("93.184.216.35:80"))),
            None,
        );
        assert_ne!(a, elsewhere);
    }

    #[test]
    fn equal_keys_hash_equally_across_security() {
        let dest = HostAddr::new("example.com", addr("93.184.216.34:443"));
        let plain = CacheKey::new(false, Some(dest.clone()), None);
        let secure = CacheKey::new(true, Some(dest), None);
        // Hash ignores the flag, equality does not.
        assert_eq!(hash_of(&plain), hash_of(&secure));
    }

    #[test]
    fn literal_address_uses_ip_as_host() {
        let host = HostAddr::from(addr("127.0.0.1:8080"));
        assert_eq!(host.host(), "127.0.0.1");
        assert_eq!(host.to_string(), "127.0.0.1/127.0.0.1:8080");
    }
}
