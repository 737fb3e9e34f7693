//! Parsing of `ferry://host:port` server addresses

use crate::protocol::DEFAULT_PORT;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub host: String,
    pub port: u16,
}

impl Remote {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, ready for `TcpStream::connect`
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ferry://{}", self.addr())
    }
}

/// Accepts `ferry://host[:port]`, `host:port` or a bare host. The port
/// defaults to the ferry port. Returns `None` for anything else.
pub fn parse_remote(s: &str) -> Option<Remote> {
    let s = s.trim();
    let rest = match s.find("://") {
        Some(i) if s[..i].eq_ignore_ascii_case("ferry") => &s[i + 3..],
        Some(_) => return None,
        None => s,
    };
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() || rest.contains('/') {
        return None;
    }

    // [v6]:port
    if let Some(inner) = rest.strip_prefix('[') {
        let (host, tail) = inner.split_once(']')?;
        let port = match tail {
            "" => DEFAULT_PORT,
            t => t.strip_prefix(':')?.parse().ok()?,
        };
        return (!host.is_empty()).then(|| Remote::new(host, port));
    }

    match rest.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() || host.contains(':') {
                return None;
            }
            Some(Remote::new(host, port.parse().ok()?))
        }
        None => Some(Remote::new(rest, DEFAULT_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_and_port() {
        assert_eq!(
            parse_remote("ferry://files.lan:5000"),
            Some(Remote::new("files.lan", 5000))
        );
        assert_eq!(
            parse_remote("FERRY://files.lan/"),
            Some(Remote::new("files.lan", DEFAULT_PORT))
        );
    }

    #[test]
    fn test_plain_host_port() {
        assert_eq!(parse_remote("127.0.0.1:4121"), Some(Remote::new("127.0.0.1", 4121)));
        assert_eq!(parse_remote("localhost"), Some(Remote::new("localhost", DEFAULT_PORT)));
        assert_eq!(parse_remote("[::1]:9"), Some(Remote::new("::1", 9)));
        assert_eq!(Remote::new("::1", 9).addr(), "[::1]:9");
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(parse_remote(""), None);
        assert_eq!(parse_remote("http://host:1"), None);
        assert_eq!(parse_remote("host:notaport"), None);
        assert_eq!(parse_remote("ferry://host:1/path"), None);
        assert_eq!(parse_remote(":80"), None);
    }
}
