// Proxy URI parsing

use std::fmt;
use tracing::warn;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Http,
    Socks,
}

/// Proxy settings parsed from a job's proxy URI.
///
/// Accepted forms are `http://[user[:password]@]host[:port]` (port defaults to
/// 80, or 443 for `https://`) and `socks://[user[:password]@]host:port`. Any
/// other value means "no proxy".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let parsed = Self::parse_url(raw);
        if parsed.is_none() {
            warn!("Incorrect proxy params: {}. Proxy disabled.", raw);
        }
        parsed
    }

    fn parse_url(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        let host = url.host_str().filter(|h| !h.is_empty())?.to_string();

        let (kind, port) = match url.scheme() {
            "http" | "https" => (ProxyKind::Http, url.port_or_known_default()?),
            "socks" | "socks5" => (ProxyKind::Socks, url.port().filter(|p| *p > 0)?),
            _ => return None,
        };

        let username = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let password = url
            .password()
            .filter(|p| !p.is_empty() && username.is_some())
            .map(str::to_string);

        Some(Self {
            kind,
            host,
            port,
            username,
            password,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some()
    }

    /// Proxy URL in the form understood by the HTTP client.
    pub fn proxy_url(&self) -> String {
        let scheme = match self.kind {
            ProxyKind::Http => "http",
            ProxyKind::Socks => "socks5",
        };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ProxyKind::Http => write!(f, "http://")?,
            ProxyKind::Socks => write!(f, "socks://")?,
        }
        if self.has_credentials() {
            write!(f, "xxxxxx@")?;
        }
        write!(f, "{}:{}", self.host, self.port)
    }
}
