//! Host addressing
//!
//! A host is addressed by a token derived from its project directory, so that
//! the supervisor and the host agree on the endpoint without exchanging
//! anything but the path:
//!
//! ```text
//! C:\work\game\      ──normalize──►  C:/work/game
//!                     ──base64url──►  QzovV29yay9nYW1l
//!                     ──endpoint───►  http://127.0.0.1:13711/QzovV29yay9nYW1l/
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use thiserror::Error;

/// Port the host listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 13711;

/// Errors decoding a host token
#[derive(Debug, Error)]
pub enum AddressError {
    #[error("token is not valid base64url: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("token does not decode to UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Normalize a project path: forward slashes, no trailing slash.
///
/// The filesystem root stays `/` rather than collapsing to an empty string.
pub fn normalize_path(path: &Path) -> String {
    let forward = path.to_string_lossy().replace('\\', "/");
    let trimmed = forward.trim_end_matches('/');
    if trimmed.is_empty() && forward.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Encode a normalized path into a URL-safe token
pub fn encode_token(normalized: &str) -> String {
    URL_SAFE_NO_PAD.encode(normalized.as_bytes())
}

/// Recover the normalized path from a token
pub fn decode_token(token: &str) -> Result<String, AddressError> {
    let bytes = URL_SAFE_NO_PAD.decode(token.as_bytes())?;
    Ok(String::from_utf8(bytes)?)
}

/// Where one project's host can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    ip: IpAddr,
    port: u16,
    project: String,
    token: String,
}

impl HostAddress {
    /// Address of the host serving `project_dir` on the loopback interface
    pub fn for_project(project_dir: &Path, port: u16) -> Self {
        let project = normalize_path(project_dir);
        let token = encode_token(&project);
        Self {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            project,
            token,
        }
    }

    /// Same project, different port (used once a listener bound port 0)
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = ip;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Normalized project path this address was derived from
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Path component of the endpoint, e.g. `/QzovV29yay9nYW1l/`
    pub fn endpoint_path(&self) -> String {
        format!("/{}/", self.token)
    }

    /// Full endpoint URL used by the supervisor
    pub fn url(&self) -> String {
        format!("http://{}{}", self.socket_addr(), self.endpoint_path())
    }

    /// Whether an inbound request path targets this host.
    ///
    /// Accepts the token with or without its trailing slash.
    pub fn matches_request_path(&self, request_path: &str) -> bool {
        let inner = request_path.trim_start_matches('/').trim_end_matches('/');
        inner == self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/work/game/")), "/work/game");
        assert_eq!(normalize_path(Path::new("/work/game")), "/work/game");
        assert_eq!(normalize_path(Path::new("C:\\work\\game\\")), "C:/work/game");
        assert_eq!(normalize_path(Path::new("/")), "/");
    }

    #[test]
    fn test_token_is_url_safe_and_reversible() {
        let path = "/srv/a?b>c/project";
        let token = encode_token(path);
        assert!(!token.contains('/'));
        assert!(!token.contains('+'));
        assert!(!token.contains('='));
        assert_eq!(decode_token(&token).unwrap(), path);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_token("not base64!").is_err());
    }

    #[test]
    fn test_same_logical_path_same_address() {
        let a = HostAddress::for_project(&PathBuf::from("/work/game/"), DEFAULT_PORT);
        let b = HostAddress::for_project(&PathBuf::from("/work/game"), DEFAULT_PORT);
        assert_eq!(a, b);
        assert_eq!(a.url(), format!("http://127.0.0.1:13711/{}/", a.token()));
    }

    #[test]
    fn test_matches_request_path() {
        let address = HostAddress::for_project(Path::new("/work/game"), DEFAULT_PORT);
        let token = address.token().to_string();
        assert!(address.matches_request_path(&format!("/{token}/")));
        assert!(address.matches_request_path(&format!("/{token}")));
        assert!(!address.matches_request_path("/"));
        assert!(!address.matches_request_path(&format!("/{token}/extra")));

        let other = HostAddress::for_project(Path::new("/work/other"), DEFAULT_PORT);
        assert!(!other.matches_request_path(&format!("/{token}/")));
    }

    #[test]
    fn test_with_port() {
        let address = HostAddress::for_project(Path::new("/p"), DEFAULT_PORT).with_port(4000);
        assert_eq!(address.port(), 4000);
        assert!(address.url().starts_with("http://127.0.0.1:4000/"));
    }
}
