//! Secure-transport configuration.
//!
//! The handshake itself is BoringSSL's business; this module only builds a
//! connector from a [`TlsConfig`] and wraps an established TCP stream.

use crate::base::neterror::NetError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

/// Client-side TLS settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub min_version: TlsVersion,
    pub max_version: TlsVersion,
    /// OpenSSL cipher string; `None` keeps BoringSSL's defaults.
    pub cipher_list: Option<String>,
    pub curves: Vec<String>,
    /// Only HTTP/1.1 is spoken, so this should not advertise `h2`.
    pub alpn_protos: Vec<String>,
    /// Disable only for tests against self-signed peers.
    pub verify_peer: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            cipher_list: None,
            curves: vec!["X25519".to_string(), "P-256".to_string(), "P-384".to_string()],
            alpn_protos: vec!["http/1.1".to_string()],
            verify_peer: true,
        }
    }
}

impl TlsConfig {
    /// ALPN protocol list in wire format (length-prefixed).
    pub fn alpn_wire(&self) -> Result<Vec<u8>, NetError> {
        let mut wire = Vec::new();
        for proto in &self.alpn_protos {
            if proto.is_empty() || proto.len() > 255 {
                return Err(NetError::SslProtocolError);
            }
            wire.push(proto.len() as u8);
            wire.extend_from_slice(proto.as_bytes());
        }
        Ok(wire)
    }

    /// Check if SNI should be set for this host.
    /// Per RFC 6066, SNI MUST NOT be set for raw IP addresses.
    pub fn should_set_sni(host: &str) -> bool {
        host.parse::<std::net::IpAddr>().is_err()
    }

    #[cfg(feature = "boring-tls")]
    fn apply_to_builder(
        &self,
        builder: &mut boring::ssl::SslConnectorBuilder,
    ) -> Result<(), NetError> {
        use boring::ssl::{SslVerifyMode, SslVersion};

        let version = |v: TlsVersion| match v {
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        };
        builder
            .set_min_proto_version(Some(version(self.min_version)))
            .map_err(|_| NetError::SslProtocolError)?;
        builder
            .set_max_proto_version(Some(version(self.max_version)))
            .map_err(|_| NetError::SslProtocolError)?;

        if let Some(ciphers) = &self.cipher_list {
            builder
                .set_cipher_list(ciphers)
                .map_err(|_| NetError::SslProtocolError)?;
        }

        if !self.curves.is_empty() {
            builder
                .set_curves_list(&self.curves.join(":"))
                .map_err(|_| NetError::SslProtocolError)?;
        }

        if !self.alpn_protos.is_empty() {
            builder
                .set_alpn_protos(&self.alpn_wire()?)
                .map_err(|_| NetError::SslProtocolError)?;
        }

        builder.set_verify(if self.verify_peer {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });
        Ok(())
    }
}

/// Wraps TCP streams in TLS. Cheap to clone.
#[cfg(feature = "boring-tls")]
#[derive(Clone)]
pub struct TlsConnector {
    connector: boring::ssl::SslConnector,
    verify_peer: bool,
}

#[cfg(feature = "boring-tls")]
impl TlsConnector {
    pub fn new(config: &TlsConfig) -> Result<Self, NetError> {
        use boring::ssl::{SslConnector, SslMethod};

        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|_| NetError::SslProtocolError)?;
        config.apply_to_builder(&mut builder)?;
        Ok(Self {
            connector: builder.build(),
            verify_peer: config.verify_peer,
        })
    }

    pub async fn connect(
        &self,
        host: &str,
        stream: tokio::net::TcpStream,
    ) -> Result<tokio_boring::SslStream<tokio::net::TcpStream>, NetError> {
        let mut config = self
            .connector
            .configure()
            .map_err(|_| NetError::SslProtocolError)?;
        if !TlsConfig::should_set_sni(host) {
            config.set_use_server_name_indication(false);
        }
        if !self.verify_peer {
            config.set_verify_hostname(false);
        }

        tokio_boring::connect(config, host, stream)
            .await
            .map_err(|e| {
                tracing::debug!(host = %host, error = %e, "TLS handshake failed");
                NetError::SslHandshakeFailed {
                    host: host.to_string(),
                    reason: e.to_string(),
                }
            })
    }
}

#[cfg(feature = "boring-tls")]
impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("verify_peer", &self.verify_peer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpn_wire_format() {
        let config = TlsConfig::default();
        assert_eq!(config.alpn_wire().unwrap(), b"\x08http/1.1");
    }

    #[test]
    fn test_alpn_rejects_empty_protocol() {
        let config = TlsConfig {
            alpn_protos: vec![String::new()],
            ..Default::default()
        };
        assert_eq!(config.alpn_wire().unwrap_err(), NetError::SslProtocolError);
    }

    #[test]
    fn test_sni_skipped_for_ip() {
        assert!(TlsConfig::should_set_sni("example.com"));
        assert!(!TlsConfig::should_set_sni("127.0.0.1"));
        assert!(!TlsConfig::should_set_sni("::1"));
    }

    #[cfg(feature = "boring-tls")]
    #[test]
    fn test_connector_builds_from_default() {
        assert!(TlsConnector::new(&TlsConfig::default()).is_ok());
    }
}
