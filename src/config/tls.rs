#[cfg(not(test))]
use std::fs;
use std::path::Path;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Client-side TLS parameters handed opaquely to the socket factory.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[allow(dead_code)]
pub struct TlsConfig {
    /// Enables TLS encryption towards the peer
    /// Default: false (disabled)
    #[serde(default = "default_enable_tls")]
    pub enable_tls: bool,

    /// Path to Certificate Authority root certificate
    /// Default: "/etc/ssl/certs/ca.pem"
    #[serde(default = "default_ca_path")]
    pub certificate_authority_root_path: String,

    /// Client certificate chain path in PEM format, for mTLS
    /// Default: "" (no client certificate)
    #[serde(default = "default_client_cert_path")]
    pub client_certificate_path: String,

    /// Client private key path in PEM format, for mTLS
    /// Default: "" (no client key)
    #[serde(default = "default_client_key_path")]
    pub client_private_key_path: String,

    /// Overrides the domain name checked against the server certificate
    /// Default: "" (use the connection address)
    #[serde(default = "default_domain_name_override")]
    pub domain_name_override: String,

    /// Enables mutual TLS (mTLS) for bidirectional authentication
    /// Default: false (server-side TLS only)
    #[serde(default = "default_enable_mtls")]
    pub enable_mtls: bool,
}

impl TlsConfig {
    /// Validates TLS configuration consistency and file existence
    /// # Errors
    /// Returns a config error when:
    /// - mTLS is enabled without client certificate paths
    /// - Required certificate files are missing
    /// - Invalid private key file permissions
    pub fn validate(&self) -> Result<()> {
        if !self.enable_tls {
            // Skip validation if TLS is disabled
            return Ok(());
        }

        if self.enable_mtls
            && (self.client_certificate_path.is_empty() || self.client_private_key_path.is_empty())
        {
            return Err(Error::Config(ConfigError::Message(
                "mTLS requires client_certificate_path and client_private_key_path".into(),
            )));
        }

        self.validate_cert_file(&self.certificate_authority_root_path, "CA certificate")?;

        if self.enable_mtls {
            self.validate_cert_file(&self.client_certificate_path, "client certificate")?;
            self.validate_key_file(&self.client_private_key_path, "client private key")?;
        }

        Ok(())
    }

    /// Validates a certificate file existence and readability
    fn validate_cert_file(
        &self,
        path: &str,
        name: &str,
    ) -> Result<()> {
        let path = Path::new(path);

        if path.exists() {
            #[cfg(not(test))]
            {
                // Check file readability
                fs::File::open(path).map_err(|e| {
                    Error::Config(ConfigError::Message(format!(
                        "{} file {} is unreadable: {}",
                        name,
                        path.display(),
                        e
                    )))
                })?;
            }
            Ok(())
        } else {
            Err(Error::Config(ConfigError::Message(format!(
                "{} file {} not found",
                name,
                path.display()
            ))))
        }
    }

    /// Validates a private key file existence and permissions
    fn validate_key_file(
        &self,
        path: &str,
        name: &str,
    ) -> Result<()> {
        let path = Path::new(path);

        if path.exists() {
            #[cfg(not(test))]
            {
                // Check key file permissions (should be 600)
                let metadata = fs::metadata(path).map_err(|e| {
                    Error::Config(ConfigError::Message(format!(
                        "Cannot access {} permissions: {}",
                        path.display(),
                        e
                    )))
                })?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let mode = metadata.permissions().mode();
                    if mode & 0o777 != 0o600 {
                        return Err(Error::Config(ConfigError::Message(format!(
                            "Insecure permissions {:o} for {} (should be 600)",
                            mode & 0o777,
                            path.display()
                        ))));
                    }
                }
            }
            Ok(())
        } else {
            Err(Error::Config(ConfigError::Message(format!(
                "{} file {} not found",
                name,
                path.display()
            ))))
        }
    }
}

// Default implementations
fn default_enable_tls() -> bool {
    false
}
fn default_ca_path() -> String {
    "/etc/ssl/certs/ca.pem".into()
}
fn default_client_cert_path() -> String {
    String::new()
}
fn default_client_key_path() -> String {
    String::new()
}
fn default_domain_name_override() -> String {
    String::new()
}
fn default_enable_mtls() -> bool {
    false
}
