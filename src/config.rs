use std::path::PathBuf;
use std::time::Duration;

/// How strictly the server certificate is checked during the TLS
/// handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsSecurity {
    /// Encrypt the stream but accept any certificate.
    Insecure,
    /// Verify the certificate chain, ignore hostname mismatches.
    NoHostVerification,
    /// Verify chain and hostname (system roots plus the optional CA).
    Strict,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub security: TlsSecurity,
    pub ca_pem_path: Option<PathBuf>,
    pub sni_hostname: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub host: String,
    pub port: u16,

    pub user: String,
    pub password: String,
    pub database: String,

    pub tls: TlsConfig,

    /// Admission bound of the pool. The first connection may widen it if
    /// the server suggests a larger concurrency.
    pub pool_size: usize,

    /// Deadline for each individual SASL exchange step.
    pub sasl_timeout: Duration,

    /// Upper bound on transaction retries for retryable failures.
    pub retry_attempts: u32,

    /// Base delay between transaction retries; doubles per attempt.
    pub retry_backoff: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5656,
            user: "edgedb".into(),
            password: String::new(),
            database: "edgedb".into(),
            tls: TlsConfig {
                security: TlsSecurity::Strict,
                ca_pem_path: None,
                sni_hostname: None,
            },

            pool_size: 10,
            sasl_timeout: Duration::from_secs(15),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}
