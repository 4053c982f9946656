use axum_server::tls_rustls::RustlsConfig;

/// Certificate and key files for serving the storage api over TLS.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    cert_path: std::path::PathBuf,
    key_path: std::path::PathBuf,
}

impl TlsConfig {
    /// Both files are PEM encoded.
    pub fn new(
        cert_path: std::path::PathBuf,
        key_path: std::path::PathBuf,
    ) -> Self {
        Self {
            cert_path,
            key_path,
        }
    }

    /// TLS settings of `config`, if both files are configured.
    pub fn from_config(config: &crate::Config) -> Option<Self> {
        match (&config.tls_cert, &config.tls_key) {
            (Some(cert), Some(key)) => {
                Some(Self::new(cert.clone(), key.clone()))
            }
            _ => None,
        }
    }

    /// Load the files into a [RustlsConfig].
    pub async fn create_tls_config(&self) -> std::io::Result<RustlsConfig> {
        RustlsConfig::from_pem_file(&self.cert_path, &self.key_path).await
    }
}
