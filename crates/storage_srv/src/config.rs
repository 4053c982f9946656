//! config types.

/// Configuration for running a StorageSrv.
pub struct Config {
    /// Worker thread count.
    ///
    /// This server is built using blocking io and filesystem storage,
    /// and container edits rewrite whole files. It is therefore
    /// beneficial to have more worker threads than system cpus, since the
    /// workers will be bound on io, not on cpu. Each worker may also hold
    /// a streaming download open, so a slow requester occupies a worker
    /// until it has read its payload.
    ///
    /// Defaults:
    /// - `testing = 2`
    /// - `production = 4 * cpu_count`
    pub worker_thread_count: usize,

    /// The address(es) at which to listen.
    ///
    /// Defaults:
    /// - `testing = "[127.0.0.1:0]"`
    /// - `production = "[0.0.0.0:8080, [::]:8080]"`
    pub listen_address_list: Vec<std::net::SocketAddr>,

    /// How long the http front end waits for a worker to produce the
    /// response head of a request.
    ///
    /// Defaults:
    /// - `testing = 10s`
    /// - `production = 10s`
    pub request_timeout: std::time::Duration,

    /// Outstanding challenges expire after
    /// `request_timeout * challenge_ttl_multiplier`. A challenge spans a
    /// full round trip with the requester, so it gets a longer budget.
    ///
    /// Defaults:
    /// - `testing = 15`
    /// - `production = 15`
    pub challenge_ttl_multiplier: u32,

    /// Fragments strictly smaller than this are packed into the
    /// requester's container, if it has one.
    ///
    /// Defaults:
    /// - `testing = 8192`
    /// - `production = 8192`
    pub small_object_threshold: u64,

    /// Directory holding standalone fragments and containers.
    ///
    /// Defaults:
    /// - `testing = "<tmp>/fragstore-testing"`
    /// - `production = "./fragstore"`
    pub storage_dir: std::path::PathBuf,

    /// Secret shared by every node of the trust group.
    ///
    /// Defaults:
    /// - `testing = "fragstore-testing-group"`
    /// - `production = "fragstore-default-group"`
    pub group_secret: String,

    /// PKCS#8 PEM file holding the node key. Generated on first start.
    /// If `None`, an ephemeral key is generated every start.
    ///
    /// Defaults:
    /// - `testing = None`
    /// - `production = "./fragstore-node-key.pem"`
    pub key_path: Option<std::path::PathBuf>,

    /// RSA modulus size for generated node keys.
    ///
    /// Defaults:
    /// - `testing = 1024`
    /// - `production = 2048`
    pub key_bits: usize,

    /// Maximum accepted STORE body size.
    ///
    /// Defaults:
    /// - `testing = 16MiB`
    /// - `production = 512MiB`
    pub max_upload_bytes: usize,

    /// The path to a TLS certificate file.
    ///
    /// Must be provided when `tls_key` is provided.
    ///
    /// Default:
    /// - `None`
    pub tls_cert: Option<std::path::PathBuf>,

    /// The path to a TLS key file.
    ///
    /// Must be provided when `tls_cert` is provided.
    ///
    /// Default:
    /// - `None`
    pub tls_key: Option<std::path::PathBuf>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("worker_thread_count", &self.worker_thread_count)
            .field("listen_address_list", &self.listen_address_list)
            .field("request_timeout", &self.request_timeout)
            .field("challenge_ttl_multiplier", &self.challenge_ttl_multiplier)
            .field("small_object_threshold", &self.small_object_threshold)
            .field("storage_dir", &self.storage_dir)
            .field("group_secret", &"<redacted>")
            .field("key_path", &self.key_path)
            .field("key_bits", &self.key_bits)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("tls_cert", &self.tls_cert)
            .field("tls_key", &self.tls_key)
            .finish()
    }
}

impl Config {
    /// Get a storage node config suitable for testing.
    pub fn testing() -> Self {
        Self {
            worker_thread_count: 2,
            listen_address_list: vec![
                (std::net::Ipv4Addr::LOCALHOST, 0).into(),
            ],
            request_timeout: std::time::Duration::from_secs(10),
            challenge_ttl_multiplier: 15,
            small_object_threshold: 8192,
            storage_dir: std::env::temp_dir().join("fragstore-testing"),
            group_secret: "fragstore-testing-group".into(),
            key_path: None,
            key_bits: 1024,
            max_upload_bytes: 16 * 1024 * 1024,
            tls_cert: None,
            tls_key: None,
        }
    }

    /// Get a storage node config suitable for production.
    pub fn production() -> Self {
        Self {
            worker_thread_count: num_cpus::get() * 4,
            listen_address_list: vec![
                (std::net::Ipv4Addr::UNSPECIFIED, 8080).into(),
                (std::net::Ipv6Addr::UNSPECIFIED, 8080).into(),
            ],
            request_timeout: std::time::Duration::from_secs(10),
            challenge_ttl_multiplier: 15,
            small_object_threshold: 8192,
            storage_dir: "./fragstore".into(),
            group_secret: "fragstore-default-group".into(),
            key_path: Some("./fragstore-node-key.pem".into()),
            key_bits: 2048,
            max_upload_bytes: 512 * 1024 * 1024,
            tls_cert: None,
            tls_key: None,
        }
    }

    /// Lifetime of an outstanding challenge.
    pub fn challenge_ttl(&self) -> std::time::Duration {
        self.request_timeout * self.challenge_ttl_multiplier
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn challenge_ttl_is_a_multiple_of_request_timeout() {
        let config = Config::testing();
        assert_eq!(std::time::Duration::from_secs(150), config.challenge_ttl());

        let config = Config {
            request_timeout: std::time::Duration::from_millis(100),
            challenge_ttl_multiplier: 3,
            ..Config::production()
        };
        assert_eq!(
            std::time::Duration::from_millis(300),
            config.challenge_ttl()
        );
    }

    #[test]
    fn debug_hides_group_secret() {
        let out = format!("{:?}", Config::testing());
        assert!(out.contains("<redacted>"));
        assert!(!out.contains("fragstore-testing-group"));
    }
}
