//! The binary fragstore-srv.

use fragstore_srv::*;

#[derive(clap::Parser, Debug)]
#[command(version)]
pub struct Args {
    /// By default fragstore-srv runs in "testing" configuration, with
    /// light resource usage, an ephemeral node key and storage in the
    /// system temp directory. This is enough for local development and
    /// automated tests.
    ///
    /// The "production" mode sizes the worker pool for the machine,
    /// listens on port 8080 and keeps its key and storage in the working
    /// directory.
    #[arg(long)]
    pub production: bool,

    /// Directory holding fragments and containers.
    #[arg(long)]
    pub storage_dir: Option<std::path::PathBuf>,

    /// Address to listen on. May be given more than once.
    #[arg(long)]
    pub listen: Vec<std::net::SocketAddr>,

    /// Secret shared by the nodes of the trust group.
    #[arg(long, env = "FRAGSTORE_GROUP_SECRET", hide_env_values = true)]
    pub group_secret: Option<String>,

    /// PKCS#8 PEM node key, generated if the file does not exist.
    #[arg(long)]
    pub key_file: Option<std::path::PathBuf>,

    /// TLS certificate (PEM). Requires `--tls-key`.
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<std::path::PathBuf>,

    /// TLS private key (PEM). Requires `--tls-cert`.
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<std::path::PathBuf>,
}

fn main() {
    let args = <Args as clap::Parser>::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(
                    tracing_subscriber::filter::LevelFilter::INFO.into(),
                )
                .from_env_lossy(),
        )
        .init();

    let mut config = if args.production {
        Config::production()
    } else {
        Config::testing()
    };

    if let Some(storage_dir) = args.storage_dir {
        config.storage_dir = storage_dir;
    }
    if !args.listen.is_empty() {
        config.listen_address_list = args.listen;
    }
    if let Some(group_secret) = args.group_secret {
        config.group_secret = group_secret;
    }
    if let Some(key_file) = args.key_file {
        config.key_path = Some(key_file);
    }
    config.tls_cert = args.tls_cert;
    config.tls_key = args.tls_key;

    tracing::info!(?config, "starting fragstore-srv");

    let (send, recv) = std::sync::mpsc::channel();

    if let Err(err) = ctrlc::set_handler(move || {
        let _ = send.send(());
    }) {
        eprintln!("failed to install the ctrl-c handler: {err}");
        std::process::exit(1);
    }

    let srv = match StorageSrv::new(config) {
        Ok(srv) => srv,
        Err(err) => {
            eprintln!("failed to start: {err}");
            std::process::exit(1);
        }
    };
    srv.print_addrs();

    let _ = recv.recv();

    println!("Terminating...");
    drop(srv);
    println!("Done.");
    std::process::exit(0);
}
