//! storage node server types.

use crate::*;
use std::io::Write;
use std::sync::Arc;

/// Chunk size of streamed response bodies.
const STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// Chunks buffered between a streaming worker and the http front end.
const STREAM_CHANNEL_DEPTH: usize = 8;

/// Print out a message if this thread dies.
struct ThreadGuard(&'static str);

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        tracing::debug!("{}", self.0);
    }
}

/// A running storage node.
///
/// Requests are accepted by an async http front end and handed to a
/// pool of os thread workers, which do all of the blocking filesystem
/// work and feed streamed responses back chunk by chunk.
pub struct StorageSrv {
    cont: Arc<std::sync::atomic::AtomicBool>,
    workers: Vec<std::thread::JoinHandle<std::io::Result<()>>>,
    addrs: Vec<std::net::SocketAddr>,
    server: Option<Server>,
    node: Arc<Node>,
}

impl Drop for StorageSrv {
    fn drop(&mut self) {
        let _g = ThreadGuard("Server Shutdown Complete!");

        tracing::debug!("begin server shutdown...");
        let _ = self.shutdown();
    }
}

impl StorageSrv {
    /// Start a storage node recording peers in an in-memory [PeerBook].
    pub fn new(config: Config) -> std::io::Result<Self> {
        Self::with_peer_reputation(config, Arc::new(PeerBook::default()))
    }

    /// Start a storage node reporting peer contacts and failures to
    /// `peers`.
    pub fn with_peer_reputation(
        config: Config,
        peers: DynPeerReputation,
    ) -> std::io::Result<Self> {
        let config = Arc::new(config);

        // atomic flag for telling worker threads to shutdown
        let cont = Arc::new(std::sync::atomic::AtomicBool::new(true));

        std::fs::create_dir_all(&config.storage_dir)?;
        remove_stale_temp_files(&config.storage_dir)?;

        let key = Arc::new(NodeKey::load_or_generate(
            config.key_path.as_deref(),
            config.key_bits,
        )?);
        tracing::info!(node_id = %key.node_id(), "node identity");

        let sconf = ServerConfig {
            addrs: config.listen_address_list.clone(),
            worker_thread_count: config.worker_thread_count,
            tls_config: TlsConfig::from_config(&config),
        };

        // start the actual http server
        let server = Server::new(config.clone(), sconf)?;

        // get the address that was assigned
        let addrs = server.server_addrs().to_vec();
        tracing::info!(?addrs, "Listening");

        let challenges = ChallengeRegistry::new(
            config.challenge_ttl(),
            Some(server.runtime().clone()),
        );

        let node = Arc::new(Node::new(config.clone(), key, challenges, peers));

        // spawn our worker threads
        let mut workers = Vec::with_capacity(config.worker_thread_count);
        for _ in 0..config.worker_thread_count {
            let cont = cont.clone();
            let node = node.clone();
            let recv = server.receiver().clone();
            workers.push(std::thread::spawn(move || worker(cont, node, recv)));
        }

        Ok(Self {
            cont,
            workers,
            addrs,
            server: Some(server),
            node,
        })
    }

    /// Shutdown the server, returning an error result if any
    /// of the worker threads had panicked.
    pub fn shutdown(&mut self) -> std::io::Result<()> {
        let mut is_err = false;
        self.cont.store(false, std::sync::atomic::Ordering::SeqCst);
        drop(self.server.take());
        while let Some(worker) = self.workers.pop() {
            tracing::debug!(
                "waiting on {} threads to close...",
                self.workers.len() + 1
            );
            if worker.join().is_err() {
                is_err = true;
            }
        }
        tracing::debug!("all threads closed.");
        if is_err {
            Err(std::io::Error::other("Failure shutting down worker thread"))
        } else {
            Ok(())
        }
    }

    /// Get the bound listening addresses of this server.
    pub fn listen_addrs(&self) -> &[std::net::SocketAddr] {
        self.addrs.as_slice()
    }

    /// This node's id.
    pub fn node_id(&self) -> &NodeId {
        self.node.key().node_id()
    }

    /// This node's public key.
    pub fn public_key(&self) -> &PublicKey {
        self.node.key().public()
    }

    /// Print the address server started on
    pub fn print_addrs(&self) {
        println!("#fragstore_srv#running#{}#", self.node_id());
        for addr in self.addrs.iter() {
            // print these incase someone wants to parse for them
            println!("#fragstore_srv#listening#{addr:?}#");
        }
    }
}

/// Uploads and container rewrites interrupted by a crash leave `.tmp`
/// files behind.
fn remove_stale_temp_files(dir: &std::path::Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(".tmp")
            && entry.file_type()?.is_file()
        {
            tracing::info!(path = ?entry.path(), "removing stale temp file");
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn worker(
    cont: Arc<std::sync::atomic::AtomicBool>,
    node: Arc<Node>,
    recv: HttpReceiver,
) -> std::io::Result<()> {
    let _g = ThreadGuard("worker thread has ended");

    while cont.load(std::sync::atomic::Ordering::SeqCst) {
        let (req, res) = match recv.recv() {
            None => break,
            Some(r) => r,
        };

        let handler = Handler { node: &node, res };

        handler.handle(req)?;
    }

    Ok(())
}

struct Handler<'lt> {
    node: &'lt Node,
    res: HttpRespondCb,
}

impl Handler<'_> {
    /// Run the request and respond to the client.
    pub fn handle(self, req: HttpRequest) -> std::io::Result<()> {
        let reply = match req {
            HttpRequest::HealthGet => Reply::json(200, &serde_json::json!({})),
            HttpRequest::Op(req) => self.node.dispatch(req),
        };
        self.respond(reply);
        Ok(())
    }

    /// Process the response.
    fn respond(self, reply: Reply) {
        let Self { res, .. } = self;
        match reply {
            Reply::Full {
                status,
                headers,
                body,
            } => res(HttpResponse {
                status,
                headers,
                body: HttpBody::Full(body),
            }),
            Reply::Stream { headers, writer } => {
                let (send, recv) = async_channel::bounded(STREAM_CHANNEL_DEPTH);
                res(HttpResponse {
                    status: 200,
                    headers,
                    body: HttpBody::Stream(recv),
                });
                stream_body(send, writer);
            }
        }
    }
}

fn stream_body(
    send: async_channel::Sender<std::io::Result<bytes::Bytes>>,
    writer: BodyWriter,
) {
    let mut out = std::io::BufWriter::with_capacity(
        STREAM_CHUNK_BYTES,
        ChannelWriter(send),
    );

    let err = match writer(&mut out).and_then(|_| out.flush()) {
        Ok(()) => return,
        Err(err) => err,
    };

    // discard whatever is still buffered, the body is broken anyway
    let (ChannelWriter(send), _) = out.into_parts();

    if err.kind() == std::io::ErrorKind::BrokenPipe {
        tracing::debug!("requester went away mid-stream");
    } else {
        tracing::warn!(?err, "streamed response failed");
        // aborts the response instead of ending it cleanly
        let _ = send.send_blocking(Err(err));
    }
}

/// Blocking [Write] half of a streamed response body.
struct ChannelWriter(async_channel::Sender<std::io::Result<bytes::Bytes>>);

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        // BufWriter passes large writes straight through
        let len = buf.len().min(STREAM_CHUNK_BYTES);
        if len == 0 {
            return Ok(0);
        }
        self.0
            .send_blocking(Ok(bytes::Bytes::copy_from_slice(&buf[..len])))
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;
        Ok(len)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
