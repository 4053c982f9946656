//! Outstanding authentication challenges.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Length in bytes of a challenge nonce.
pub const NONCE_LEN: usize = 40;

type LiveMap = Mutex<HashMap<Vec<u8>, Instant>>;

/// The set of live challenge nonces.
///
/// Each issued nonce may be consumed exactly once before its ttl runs
/// out. Expiry is driven by one timer task per nonce on the server's
/// tokio runtime; `consume` additionally refuses anything older than the
/// ttl, so a late timer never extends a challenge.
#[derive(Clone)]
pub struct ChallengeRegistry {
    live: Arc<LiveMap>,
    ttl: Duration,
    runtime: Option<tokio::runtime::Handle>,
}

impl std::fmt::Debug for ChallengeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeRegistry")
            .field("live", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ChallengeRegistry {
    /// Construct a registry. Without a runtime handle there are no expiry
    /// timers and stale entries are only dropped when presented.
    pub fn new(ttl: Duration, runtime: Option<tokio::runtime::Handle>) -> Self {
        Self {
            live: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            runtime,
        }
    }

    /// Issue a fresh nonce and record it as live.
    pub fn issue(&self) -> Vec<u8> {
        // a leading zero byte would vanish from the encrypted integer
        let nonce = loop {
            let nonce = crate::random_bytes(NONCE_LEN);
            if nonce[0] != 0 {
                break nonce;
            }
        };

        self.live
            .lock()
            .unwrap()
            .insert(nonce.clone(), Instant::now());

        if let Some(runtime) = &self.runtime {
            let live = Arc::downgrade(&self.live);
            let ttl = self.ttl;
            let expiring = nonce.clone();
            runtime.spawn(async move {
                tokio::time::sleep(ttl).await;
                expire_weak(&live, &expiring);
            });
        }

        tracing::trace!(live = self.len(), "issued challenge");

        nonce
    }

    /// Remove `nonce`, returning true if it was live and not yet expired.
    pub fn consume(&self, nonce: &[u8]) -> bool {
        match self.live.lock().unwrap().remove(nonce) {
            Some(issued_at) => issued_at.elapsed() < self.ttl,
            None => false,
        }
    }

    /// Drop `nonce` if it is still present.
    pub fn expire(&self, nonce: &[u8]) {
        if self.live.lock().unwrap().remove(nonce).is_some() {
            tracing::debug!("challenge expired unanswered");
        }
    }

    /// Count of live challenges.
    pub fn len(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// True if no challenge is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn expire_weak(live: &Weak<LiveMap>, nonce: &[u8]) {
    if let Some(live) = live.upgrade() {
        if live.lock().unwrap().remove(nonce).is_some() {
            tracing::debug!("challenge expired unanswered");
        }
    }
}
