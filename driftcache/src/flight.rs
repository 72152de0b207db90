//! Collapses concurrent misses for the same id into one upstream call.
//!
//! The first thread to insert a token for an id becomes the leader and
//! runs the fetch; every other thread joins the token and blocks until
//! the leader publishes the outcome. The token is removed once the
//! result is out, so later requests start a fresh fetch.

use crate::asset::Asset;
use crate::service::AssetService;
use parking_lot::{Condvar, Mutex};
use scc::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// What the one upstream call produced.
#[derive(Clone)]
pub(crate) enum FetchOutcome {
    Hit(Arc<Asset>),
    /// Authoritatively absent; the caller records a negative.
    Absent,
    /// Transient failure or a short-circuited self-loop; the caller
    /// records nothing so the next request retries.
    Failed,
}

/// Retry schedule for transient upstream errors.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Backoff {
    pub attempts: u32,
    pub initial: Duration,
    pub max: Duration,
}

struct Token {
    outcome: Mutex<Option<FetchOutcome>>,
    done: Condvar,
}

impl Token {
    fn new() -> Self {
        Token {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn wait(&self) -> FetchOutcome {
        let mut outcome = self.outcome.lock();
        while outcome.is_none() {
            self.done.wait(&mut outcome);
        }
        outcome.clone().unwrap()
    }

    fn publish(&self, result: FetchOutcome) {
        *self.outcome.lock() = Some(result);
        self.done.notify_all();
    }
}

#[derive(Clone, Default)]
pub(crate) struct Flight {
    tokens: Arc<HashMap<String, Arc<Token>>>,
    joins: Arc<AtomicU64>,
}

impl Flight {
    /// Fetch `id` through the coordinator. Exactly one upstream call
    /// runs per id at any instant; followers share its outcome.
    pub fn fetch(
        &self,
        id: &str,
        upstream: &Arc<dyn AssetService>,
        backoff: &Backoff,
    ) -> FetchOutcome {
        if upstream.is_layered_cache() {
            debug!(id, "upstream is a layered cache, refusing the self-loop");
            return FetchOutcome::Failed;
        }

        loop {
            if let Some(token) = self.tokens.read(id, |_, token| token.clone()) {
                self.joins.fetch_add(1, Ordering::Relaxed);
                return token.wait();
            }

            let token = Arc::new(Token::new());
            match self.tokens.insert(id.to_owned(), token.clone()) {
                Ok(()) => {
                    let outcome = fetch_with_backoff(upstream.as_ref(), id, backoff);
                    token.publish(outcome.clone());
                    self.tokens.remove(id);
                    return outcome;
                }
                // lost the insert race; join the winner's token
                Err(_) => continue,
            }
        }
    }

    /// Followers that joined an existing token since startup.
    pub fn joins(&self) -> u64 {
        self.joins.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.tokens.len()
    }
}

fn fetch_with_backoff(upstream: &dyn AssetService, id: &str, backoff: &Backoff) -> FetchOutcome {
    let mut delay = backoff.initial;
    let mut attempt = 0u32;
    loop {
        match upstream.fetch(id) {
            Ok(Some(asset)) => return FetchOutcome::Hit(Arc::new(asset)),
            Ok(None) => return FetchOutcome::Absent,
            Err(err) => {
                if attempt >= backoff.attempts {
                    warn!(id, error = %err, "upstream fetch failed");
                    return FetchOutcome::Failed;
                }
                debug!(id, attempt, error = %err, "upstream fetch failed, retrying");
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                delay = (delay * 2).min(backoff.max);
                attempt += 1;
            }
        }
    }
}
