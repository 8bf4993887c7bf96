//! Session registry: identity → kernel session mapping plus activity
//! tracking.
//!
//! The registry exclusively owns the map; every insert/remove/replace is
//! atomic with respect to concurrent callers and the reclamation task, and
//! removal of a scanned victim is conditioned on identity so a session
//! installed by a concurrent [`create_session`](SessionRegistry::create_session)
//! is never torn down by mistake.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::kernel::Kernel;
use crate::session::controller::KernelSession;
use crate::{AppError, Result};

/// One registry entry: the session plus its activity timestamps.
struct SessionEntry {
    session: Arc<Mutex<KernelSession>>,
    #[allow(dead_code)] // Diagnostic value; reclamation keys off last_activity.
    created_at: Instant,
    last_activity: Instant,
}

impl SessionEntry {
    fn new(session: Arc<Mutex<KernelSession>>) -> Self {
        let now = Instant::now();
        Self {
            session,
            created_at: now,
            last_activity: now,
        }
    }
}

/// Concurrency-safe mapping from session key to [`KernelSession`].
pub struct SessionRegistry {
    config: Arc<GlobalConfig>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Configuration the registry was built with.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Create (or supersede) the session for `key` around `kernel`.
    ///
    /// Any pre-existing session for the key is terminated first so no two
    /// processes are ever addressable under one key. The new session is
    /// installed only after its artifact is written, the kernel confirms
    /// readiness, and the priming code has executed; on any failure the
    /// partially-constructed session is terminated and no entry is
    /// installed. Returns the artifact path.
    ///
    /// # Errors
    ///
    /// - [`AppError::Startup`] — the kernel process could not be spawned.
    /// - [`AppError::ReadinessTimeout`] — it never confirmed readiness.
    /// - [`AppError::Execution`] / [`AppError::ExecutionTimeout`] — the
    ///   priming code failed.
    pub async fn create_session(&self, key: &str, kernel: Box<dyn Kernel>) -> Result<PathBuf> {
        let pre_existing = self.sessions.lock().await.remove(key);
        if let Some(entry) = pre_existing {
            info!(key, "superseding existing session");
            entry.session.lock().await.terminate().await;
        }

        let mut session = KernelSession::new(
            kernel,
            self.config.session_dir(key),
            self.config.readiness_probe.clone(),
            self.config.timeouts.clone(),
        );

        let artifact = match self.bootstrap(&mut session, key).await {
            Ok(path) => path,
            Err(err) => {
                warn!(key, %err, "session bootstrap failed; terminating partial session");
                session.terminate().await;
                return Err(err);
            }
        };

        let entry = SessionEntry::new(Arc::new(Mutex::new(session)));
        let displaced = self.sessions.lock().await.insert(key.to_owned(), entry);
        if let Some(old) = displaced {
            // A concurrent create for the same key installed first; exactly
            // one session may remain reachable, so the displaced one goes.
            warn!(key, "concurrent create displaced an installed session");
            old.session.lock().await.terminate().await;
        }

        info!(key, "session installed");
        Ok(artifact)
    }

    /// Drive a freshly-constructed session to a ready, primed state.
    ///
    /// Writes the artifact and starts the kernel, waits for readiness, then
    /// runs the priming code; returns the artifact path. Any failure
    /// propagates so the caller can terminate the partial session.
    async fn bootstrap(&self, session: &mut KernelSession, key: &str) -> Result<PathBuf> {
        let artifact = session.create(key).await?;
        session
            .wait_until_ready(self.config.timeouts.startup())
            .await?;
        session.execute_code(&self.config.setup_code).await?;
        Ok(artifact)
    }

    /// Look up the session for `key`, refreshing its activity timestamp.
    ///
    /// A session found not ready gets a bounded readiness wait; if that
    /// bound is exceeded the registry falls back to a full reset rather than
    /// surfacing the timeout (self-healing).
    ///
    /// # Errors
    ///
    /// - [`AppError::SessionNotFound`] — no session for `key`.
    /// - Errors from the fallback reset propagate unchanged.
    pub async fn get_session(&self, key: &str) -> Result<Arc<Mutex<KernelSession>>> {
        let session = {
            let mut map = self.sessions.lock().await;
            let entry = map
                .get_mut(key)
                .ok_or_else(|| AppError::SessionNotFound(format!("no session for key {key}")))?;
            entry.last_activity = Instant::now();
            Arc::clone(&entry.session)
        };

        {
            let mut guard = session.lock().await;
            if !guard.is_ready() {
                let bound = self.config.timeouts.lookup_ready();
                match guard.wait_until_ready(bound).await {
                    Ok(()) => {}
                    Err(AppError::ReadinessTimeout(_)) => {
                        warn!(key, "session not ready within lookup bound; resetting");
                        guard.reset().await?;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        Ok(session)
    }

    /// Reset the session for `key` and re-run the priming code.
    ///
    /// # Errors
    ///
    /// - [`AppError::SessionNotFound`] — no session for `key`.
    /// - Reset or priming failures propagate unchanged.
    pub async fn reset_session(&self, key: &str) -> Result<()> {
        let session = self.get_session(key).await?;
        let mut guard = session.lock().await;
        guard.reset().await?;
        guard.execute_code(&self.config.setup_code).await?;
        info!(key, "session reset");
        Ok(())
    }

    /// Remove the session for `key` and terminate its kernel.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionNotFound`] when absent; the mapping is
    /// left unchanged in that case.
    pub async fn end_session(&self, key: &str) -> Result<()> {
        let entry = self
            .sessions
            .lock()
            .await
            .remove(key)
            .ok_or_else(|| AppError::SessionNotFound(format!("no session for key {key}")))?;

        entry.session.lock().await.terminate().await;
        info!(key, "session ended");
        Ok(())
    }

    /// One reclamation scan: terminate every session idle past the
    /// threshold.
    ///
    /// Candidates are collected without holding the lock across kernel I/O;
    /// each victim is then removed only if the mapped entry is still the
    /// scanned one and still idle, and only the instance actually removed is
    /// terminated.
    pub async fn reclaim_idle(&self) {
        let threshold = self.config.reclaim.idle_threshold();
        let now = Instant::now();

        let expired: Vec<(String, Arc<Mutex<KernelSession>>)> = {
            let map = self.sessions.lock().await;
            map.iter()
                .filter(|(_, entry)| now.duration_since(entry.last_activity) > threshold)
                .map(|(key, entry)| (key.clone(), Arc::clone(&entry.session)))
                .collect()
        };

        for (key, candidate) in expired {
            let removed = {
                let mut map = self.sessions.lock().await;
                let still_victim = map.get(&key).is_some_and(|entry| {
                    Arc::ptr_eq(&entry.session, &candidate)
                        && Instant::now().duration_since(entry.last_activity) > threshold
                });
                if still_victim {
                    map.remove(&key)
                } else {
                    None
                }
            };

            if let Some(entry) = removed {
                info!(key, "reclaiming idle session");
                entry.session.lock().await.terminate().await;
            }
        }
    }

    /// Terminate every session. Called once during orderly shutdown so no
    /// kernel process outlives the server.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, SessionEntry)> =
            self.sessions.lock().await.drain().collect();

        for (key, entry) in drained {
            info!(key, "terminating session at shutdown");
            entry.session.lock().await.terminate().await;
        }
    }
}
