//! In-memory control-plane session manager

use super::traits::{
    ManagerTurnRequest, ObservabilitySnapshot, RuntimeCacheSnapshot, SessionManager,
    SessionResolution, SessionStatusReport, TurnCounters, TurnEventHandler,
};
use crate::acp::identity::{identity_from_handle, identity_from_status, merge_session_identity};
use crate::acp::runtime_options::{
    validate_config_option_input, validate_cwd_input, validate_model_input,
    validate_permission_profile_input, validate_runtime_mode_input,
};
use crate::acp::{AcpRuntime, RuntimeBackendRegistry, RuntimeOptions, RuntimeResult, TurnInput};
use crate::error::{with_error_boundary, AcpErrorCode, AcpRuntimeError};
use crate::types::{
    DoctorReport, EnsureSessionInput, IdentitySource, IdentityState, RuntimeControl,
    RuntimeHandle, SessionAcpMeta, SessionMode, SessionRuntimeState, TurnEvent,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

struct CachedRuntime {
    runtime: Arc<dyn AcpRuntime>,
    handle: RuntimeHandle,
    /// Control signature last pushed to the backend
    applied_signature: Option<String>,
}

#[derive(Debug, Default)]
struct TurnStats {
    completed: u64,
    failed: u64,
    total_latency_ms: u64,
}

/// Increments a counter for as long as it lives
struct CounterGuard<'a>(&'a AtomicUsize);

impl<'a> CounterGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Session manager keeping metadata and the runtime cache in memory
pub struct InMemorySessionManager {
    registry: RuntimeBackendRegistry,
    default_backend: String,
    metas: Mutex<HashMap<String, SessionAcpMeta>>,
    runtimes: Mutex<HashMap<String, CachedRuntime>>,
    turn_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    queue_depth: AtomicUsize,
    active_turns: AtomicUsize,
    stats: Mutex<TurnStats>,
}

impl InMemorySessionManager {
    pub fn new(registry: RuntimeBackendRegistry, default_backend: impl Into<String>) -> Self {
        Self {
            registry,
            default_backend: default_backend.into(),
            metas: Mutex::new(HashMap::new()),
            runtimes: Mutex::new(HashMap::new()),
            turn_locks: Mutex::new(HashMap::new()),
            queue_depth: AtomicUsize::new(0),
            active_turns: AtomicUsize::new(0),
            stats: Mutex::new(TurnStats::default()),
        }
    }

    pub fn registry(&self) -> &RuntimeBackendRegistry {
        &self.registry
    }

    /// Bind `session_key` to an ACP session on `backend` (or the default one).
    ///
    /// The session starts with a pending identity carrying whatever ids the
    /// backend handed out at establishment.
    pub async fn initialize_session(
        &self,
        session_key: &str,
        agent: &str,
        mode: SessionMode,
        cwd: Option<&str>,
        backend: Option<&str>,
    ) -> RuntimeResult<SessionAcpMeta> {
        let key = session_key.trim();
        if key.is_empty() {
            return Err(AcpRuntimeError::new(
                AcpErrorCode::SessionInitFailed,
                "ACP session key is required",
            ));
        }
        let backend_id = backend
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(self.default_backend.as_str())
            .to_string();
        let cwd = cwd.map(validate_cwd_input).transpose()?;
        let runtime = self.registry.require(&backend_id)?;

        let mut input = EnsureSessionInput::new(key, agent.trim()).with_mode(mode);
        if let Some(cwd) = &cwd {
            input = input.with_cwd(cwd.clone());
        }
        let handle = with_error_boundary(
            runtime.ensure_session(input),
            AcpErrorCode::SessionInitFailed,
            "Could not initialize ACP session",
        )
        .await?;

        let now = Utc::now();
        let meta = SessionAcpMeta {
            backend: backend_id,
            agent: agent.trim().to_string(),
            runtime_session_name: handle.runtime_session_name.clone(),
            mode,
            cwd: cwd.clone(),
            identity: Some(identity_from_handle(&handle, now)),
            runtime_options: RuntimeOptions {
                cwd,
                ..RuntimeOptions::default()
            },
            state: SessionRuntimeState::Idle,
            last_activity_at: now,
            last_error: None,
        };

        let previous = self.runtimes.lock().insert(
            key.to_string(),
            CachedRuntime {
                runtime,
                handle: handle.clone(),
                applied_signature: None,
            },
        );
        if let Some(previous) = previous {
            if previous.handle.runtime_session_name != handle.runtime_session_name {
                self.close_cached(previous, "session re-initialized").await;
            }
        }
        self.metas.lock().insert(key.to_string(), meta.clone());

        info!(
            "Initialized ACP session {} on backend {} ({})",
            key, meta.backend, meta.runtime_session_name
        );
        Ok(meta)
    }

    /// Rehydrate persisted metadata without touching any backend
    pub fn restore_session(&self, session_key: &str, meta: SessionAcpMeta) {
        self.metas.lock().insert(session_key.to_string(), meta);
    }

    pub fn session_meta(&self, session_key: &str) -> Option<SessionAcpMeta> {
        self.metas.lock().get(session_key).cloned()
    }

    fn require_meta(&self, session_key: &str) -> RuntimeResult<SessionAcpMeta> {
        self.session_meta(session_key).ok_or_else(|| {
            AcpRuntimeError::new(
                AcpErrorCode::SessionInitFailed,
                format!("ACP session \"{}\" is not initialized", session_key),
            )
            .with_retryable(false)
        })
    }

    fn update_meta(&self, session_key: &str, f: impl FnOnce(&mut SessionAcpMeta)) {
        if let Some(meta) = self.metas.lock().get_mut(session_key) {
            f(meta);
        }
    }

    fn turn_lock(&self, session_key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.turn_locks
            .lock()
            .entry(session_key.to_string())
            .or_default()
            .clone()
    }

    /// Forget the session's turn lock unless a turn holds or awaits it.
    fn release_turn_lock(&self, session_key: &str) {
        let mut locks = self.turn_locks.lock();
        if locks
            .get(session_key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_key);
        }
    }

    fn cached(&self, session_key: &str) -> Option<(Arc<dyn AcpRuntime>, RuntimeHandle)> {
        self.runtimes
            .lock()
            .get(session_key)
            .map(|c| (c.runtime.clone(), c.handle.clone()))
    }

    async fn close_cached(&self, cached: CachedRuntime, reason: &str) {
        if let Err(e) = cached.runtime.close(&cached.handle, reason).await {
            warn!(
                "Failed to close ACP runtime {}: {}",
                cached.handle.runtime_session_name, e
            );
        }
    }

    async fn drop_runtime(&self, session_key: &str, reason: &str) {
        let cached = self.runtimes.lock().remove(session_key);
        if let Some(cached) = cached {
            debug!("Dropping cached ACP runtime for {}: {}", session_key, reason);
            self.close_cached(cached, reason).await;
        }
    }

    /// Cached runtime for the session, establishing one if needed.
    async fn ensure_runtime(
        &self,
        session_key: &str,
        meta: &SessionAcpMeta,
    ) -> RuntimeResult<(Arc<dyn AcpRuntime>, RuntimeHandle)> {
        if let Some(cached) = self.cached(session_key) {
            return Ok(cached);
        }

        let runtime = self.registry.require(&meta.backend)?;
        let mut input =
            EnsureSessionInput::new(session_key, meta.agent.clone()).with_mode(meta.mode);
        if let Some(cwd) = meta.runtime_options.cwd.clone().or_else(|| meta.cwd.clone()) {
            input = input.with_cwd(cwd);
        }
        let handle = with_error_boundary(
            runtime.ensure_session(input),
            AcpErrorCode::SessionInitFailed,
            "Could not initialize ACP session",
        )
        .await?;

        let now = Utc::now();
        let incoming = identity_from_handle(&handle, now);
        self.update_meta(session_key, |meta| {
            if meta.runtime_session_name == handle.runtime_session_name {
                meta.identity = merge_session_identity(meta.identity.as_ref(), Some(&incoming), now);
            } else {
                // A new runtime session starts a new identity.
                meta.runtime_session_name = handle.runtime_session_name.clone();
                meta.identity = Some(incoming);
            }
        });
        self.runtimes.lock().insert(
            session_key.to_string(),
            CachedRuntime {
                runtime: runtime.clone(),
                handle: handle.clone(),
                applied_signature: None,
            },
        );
        debug!(
            "Established ACP runtime for {} ({})",
            session_key, handle.runtime_session_name
        );
        Ok((runtime, handle))
    }

    /// Push options to the backend when they changed since last application.
    ///
    /// Fails closed when an option needs a control the backend does not
    /// advertise.
    async fn apply_runtime_options(
        &self,
        session_key: &str,
        runtime: &Arc<dyn AcpRuntime>,
        handle: &RuntimeHandle,
        options: &RuntimeOptions,
    ) -> RuntimeResult<()> {
        let signature = options.control_signature();
        let applied = self
            .runtimes
            .lock()
            .get(session_key)
            .and_then(|c| c.applied_signature.clone());
        let up_to_date = match &applied {
            Some(applied) => *applied == signature,
            None => signature.is_empty(),
        };
        if up_to_date {
            return Ok(());
        }

        let capabilities = runtime.get_capabilities(Some(handle)).await?;
        if let Some(mode) = &options.runtime_mode {
            if !capabilities.supports(RuntimeControl::SetMode) {
                return Err(AcpRuntimeError::unsupported_control(
                    runtime.id(),
                    RuntimeControl::SetMode.as_str(),
                ));
            }
            runtime.set_mode(handle, mode).await?;
        }

        let pairs = options.config_option_pairs();
        if !pairs.is_empty() && !capabilities.supports(RuntimeControl::SetConfigOption) {
            return Err(AcpRuntimeError::unsupported_control(
                runtime.id(),
                RuntimeControl::SetConfigOption.as_str(),
            ));
        }
        for (key, value) in pairs {
            if !capabilities.accepts_config_key(&key) {
                return Err(AcpRuntimeError::unsupported_control(
                    runtime.id(),
                    &format!("config option \"{}\"", key),
                ));
            }
            runtime.set_config_option(handle, &key, &value).await?;
        }

        if let Some(cached) = self.runtimes.lock().get_mut(session_key) {
            cached.applied_signature = Some(signature);
        }
        debug!("Applied runtime options for {}", session_key);
        Ok(())
    }

    /// Confirm identity after a successful turn.
    ///
    /// Prefers a live status probe; backends without one confirm whatever ids
    /// they put on the handle.
    async fn refresh_identity(
        &self,
        session_key: &str,
        runtime: &Arc<dyn AcpRuntime>,
        handle: &RuntimeHandle,
    ) {
        let now = Utc::now();
        let capabilities = runtime
            .get_capabilities(Some(handle))
            .await
            .unwrap_or_default();
        let mut incoming = None;
        if capabilities.supports(RuntimeControl::Status) {
            match runtime.get_status(handle).await {
                Ok(status) => incoming = identity_from_status(&status, now),
                Err(e) => debug!("Status probe after turn failed for {}: {}", session_key, e),
            }
        }
        let incoming = incoming.or_else(|| {
            let mut identity = identity_from_handle(handle, now);
            identity.has_identifier().then(|| {
                identity.state = IdentityState::Resolved;
                identity.source = IdentitySource::Event;
                identity
            })
        });

        if let Some(incoming) = incoming {
            self.update_meta(session_key, |meta| {
                meta.identity = merge_session_identity(meta.identity.as_ref(), Some(&incoming), now);
            });
        }
    }

    async fn run_turn_inner(
        &self,
        request: &ManagerTurnRequest,
        meta: &SessionAcpMeta,
        handler: &mut dyn TurnEventHandler,
    ) -> RuntimeResult<()> {
        let key = request.session_key.as_str();
        let (runtime, handle) = self.ensure_runtime(key, meta).await?;
        self.apply_runtime_options(key, &runtime, &handle, &meta.runtime_options)
            .await?;

        let input = TurnInput::new(handle.clone(), request.text.clone())
            .with_mode(request.mode)
            .with_request_id(request.request_id.clone())
            .with_signal(request.signal.clone());
        let mut stream = runtime.run_turn(input).await?;

        let mut terminal_error = None;
        let mut saw_terminal = false;
        let mut cancel_sent = false;
        loop {
            let next = match (&request.signal, cancel_sent) {
                (Some(signal), false) => {
                    tokio::select! {
                        biased;
                        event = stream.next() => event,
                        _ = signal.aborted() => {
                            cancel_sent = true;
                            if let Err(e) = runtime.cancel(&handle, Some("turn aborted")).await {
                                warn!("Cancel failed for {}: {}", key, e);
                            }
                            continue;
                        }
                    }
                }
                _ => stream.next().await,
            };
            let Some(event) = next else {
                break;
            };

            if let TurnEvent::Error {
                message,
                code,
                retryable,
            } = &event
            {
                terminal_error = Some(AcpRuntimeError::from_event_parts(
                    message,
                    code.as_deref(),
                    *retryable,
                ));
            }
            saw_terminal |= event.is_terminal();
            handler.on_event(event).await;
        }

        if let Some(error) = terminal_error {
            return Err(error);
        }
        if !saw_terminal {
            let aborted = request.signal.as_ref().is_some_and(|s| s.is_aborted());
            if !aborted {
                return Err(AcpRuntimeError::turn_failed(
                    "ACP turn ended without a terminal event",
                ));
            }
        }

        self.refresh_identity(key, &runtime, &handle).await;
        Ok(())
    }

    fn validate_patch(patch: RuntimeOptions) -> RuntimeResult<RuntimeOptions> {
        let mut validated = RuntimeOptions {
            runtime_mode: patch
                .runtime_mode
                .as_deref()
                .map(validate_runtime_mode_input)
                .transpose()?,
            model: patch.model.as_deref().map(validate_model_input).transpose()?,
            cwd: patch.cwd.as_deref().map(validate_cwd_input).transpose()?,
            permission_profile: patch
                .permission_profile
                .as_deref()
                .map(validate_permission_profile_input)
                .transpose()?,
            timeout_seconds: None,
            backend_extras: Default::default(),
        };
        if let Some(timeout) = patch.timeout_seconds {
            validated.timeout_seconds = Some(crate::acp::runtime_options::parse_timeout_seconds(
                &timeout.to_string(),
            )?);
        }
        for (key, value) in &patch.backend_extras {
            let (key, value) = validate_config_option_input(key, value)?;
            validated.backend_extras.insert(key, value);
        }
        Ok(validated)
    }
}

#[async_trait]
impl SessionManager for InMemorySessionManager {
    async fn resolve_session(&self, session_key: &str) -> SessionResolution {
        let Some(meta) = self.session_meta(session_key) else {
            return SessionResolution::None;
        };
        match self.registry.require(&meta.backend) {
            Ok(_) => SessionResolution::Ready { meta },
            Err(error) => SessionResolution::Stale { meta, error },
        }
    }

    async fn run_turn(
        &self,
        request: ManagerTurnRequest,
        handler: &mut dyn TurnEventHandler,
    ) -> RuntimeResult<()> {
        let key = request.session_key.clone();
        self.require_meta(&key)?;

        let queued = CounterGuard::enter(&self.queue_depth);
        let lock = self.turn_lock(&key);
        let _turn = lock.lock().await;
        drop(queued);
        let _active = CounterGuard::enter(&self.active_turns);

        // Re-read under the turn lock so option changes made while queued apply.
        let meta = self.require_meta(&key)?;
        self.update_meta(&key, |meta| {
            meta.state = SessionRuntimeState::Running;
            meta.last_activity_at = Utc::now();
        });

        let started = Instant::now();
        let result = self.run_turn_inner(&request, &meta, handler).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        {
            let mut stats = self.stats.lock();
            stats.total_latency_ms += latency_ms;
            match &result {
                Ok(()) => stats.completed += 1,
                Err(_) => stats.failed += 1,
            }
        }
        self.update_meta(&key, |meta| {
            meta.last_activity_at = Utc::now();
            match &result {
                Ok(()) => {
                    meta.state = SessionRuntimeState::Idle;
                    meta.last_error = None;
                }
                Err(e) => {
                    meta.state = SessionRuntimeState::Error;
                    meta.last_error = Some(e.message.clone());
                }
            }
        });
        debug!("ACP turn for {} finished in {}ms", key, latency_ms);
        result
    }

    async fn get_session_status(&self, session_key: &str) -> RuntimeResult<SessionStatusReport> {
        self.require_meta(session_key)?;

        let (capabilities, runtime_status) = match self.cached(session_key) {
            Some((runtime, handle)) => {
                let capabilities = runtime.get_capabilities(Some(&handle)).await?;
                let status = if capabilities.supports(RuntimeControl::Status) {
                    Some(runtime.get_status(&handle).await?)
                } else {
                    None
                };
                (Some(capabilities), status)
            }
            None => (None, None),
        };

        if let Some(status) = &runtime_status {
            let now = Utc::now();
            if let Some(incoming) = identity_from_status(status, now) {
                self.update_meta(session_key, |meta| {
                    meta.identity =
                        merge_session_identity(meta.identity.as_ref(), Some(&incoming), now);
                });
            }
        }

        let meta = self.require_meta(session_key)?;
        Ok(SessionStatusReport {
            session_key: session_key.to_string(),
            backend: meta.backend,
            agent: meta.agent,
            runtime_session_name: meta.runtime_session_name,
            state: meta.state,
            runtime_options: meta.runtime_options,
            identity: meta.identity,
            capabilities,
            runtime_status,
            last_error: meta.last_error,
        })
    }

    async fn set_session_runtime_mode(
        &self,
        session_key: &str,
        mode: &str,
    ) -> RuntimeResult<RuntimeOptions> {
        let patch = RuntimeOptions {
            runtime_mode: Some(validate_runtime_mode_input(mode)?),
            ..RuntimeOptions::default()
        };
        self.update_session_runtime_options(session_key, patch).await
    }

    /// Validate, apply live if a runtime is cached, then persist.
    ///
    /// Options are only persisted once the live application succeeded, so a
    /// backend rejecting a control leaves the session unchanged.
    async fn update_session_runtime_options(
        &self,
        session_key: &str,
        patch: RuntimeOptions,
    ) -> RuntimeResult<RuntimeOptions> {
        let patch = Self::validate_patch(patch)?;
        self.require_meta(session_key)?;

        let lock = self.turn_lock(session_key);
        let _turn = lock.lock().await;
        let meta = self.require_meta(session_key)?;
        let merged = meta.runtime_options.merge(&patch);

        if merged.cwd != meta.runtime_options.cwd {
            self.drop_runtime(session_key, "working directory changed").await;
        } else if let Some((runtime, handle)) = self.cached(session_key) {
            self.apply_runtime_options(session_key, &runtime, &handle, &merged)
                .await?;
        }

        self.update_meta(session_key, |meta| {
            meta.runtime_options = merged.clone();
            meta.last_activity_at = Utc::now();
        });
        info!("Updated runtime options for {}", session_key);
        Ok(merged)
    }

    async fn set_session_config_option(
        &self,
        session_key: &str,
        key: &str,
        value: &str,
    ) -> RuntimeResult<RuntimeOptions> {
        let (key, value) = validate_config_option_input(key, value)?;
        let patch = RuntimeOptions::patch_from_config_option(&key, &value)?;
        self.update_session_runtime_options(session_key, patch).await
    }

    async fn reset_session_runtime_options(
        &self,
        session_key: &str,
    ) -> RuntimeResult<RuntimeOptions> {
        self.require_meta(session_key)?;
        let options = {
            let lock = self.turn_lock(session_key);
            let _turn = lock.lock().await;
            let meta = self.require_meta(session_key)?;

            // Backends can't unset options, so start a fresh runtime session.
            self.drop_runtime(session_key, "runtime options reset").await;
            let options = RuntimeOptions {
                cwd: meta.cwd.clone(),
                ..RuntimeOptions::default()
            };
            self.update_meta(session_key, |meta| {
                meta.runtime_options = options.clone();
                meta.last_activity_at = Utc::now();
            });
            options
        };
        self.release_turn_lock(session_key);
        info!("Reset runtime options for {}", session_key);
        Ok(options)
    }

    async fn cancel_session(&self, session_key: &str, reason: &str) -> RuntimeResult<()> {
        self.require_meta(session_key)?;
        if let Some((runtime, handle)) = self.cached(session_key) {
            runtime.cancel(&handle, Some(reason)).await?;
        }
        Ok(())
    }

    async fn close_session(&self, session_key: &str, reason: &str) -> RuntimeResult<()> {
        self.require_meta(session_key)?;
        let cached = self.runtimes.lock().remove(session_key);
        if let Some(cached) = cached {
            cached.runtime.close(&cached.handle, reason).await?;
        }
        self.update_meta(session_key, |meta| {
            meta.state = SessionRuntimeState::Idle;
            meta.last_activity_at = Utc::now();
        });
        self.release_turn_lock(session_key);
        info!("Closed ACP session {}: {}", session_key, reason);
        Ok(())
    }

    fn observability_snapshot(&self) -> ObservabilitySnapshot {
        let stats = self.stats.lock();
        let finished = stats.completed + stats.failed;
        ObservabilitySnapshot {
            turns: TurnCounters {
                queue_depth: self.queue_depth.load(Ordering::SeqCst),
                active: self.active_turns.load(Ordering::SeqCst),
                completed: stats.completed,
                failed: stats.failed,
                average_latency_ms: if finished == 0 {
                    0
                } else {
                    stats.total_latency_ms / finished
                },
            },
            runtime_cache: RuntimeCacheSnapshot {
                active_sessions: self.runtimes.lock().len(),
            },
        }
    }

    async fn doctor(&self, session_key: Option<&str>) -> Vec<(String, DoctorReport)> {
        let Some(meta) = session_key.and_then(|key| self.session_meta(key)) else {
            return self.registry.doctor_all().await;
        };
        let report = match self.registry.get(&meta.backend) {
            Some(runtime) => runtime.doctor().await.unwrap_or_else(|| {
                DoctorReport::ok(format!(
                    "ACP backend \"{}\" has no self-check",
                    meta.backend
                ))
            }),
            None => {
                let error = AcpRuntimeError::backend_missing(&meta.backend);
                DoctorReport::failed(error.code, error.message)
            }
        };
        vec![(meta.backend, report)]
    }
}
