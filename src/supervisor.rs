use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bon::Builder;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::handlers::SyncHandler;
use crate::hw::DeviceIdentity;
use crate::link::{ConnectionManager, ConnectionState, StateStream};
use crate::store::{DeviceStore, SavedDeviceRecord};
use crate::utils::now_epoch_ms;

/// Periods and windows used by [`ReconnectSupervisor`].
#[derive(Debug, Clone, Builder)]
pub struct SupervisorConfig {
    #[builder(default = Duration::from_secs(5))]
    pub health_check_interval: Duration,
    #[builder(default = Duration::from_secs(10))]
    pub reconnect_interval: Duration,
    /// How recent the last success must be for auto-connect on start.
    #[builder(default = Duration::from_secs(24 * 60 * 60))]
    pub recency_window: Duration,
    /// Response timeout for the battery-read keepalive.
    #[builder(default = Duration::from_secs(3))]
    pub keepalive_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Foreground-visible summary of the supervised link.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct SupervisorStatus {
    pub running: bool,
    pub state: ConnectionState,
    pub device_name: Option<String>,
    pub battery_level: Option<u8>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_health_check: Option<OffsetDateTime>,
    pub health_checks_paused: bool,
}

/// Keeps the process alive while the supervisor runs and shows its status.
///
/// Stands in for a platform foreground service.
pub trait KeepAlive: Send + Sync + std::fmt::Debug {
    fn acquire(&self);

    fn update(&self, status: &SupervisorStatus);

    fn release(&self);
}

/// Reports keep-alive lifecycle and status through `tracing`.
#[derive(Debug, Default)]
pub struct TracingKeepAlive;

impl KeepAlive for TracingKeepAlive {
    fn acquire(&self) {
        info!("link supervision started");
    }

    fn update(&self, status: &SupervisorStatus) {
        debug!(
            state = %status.state,
            device = status.device_name.as_deref().unwrap_or("-"),
            battery = ?status.battery_level,
            paused = status.health_checks_paused,
            "link status"
        );
    }

    fn release(&self) {
        info!("link supervision stopped");
    }
}

#[derive(Debug)]
struct Running {
    token: CancellationToken,
    tasks: JoinSet<()>,
}

/// Long-lived task set that keeps the link healthy and reconnects it.
///
/// Failures are logged and swallowed; callers only see state and status.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    manager: Arc<ConnectionManager>,
    sync: SyncHandler,
    store: Arc<dyn DeviceStore>,
    keep_alive: Arc<dyn KeepAlive>,
    config: SupervisorConfig,
    status: watch::Sender<SupervisorStatus>,
    paused: AtomicBool,
    running: Mutex<Option<Running>>,
}

impl ReconnectSupervisor {
    #[must_use]
    pub fn new(
        manager: Arc<ConnectionManager>,
        sync: SyncHandler,
        store: Arc<dyn DeviceStore>,
        keep_alive: Arc<dyn KeepAlive>,
        config: SupervisorConfig,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(SupervisorStatus::default());
        Arc::new(Self {
            manager,
            sync,
            store,
            keep_alive,
            config,
            status,
            paused: AtomicBool::new(false),
            running: Mutex::new(None),
        })
    }

    /// Starts the health loop, the reconnect loop and the state observer,
    /// then auto-connects to a recently used device.
    ///
    /// Starting a running supervisor does nothing.
    #[instrument(skip(self), level = "info")]
    pub async fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("supervisor already running");
            return;
        }

        self.keep_alive.acquire();
        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let states = self.manager.observe_state();
        tasks.spawn(Arc::clone(self).observe_states(states, token.clone()));
        tasks.spawn(Arc::clone(self).health_loop(token.clone()));
        tasks.spawn(Arc::clone(self).reconnect_loop(token.clone()));
        *running = Some(Running { token, tasks });
        drop(running);

        self.publish(|status| status.running = true);
        self.auto_connect().await;
    }

    /// Remembers `identity` with auto-connect enabled and connects to it,
    /// starting the supervisor if needed.
    #[instrument(skip(self), level = "info", fields(address = %identity.address()))]
    pub async fn request_connection(self: &Arc<Self>, identity: DeviceIdentity) {
        let record = match self.store.load() {
            Ok(Some(mut record)) if record.address.eq_ignore_ascii_case(identity.address()) => {
                record.name = identity.name().to_string();
                record.auto_connect_enabled = true;
                record
            }
            Ok(_) => SavedDeviceRecord::requested(&identity),
            Err(error) => {
                warn!(%error, "could not read the saved device; replacing it");
                SavedDeviceRecord::requested(&identity)
            }
        };
        if let Err(error) = self.store.save(&record) {
            warn!(%error, "could not save the requested device");
        }

        self.start().await;
        if let Err(error) = self.manager.connect(identity).await {
            warn!(%error, "connection request failed");
        }
    }

    /// Stops every supervisor task, disconnects and releases the keep-alive.
    #[instrument(skip(self), level = "info")]
    pub async fn stop(&self) {
        let Some(mut running) = self.running.lock().await.take() else {
            return;
        };
        running.token.cancel();
        while let Some(joined) = running.tasks.join_next().await {
            if let Err(error) = joined {
                warn!(%error, "supervisor task ended abnormally");
            }
        }

        self.manager.disconnect().await;
        self.publish(|status| {
            status.running = false;
            status.state = ConnectionState::Disconnected;
        });
        self.keep_alive.release();
    }

    /// Suspends the battery-read keepalive. Link checks continue.
    pub fn pause_health_checks(&self) {
        self.paused.store(true, Ordering::Release);
        self.publish(|status| status.health_checks_paused = true);
    }

    pub fn resume_health_checks(&self) {
        self.paused.store(false, Ordering::Release);
        self.publish(|status| status.health_checks_paused = false);
    }

    /// Subscribes to status updates.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.subscribe()
    }

    /// Returns whether the supervisor tasks are running.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    async fn auto_connect(self: &Arc<Self>) {
        let record = match self.store.load() {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("no saved device; waiting for a connection request");
                return;
            }
            Err(error) => {
                warn!(%error, "could not read the saved device");
                return;
            }
        };

        if !record.should_auto_connect(now_epoch_ms(), self.config.recency_window) {
            info!(address = %record.address, "saved device is stale or opted out; not reconnecting");
            return;
        }
        info!(address = %record.address, "reconnecting to saved device");
        if let Err(error) = self.manager.connect(record.identity()).await {
            warn!(%error, "auto-connect failed");
        }
    }

    async fn observe_states(self: Arc<Self>, mut states: StateStream, token: CancellationToken) {
        loop {
            let state = tokio::select! {
                () = token.cancelled() => break,
                state = states.next() => state,
            };
            let Some(state) = state else {
                break;
            };

            match state {
                ConnectionState::Connected => self.remember_success(),
                ConnectionState::Error => self.remember_failure(),
                _ => {}
            }
            let device_name = self.manager.target().map(|target| target.name().to_string());
            self.publish(|status| {
                status.state = state;
                status.device_name = device_name;
            });
        }
    }

    async fn health_loop(self: Arc<Self>, token: CancellationToken) {
        let period = self.config.health_check_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => self.check_health().await,
            }
        }
    }

    async fn check_health(&self) {
        let mut battery_level = None;
        if self.manager.state() == ConnectionState::Connected {
            if !self.manager.link_alive().await {
                warn!("transport reports no link while connected");
                self.manager.report_link_lost();
            } else if self.paused.load(Ordering::Acquire) {
                trace!("health checks paused; skipping keepalive");
            } else {
                match self
                    .sync
                    .read_battery_within(self.config.keepalive_timeout)
                    .await
                {
                    Ok(level) => battery_level = Some(level),
                    Err(error) => debug!(%error, "keepalive read failed"),
                }
            }
        }

        let state = self.manager.state();
        let checked_at = OffsetDateTime::now_utc();
        self.publish(|status| {
            status.state = state;
            status.last_health_check = Some(checked_at);
            if battery_level.is_some() {
                status.battery_level = battery_level;
            }
        });
    }

    async fn reconnect_loop(self: Arc<Self>, token: CancellationToken) {
        let period = self.config.reconnect_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => self.reconnect_if_needed().await,
            }
        }
    }

    async fn reconnect_if_needed(self: &Arc<Self>) {
        let state = self.manager.state();
        if !self.manager.wants_connection()
            || state == ConnectionState::Connected
            || state.is_establishing()
        {
            return;
        }

        let identity = self.manager.target().or_else(|| match self.store.load() {
            Ok(record) => record.map(|record| record.identity()),
            Err(error) => {
                warn!(%error, "could not read the saved device");
                None
            }
        });
        let Some(identity) = identity else {
            debug!("nothing to reconnect to");
            return;
        };

        info!(address = %identity.address(), %state, "retrying connection");
        if let Err(error) = self.manager.connect(identity).await {
            warn!(%error, "reconnect attempt failed");
        }
    }

    fn remember_success(&self) {
        let Some(target) = self.manager.target() else {
            return;
        };
        let now = now_epoch_ms();
        let record = match self.store.load() {
            Ok(Some(mut record)) if record.address.eq_ignore_ascii_case(target.address()) => {
                record.record_success(&target, now);
                record
            }
            Ok(_) => SavedDeviceRecord::connected(&target, now),
            Err(error) => {
                debug!(%error, "replacing unreadable device record");
                SavedDeviceRecord::connected(&target, now)
            }
        };
        if let Err(error) = self.store.save(&record) {
            warn!(%error, "could not save the connected device");
        }
    }

    fn remember_failure(&self) {
        let Some(target) = self.manager.target() else {
            return;
        };
        let mut record = match self.store.load() {
            Ok(Some(record)) if record.address.eq_ignore_ascii_case(target.address()) => record,
            Ok(_) => SavedDeviceRecord::requested(&target),
            Err(error) => {
                warn!(%error, "could not read the saved device");
                return;
            }
        };
        record.record_failure();
        if let Err(error) = self.store.save(&record) {
            warn!(%error, "could not save the failed attempt");
        }
    }

    fn publish<F>(&self, modify: F)
    where
        F: FnOnce(&mut SupervisorStatus),
    {
        self.status.send_modify(modify);
        let snapshot = self.status.borrow().clone();
        self.keep_alive.update(&snapshot);
    }
}
