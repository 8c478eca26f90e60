use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use strum_macros::Display;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::manager::ConnectionManager;
use super::state::ConnectionState;
use crate::error::InteractionError;
use crate::hw::{DeviceIdentity, ScanEvent, ScanFilter};

/// One way of reaching the target device.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
#[strum(serialize_all = "snake_case")]
enum Strategy {
    /// Connect to the cached address straight away.
    Direct,
    /// Let the radio stack scan for the address, then connect.
    ScanAssisted,
    /// Scan ourselves, match by address or name, then connect directly.
    Discovery,
}

const STRATEGIES: [Strategy; 3] = [Strategy::Direct, Strategy::ScanAssisted, Strategy::Discovery];

/// Whether a strategy reached the transport.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Attempt {
    Issued,
    Skipped,
}

impl ConnectionManager {
    /// Races the connect strategies until the link comes up, every strategy
    /// fails, or the cascade window closes.
    ///
    /// Strategies still running when the cascade ends are aborted, and a
    /// transport scan they left open is stopped.
    #[instrument(skip(self, token), level = "debug", fields(address = %identity.address()))]
    pub(super) async fn run_cascade(
        self: Arc<Self>,
        identity: DeviceIdentity,
        token: CancellationToken,
    ) {
        let open_scans = Arc::new(AtomicUsize::new(0));
        let mut strategies = JoinSet::new();
        for strategy in STRATEGIES {
            let manager = Arc::clone(&self);
            let identity = identity.clone();
            let token = token.clone();
            let open_scans = Arc::clone(&open_scans);
            strategies.spawn(async move {
                let outcome = manager
                    .run_strategy(strategy, &identity, &token, &open_scans)
                    .await;
                (strategy, outcome)
            });
        }

        let window = sleep(self.config.cascade_window);
        tokio::pin!(window);
        let mut issued = 0_usize;
        let mut pending = true;

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                () = &mut window => {
                    warn!(window = ?self.config.cascade_window, "connect cascade timed out");
                    break;
                }
                joined = strategies.join_next(), if pending => match joined {
                    Some(Ok((strategy, Ok(Attempt::Issued)))) => {
                        debug!(%strategy, "connect strategy issued");
                        issued += 1;
                    }
                    Some(Ok((strategy, Ok(Attempt::Skipped)))) => {
                        debug!(%strategy, "connect strategy skipped");
                    }
                    Some(Ok((strategy, Err(error)))) => {
                        debug!(%strategy, %error, "connect strategy failed");
                    }
                    Some(Err(error)) => {
                        warn!(%error, "connect strategy task ended abnormally");
                    }
                    None => {
                        pending = false;
                        if issued == 0 {
                            warn!("every connect strategy failed");
                            break;
                        }
                    }
                },
            }
        }

        strategies.shutdown().await;
        if open_scans.load(Ordering::Acquire) > 0 {
            debug!("stopping scan left open by an aborted strategy");
            self.stop_transport_scan().await;
        }
        if !token.is_cancelled()
            && self.transition_from(ConnectionState::Connecting, ConnectionState::Error)
        {
            token.cancel();
        }
    }

    async fn run_strategy(
        &self,
        strategy: Strategy,
        identity: &DeviceIdentity,
        token: &CancellationToken,
        open_scans: &AtomicUsize,
    ) -> Result<Attempt, InteractionError> {
        let delay = match strategy {
            Strategy::Direct => Duration::ZERO,
            Strategy::ScanAssisted => self.config.scan_assist_delay,
            Strategy::Discovery => self.config.discovery_delay,
        };
        if !delay.is_zero() {
            tokio::select! {
                () = token.cancelled() => return Ok(Attempt::Skipped),
                () = sleep(delay) => {}
            }
        }
        if token.is_cancelled() || self.transport.is_connected().await {
            return Ok(Attempt::Skipped);
        }

        debug!(%strategy, address = %identity.address(), "trying connect strategy");
        match strategy {
            Strategy::Direct => self.transport.connect_direct(identity.address()).await?,
            Strategy::ScanAssisted => {
                // The transport stops its own scan when the call returns.
                open_scans.fetch_add(1, Ordering::AcqRel);
                let connected = self.transport.connect_via_scan(identity.address()).await;
                open_scans.fetch_sub(1, Ordering::AcqRel);
                connected?;
            }
            Strategy::Discovery => {
                open_scans.fetch_add(1, Ordering::AcqRel);
                let found = self.discover(identity, token).await;
                self.stop_transport_scan().await;
                open_scans.fetch_sub(1, Ordering::AcqRel);
                return self.connect_discovered(identity, token, found?).await;
            }
        }
        Ok(Attempt::Issued)
    }

    async fn discover(
        &self,
        identity: &DeviceIdentity,
        token: &CancellationToken,
    ) -> Result<Option<DeviceIdentity>, InteractionError> {
        let filter = match &self.config.name_filter {
            Some(prefix) => ScanFilter::any().with_name_prefix(prefix.clone()),
            None => ScanFilter::any(),
        };
        let mut events = self.transport.scan(&filter).await?;
        let deadline = sleep(self.config.discovery_scan_duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = token.cancelled() => return Ok(None),
                () = &mut deadline => return Ok(None),
                event = events.recv() => match event {
                    Some(ScanEvent::Found(candidate)) if identity.matches(&candidate) => {
                        return Ok(Some(candidate));
                    }
                    Some(ScanEvent::Found(_)) => {}
                    Some(ScanEvent::Failed { code }) => {
                        return Err(InteractionError::ScanFailed { code });
                    }
                    None => return Ok(None),
                },
            }
        }
    }

    async fn connect_discovered(
        &self,
        identity: &DeviceIdentity,
        token: &CancellationToken,
        found: Option<DeviceIdentity>,
    ) -> Result<Attempt, InteractionError> {
        if token.is_cancelled() {
            return Ok(Attempt::Skipped);
        }
        let Some(found) = found else {
            return Err(InteractionError::DeviceNotFound {
                address: identity.address().to_string(),
            });
        };

        if !found.address().eq_ignore_ascii_case(identity.address()) {
            info!(
                cached = %identity.address(),
                resolved = %found.address(),
                "device advertised under a new address"
            );
            self.set_target(identity.with_address(found.address()));
        }
        self.transport.connect_direct(found.address()).await?;
        Ok(Attempt::Issued)
    }

    /// Retries direct connects with exponential backoff after an unexpected
    /// link loss, then falls back to the full cascade.
    #[instrument(skip(self, token), level = "debug")]
    pub(super) async fn silent_reconnect(self: Arc<Self>, token: CancellationToken) {
        let Some(target) = self.target() else {
            warn!("link lost with no known target");
            return;
        };

        let attempts = self.config.silent_reconnect_attempts;
        for attempt in 1..=attempts {
            tokio::select! {
                () = token.cancelled() => return,
                () = sleep(self.config.backoff_for(attempt)) => {}
            }
            if self.state() != ConnectionState::Reconnecting {
                return;
            }
            debug!(attempt, address = %target.address(), "silent reconnect attempt");
            if let Err(error) = self.transport.connect_direct(target.address()).await {
                debug!(attempt, %error, "silent reconnect attempt failed");
            }
        }

        tokio::select! {
            () = token.cancelled() => return,
            () = sleep(self.config.backoff_for(attempts.saturating_add(1))) => {}
        }
        if !self.transition_from(ConnectionState::Reconnecting, ConnectionState::Connecting) {
            return;
        }

        info!(attempts, "silent reconnect exhausted; running full connect cascade");
        let token = self.begin_attempt();
        let target = self.target().unwrap_or(target);
        self.run_cascade(target, token).await;
    }

    async fn stop_transport_scan(&self) {
        if let Err(error) = self.transport.stop_scan().await {
            debug!(%error, "failed to stop discovery scan");
        }
    }
}
