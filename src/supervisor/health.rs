use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::Supervisor;
use crate::{
    common::{
        errors::{ErrorKind, RadioError},
        types::now_ms,
    },
    protocol::BotEvent,
    session::RepairOutcome,
};

/// Process-wide liveness record.
#[derive(Debug)]
pub struct HealthRecord {
    last_heartbeat: AtomicU64,
    reconnect_attempts: AtomicU32,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            last_heartbeat: AtomicU64::new(now_ms()),
            reconnect_attempts: AtomicU32::new(0),
        }
    }
}

impl HealthRecord {
    pub fn beat(&self) {
        self.last_heartbeat.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_heartbeat(&self) -> u64 {
        self.last_heartbeat.load(Ordering::Relaxed)
    }

    pub fn staleness_ms(&self) -> u64 {
        now_ms().saturating_sub(self.last_heartbeat())
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Counts one failed scan, however many sessions failed in it.
    fn record_failed_scan(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn reset_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }
}

impl Supervisor {
    pub(crate) fn spawn_health(self: &Arc<Self>) {
        let health = &self.ctx.config.health;
        let heartbeat_every = Duration::from_millis(health.heartbeat_interval_ms);
        let scan_every = Duration::from_millis(health.deep_scan_interval_ms);

        let sup = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = sup.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if sup.ctx.gateway().is_some_and(|g| g.is_responsive()) {
                    sup.health.beat();
                } else {
                    debug!("Heartbeat skipped, gateway is not responsive");
                }
            }
        });

        let sup = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + scan_every,
                scan_every,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = sup.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = sup.scan_now.notified() => {}
                }
                sup.deep_scan().await;
            }
        });
    }

    /// Audits the gateway and every session. A stale or lost gateway triggers
    /// a full restart; otherwise dead transports are reconnected one session
    /// at a time, in parallel.
    pub async fn deep_scan(self: &Arc<Self>) {
        let threshold = self.ctx.config.health.stale_threshold_ms;
        let stale_ms = self.health.staleness_ms();
        if stale_ms > threshold {
            self.full_restart(RadioError::GatewayUnresponsive { stale_ms })
                .await;
            return;
        }
        if !self.ctx.gateway().is_some_and(|g| g.is_connected()) {
            self.full_restart(RadioError::Gateway("gateway connection lost".into()))
                .await;
            return;
        }

        let sessions = self.registry.all();
        let outcomes = join_all(sessions.iter().map(|s| s.repair())).await;

        let mut failures = 0;
        let mut repaired = 0;
        for (session, outcome) in sessions.iter().zip(outcomes) {
            match outcome {
                RepairOutcome::Repaired => repaired += 1,
                RepairOutcome::Failed(err) if err.kind() == ErrorKind::ChannelUnavailable => {
                    warn!("[{}] Voice channel is gone, dropping session", session.guild_id());
                    if self.registry.remove_if_same(session.guild_id(), session) {
                        session.teardown().await;
                    }
                }
                RepairOutcome::Failed(_) => failures += 1,
                RepairOutcome::Healthy | RepairOutcome::Busy | RepairOutcome::Deferred => {}
            }
        }
        debug!(
            "Deep scan: {} sessions, {} repaired, {} failed",
            sessions.len(),
            repaired,
            failures
        );

        if failures > 0 {
            let attempts = self.health.record_failed_scan();
            let max = self.ctx.config.health.max_reconnect_attempts;
            if attempts > max {
                self.full_restart(RadioError::Gateway(format!(
                    "{} scans in a row with failed reconnects",
                    attempts
                )))
                .await;
            }
        } else if repaired > 0 {
            self.health.reset_attempts();
        }
    }

    /// Tears everything down and rebuilds it from a fresh gateway connection.
    /// Concurrent calls collapse into the one already running.
    pub async fn full_restart(self: &Arc<Self>, reason: RadioError) {
        let Ok(_guard) = self.restart_lock.try_lock() else {
            debug!("Restart already in progress");
            return;
        };
        if self.shutdown.is_cancelled() {
            return;
        }
        warn!("Full restart: {}", reason);

        self.teardown_all().await;
        self.connection.lock().cancel();
        if let Some(gateway) = self.ctx.replace_gateway(None) {
            gateway.close().await;
        }
        self.ctx.bus.publish(BotEvent::BotStatus { is_online: false });

        if !self.pause_for(self.ctx.config.health.restart_cooldown_ms).await {
            return;
        }
        match self.connect_gateway().await {
            Ok(()) => {
                self.health.reset_attempts();
                info!("Gateway rebuilt after full restart");
            }
            Err(err) => error!("Gateway reconnect failed, retrying on next scan: {}", err),
        }
    }
}
