// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory guardian: periodic sampling, cleanup, and the designed crash.
//!
//! Samples process memory on a fixed interval, independent of connection
//! state. Against the configured budget, three thresholds apply: soft
//! triggers best-effort cleanup (drop the media cache, purge allocator
//! pages), hard triggers the same cleanup with a warning, and critical
//! exits the process with a distinct status so a supervising process
//! manager restarts it. The critical exit is deliberate and logged as
//! such -- it must never be mistaken for an unexpected crash.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parley_config::model::MemoryConfig;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::media_cache::MediaCache;

/// Exit status for the deliberate memory-critical restart.
pub const MEMORY_CRITICAL_EXIT_CODE: i32 = 12;

const SOFT_RATIO: f64 = 0.65;
const HARD_RATIO: f64 = 0.90;
const CRITICAL_RATIO: f64 = 1.20;

/// Probability of running cleanup opportunistically after a send or an
/// inbound message, spreading cleanup cost instead of concentrating it
/// in the sampler.
const OPPORTUNISTIC_CLEANUP_PROBABILITY: f64 = 0.07;

/// One memory reading. Ephemeral; never persisted.
#[derive(Debug, Clone)]
pub struct MemorySample {
    /// Allocator-reported live allocations.
    pub heap_used_mb: u64,
    /// Allocator-reported resident heap.
    pub heap_total_mb: u64,
    /// Process resident set size.
    pub rss_mb: u64,
    pub sampled_at: DateTime<Utc>,
}

impl Default for MemorySample {
    fn default() -> Self {
        Self {
            heap_used_mb: 0,
            heap_total_mb: 0,
            rss_mb: 0,
            sampled_at: Utc::now(),
        }
    }
}

/// Pressure classification of a sample relative to the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLevel {
    Normal,
    Soft,
    Hard,
    Critical,
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PressureLevel::Normal => write!(f, "normal"),
            PressureLevel::Soft => write!(f, "soft"),
            PressureLevel::Hard => write!(f, "hard"),
            PressureLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Periodic memory sampler and cleanup driver.
pub struct MemoryGuardian {
    budget_mb: u64,
    sample_interval: Duration,
    cache: Arc<MediaCache>,
    sample_tx: watch::Sender<MemorySample>,
    system: Mutex<System>,
    pid: Pid,
}

impl MemoryGuardian {
    pub fn new(config: &MemoryConfig, cache: Arc<MediaCache>) -> Self {
        let (sample_tx, _) = watch::channel(MemorySample::default());
        Self {
            budget_mb: config.budget_mb,
            sample_interval: Duration::from_millis(config.sample_interval_ms),
            cache,
            sample_tx,
            system: Mutex::new(System::new()),
            pid: Pid::from_u32(std::process::id()),
        }
    }

    /// Receiver for the latest sample (health endpoint).
    pub fn sample_receiver(&self) -> watch::Receiver<MemorySample> {
        self.sample_tx.subscribe()
    }

    /// Takes one O(1) memory reading and publishes it.
    pub async fn sample(&self) -> MemorySample {
        let rss_mb = {
            let mut system = self.system.lock().await;
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[self.pid]),
                true,
                ProcessRefreshKind::nothing().with_memory(),
            );
            system
                .process(self.pid)
                .map(|p| p.memory() / (1024 * 1024))
                .unwrap_or(0)
        };

        let (heap_used_mb, heap_total_mb) = allocator_stats_mb();

        let sample = MemorySample {
            heap_used_mb,
            heap_total_mb,
            rss_mb,
            sampled_at: Utc::now(),
        };
        self.sample_tx.send_replace(sample.clone());
        sample
    }

    /// Classifies a sample against the budget.
    pub fn classify(&self, sample: &MemorySample) -> PressureLevel {
        Self::classify_rss(self.budget_mb, sample.rss_mb)
    }

    /// Pure threshold check: soft at 65% of budget, hard at 90%,
    /// critical at 120%.
    pub fn classify_rss(budget_mb: u64, rss_mb: u64) -> PressureLevel {
        if budget_mb == 0 {
            return PressureLevel::Normal;
        }
        let ratio = rss_mb as f64 / budget_mb as f64;
        if ratio >= CRITICAL_RATIO {
            PressureLevel::Critical
        } else if ratio >= HARD_RATIO {
            PressureLevel::Hard
        } else if ratio >= SOFT_RATIO {
            PressureLevel::Soft
        } else {
            PressureLevel::Normal
        }
    }

    /// One sampler tick: sample, classify, act.
    pub async fn tick(&self) {
        let sample = self.sample().await;
        let level = self.classify(&sample);

        match level {
            PressureLevel::Normal => {
                debug!(
                    rss_mb = sample.rss_mb,
                    heap_used_mb = sample.heap_used_mb,
                    "memory sample normal"
                );
            }
            PressureLevel::Soft => {
                debug!(
                    rss_mb = sample.rss_mb,
                    budget_mb = self.budget_mb,
                    "soft memory threshold crossed, running cleanup"
                );
                self.cleanup().await;
            }
            PressureLevel::Hard => {
                warn!(
                    rss_mb = sample.rss_mb,
                    budget_mb = self.budget_mb,
                    "hard memory threshold crossed, running aggressive cleanup"
                );
                self.cleanup().await;
            }
            PressureLevel::Critical => {
                error!(
                    rss_mb = sample.rss_mb,
                    budget_mb = self.budget_mb,
                    exit_code = MEMORY_CRITICAL_EXIT_CODE,
                    "memory budget critically exceeded -- deliberate exit for supervisor restart"
                );
                std::process::exit(MEMORY_CRITICAL_EXIT_CODE);
            }
        }
    }

    /// Runs the sampler until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.sample_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            budget_mb = self.budget_mb,
            interval_ms = self.sample_interval.as_millis() as u64,
            "memory guardian started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }

        info!("memory guardian stopped");
    }

    /// Best-effort cleanup: drop the media cache and return freed pages to
    /// the OS where the allocator supports it.
    pub async fn cleanup(&self) {
        let evicted = self.cache.clear().await;
        purge_allocator();
        debug!(evicted_media_entries = evicted, "memory cleanup performed");
    }

    /// Runs cleanup with a small fixed probability. Called after each
    /// outbound send and each inbound message.
    pub async fn maybe_opportunistic_cleanup(&self) {
        if rand::random::<f64>() < OPPORTUNISTIC_CLEANUP_PROBABILITY {
            debug!("opportunistic cleanup triggered");
            self.cleanup().await;
        }
    }
}

#[cfg(not(target_env = "msvc"))]
fn allocator_stats_mb() -> (u64, u64) {
    use tikv_jemalloc_ctl::{epoch, stats};

    if epoch::advance().is_err() {
        return (0, 0);
    }
    let used = stats::allocated::read().unwrap_or(0) as u64 / (1024 * 1024);
    let total = stats::resident::read().unwrap_or(0) as u64 / (1024 * 1024);
    (used, total)
}

#[cfg(target_env = "msvc")]
fn allocator_stats_mb() -> (u64, u64) {
    (0, 0)
}

#[cfg(not(target_env = "msvc"))]
fn purge_allocator() {
    // Advancing the epoch refreshes jemalloc's internal stats and lets decay
    // return dirty pages sooner.
    let _ = tikv_jemalloc_ctl::epoch::advance();
}

#[cfg(target_env = "msvc")]
fn purge_allocator() {}
