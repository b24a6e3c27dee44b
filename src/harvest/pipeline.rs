//! Harvest session orchestrator.
//!
//! This module provides the [`HarvestOrchestrator`] coordinator that drives
//! time-boxed scan cycles (inventory → download → reconcile) with:
//! - Async execution via `tokio`, all waits routed through a [`Clock`]
//! - Reactive token renewal when a credential expires mid-cycle
//! - Two-cycle retry budget per artifact via [`Backlog`]
//! - Structured logging via `tracing`, inside a caller-supplied span

use std::collections::BTreeSet;
use tracing::{debug, info, warn, Instrument, Span};

use crate::harvest::backlog::Backlog;
use crate::harvest::gate::WallClockGate;
use crate::harvest::traits::{ArtifactStore, DataSource, HarvestError};
use crate::model::{HarvestState, ScanWindow};
use crate::timing::{Clock, SystemClock};

// ============================================================================
// Session Types
// ============================================================================

/// Statistics about a finished harvest session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HarvestStats {
    /// Completed (reconciled) scan cycles
    pub cycles: u64,

    /// Access-token renewals triggered by expiry
    pub renewals: u64,

    /// Artifacts fetched and confirmed stored
    pub downloaded: u64,

    /// Artifacts dropped after exhausting their retry cycle
    pub abandoned: u64,

    /// Wall-clock time from window start to session end (milliseconds)
    pub elapsed_ms: u64,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs one complete harvest session against a [`DataSource`].
///
/// # Example
///
/// ```ignore
/// let orchestrator = HarvestOrchestrator::new(source, FlatFileStore::new("./radar"))
///     .with_span(tracing::info_span!("harvest", source = "smn"))
///     .with_renewal_limit(5);
///
/// let stats = orchestrator.run(&ids, window).await?;
/// println!("Downloaded {} images", stats.downloaded);
/// ```
pub struct HarvestOrchestrator<S, A, C = SystemClock>
where
    S: DataSource,
    A: ArtifactStore,
    C: Clock + Clone,
{
    /// Provider of credentials, inventory and artifact bytes
    source: S,

    /// Local repository of downloaded artifacts
    store: A,

    /// Time source for the scan-cycle gate
    clock: C,

    /// Span every session runs in
    span: Span,

    /// Maximum consecutive renewals without a completed cycle
    renewal_limit: Option<u32>,
}

impl<S, A> HarvestOrchestrator<S, A, SystemClock>
where
    S: DataSource,
    A: ArtifactStore,
{
    /// Creates an orchestrator on the system clock.
    ///
    /// Default configuration:
    /// - Span: none (events go to the caller's current span)
    /// - Renewal limit: unbounded
    pub fn new(source: S, store: A) -> Self {
        Self {
            source,
            store,
            clock: SystemClock,
            span: Span::none(),
            renewal_limit: None,
        }
    }
}

impl<S, A, C> HarvestOrchestrator<S, A, C>
where
    S: DataSource,
    A: ArtifactStore,
    C: Clock + Clone,
{
    /// Replaces the time source.
    pub fn with_clock<K: Clock + Clone>(self, clock: K) -> HarvestOrchestrator<S, A, K> {
        HarvestOrchestrator {
            source: self.source,
            store: self.store,
            clock,
            span: self.span,
            renewal_limit: self.renewal_limit,
        }
    }

    /// Sets the logging span sessions run in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Fails the session after `limit` consecutive renewals that do not
    /// lead to a completed cycle.
    pub fn with_renewal_limit(mut self, limit: u32) -> Self {
        self.renewal_limit = Some(limit);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &A {
        &self.store
    }

    /// Runs a harvest session for `ids` over `window`.
    ///
    /// Suspends until the window opens, obtains credentials, then loops
    /// over scan cycles until the gate reports the window closed.
    ///
    /// # Errors
    ///
    /// - Failure to obtain the API key or first token (before any cycle)
    /// - A failed token renewal, or exceeding the renewal limit
    /// - Any collaborator error other than expiry or a per-artifact failure
    pub async fn run(
        &self,
        ids: &BTreeSet<String>,
        window: ScanWindow,
    ) -> Result<HarvestStats, HarvestError> {
        let span = self.span.clone();
        self.run_session(ids, window).instrument(span).await
    }

    async fn run_session(
        &self,
        ids: &BTreeSet<String>,
        window: ScanWindow,
    ) -> Result<HarvestStats, HarvestError> {
        let mut gate = WallClockGate::new(window, self.clock.clone());
        let mut state = HarvestState::AwaitingStart;

        info!(
            source = self.source.name(),
            start = %window.start(),
            end = %window.end(),
            period_secs = window.period().num_seconds(),
            ids = ids.len(),
            "Waiting for harvest window to open"
        );
        gate.start().await;

        let api_key = self.source.get_api_key().await?;
        let mut token = self.source.get_access_token(&api_key, false).await?;

        let mut backlog = Backlog::new();
        let mut stats = HarvestStats::default();
        let mut consecutive_renewals: u32 = 0;

        self.source.prepare().await?;

        while !gate.stop().await {
            match self
                .run_cycle(ids, &api_key, &token, &backlog, &mut stats, &mut state)
                .await
            {
                Ok(pending) => {
                    let abandoned = backlog.commit(pending);
                    for id in &abandoned {
                        debug!(artifact = %id, "Retry budget exhausted, abandoning artifact");
                    }
                    stats.abandoned += abandoned.len() as u64;
                    stats.cycles += 1;
                    consecutive_renewals = 0;

                    self.source.prepare_next_cycle().await?;

                    info!(
                        cycle = stats.cycles,
                        pending = backlog.pending().len(),
                        retry = backlog.retry().len(),
                        abandoned = abandoned.len(),
                        lapse_ms = gate.lapse().as_millis() as u64,
                        "Cycle completed"
                    );
                }
                Err(e) if e.is_authorization_expired() => {
                    warn!(error = %e, phase = ?state, "Access token expired, renewing");
                    state = HarvestState::Reauthorizing;

                    consecutive_renewals += 1;
                    if let Some(limit) = self.renewal_limit {
                        if consecutive_renewals > limit {
                            return Err(HarvestError::RenewalLimit(limit));
                        }
                    }

                    token = self.source.get_access_token(&api_key, true).await?;
                    stats.renewals += 1;
                    gate.rewind();
                }
                Err(e) => return Err(e),
            }
        }

        state = HarvestState::Finished;
        self.source.finalize().await?;

        stats.elapsed_ms = gate.elapsed().as_millis() as u64;
        info!(
            phase = ?state,
            cycles = stats.cycles,
            renewals = stats.renewals,
            downloaded = stats.downloaded,
            abandoned = stats.abandoned,
            "Harvest window closed"
        );

        Ok(stats)
    }

    /// Lists and downloads one cycle's worth of artifacts.
    ///
    /// Works on a copy of the pending set; the caller commits it only when
    /// the cycle completes, so an expiry leaves the backlog untouched.
    async fn run_cycle(
        &self,
        ids: &BTreeSet<String>,
        api_key: &str,
        token: &str,
        backlog: &Backlog,
        stats: &mut HarvestStats,
        state: &mut HarvestState,
    ) -> Result<BTreeSet<String>, HarvestError> {
        *state = HarvestState::FetchingInventory;
        let listed = self.source.list(ids, api_key, token).await?;
        debug!(listed = listed.len(), "Inventory fetched");

        let mut pending = backlog.pending().clone();
        pending.extend(listed);

        *state = HarvestState::Downloading;
        let candidates: Vec<String> = pending.iter().cloned().collect();

        for id in candidates {
            if self.store.exists(&id).await {
                debug!(artifact = %id, "Already stored");
                pending.remove(&id);
                continue;
            }

            if let Err(e) = self.store.validate_id(&id) {
                warn!(artifact = %id, error = %e, "Artifact cannot be stored, skipping download");
                continue;
            }

            let stream = match self.source.fetch(&id, api_key, token).await {
                Ok(stream) => stream,
                Err(e) if e.is_artifact_failure() => {
                    warn!(artifact = %id, error = %e, "Download failed, keeping artifact pending");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = self.store.persist(&id, stream).await {
                if !e.is_artifact_failure() {
                    return Err(e);
                }
                warn!(artifact = %id, error = %e, "Could not store artifact");
            }

            if self.store.exists(&id).await {
                debug!(artifact = %id, "Artifact stored");
                pending.remove(&id);
                stats.downloaded += 1;
            }
        }

        Ok(pending)
    }
}

// ============================================================================
// Tests
// ============================================================================
