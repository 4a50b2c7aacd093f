// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Serialized, coalescing application of tunnel documents to the edge.
//!
//! The remote ingress configuration only supports whole-document replacement and
//! offers no transactions, so all writes to one tunnel go through a per-tunnel
//! slot:
//!
//! - at most one apply runs per tunnel id at any time
//! - a caller arriving while an apply is in flight stores its document in the
//!   slot's single pending run and waits; later arrivals overwrite that document
//!   and join the same wait, so a burst of callers costs exactly one follow-up apply
//! - when a run finishes, the pending run is handed to one of its waiters, which
//!   drives it and reports the outcome to the others, so no caller performs more
//!   than one apply however long the stream of updates lasts
//!
//! Each apply fetches the remote document first and only replaces it when it
//! differs semantically. Transient failures are retried in place, bounded by the
//! engine's [`RetryPolicy`]; everything else is surfaced immediately.
//!
//! If the future driving an apply is dropped (leadership lost, shutdown), the
//! slot is released and queued waiters receive a transient error. The remote
//! replace is a single request, so the tunnel keeps either the old or the new
//! document.

use crate::cloudflare::TunnelConfigApi;
use crate::errors::ControllerError;
use crate::ingress::TunnelDocument;
use crate::metrics::{
    record_ingress_rules, record_sync, record_sync_error, SYNC_OUTCOME_APPLIED,
    SYNC_OUTCOME_ERROR, SYNC_OUTCOME_UNCHANGED,
};
use crate::reconcilers::retry::{retry_transient, RetryPolicy};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Result of a successful apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The remote document was replaced.
    Applied { rules: usize },
    /// The remote document already matched.
    Unchanged,
}

/// What a queued caller is woken with.
enum Turn {
    /// The run carrying the caller's document finished.
    Done(Result<ApplyOutcome, ControllerError>),
    /// The caller now drives the pending run.
    Drive(PendingRun),
}

type Waiter = oneshot::Sender<Turn>;

struct PendingRun {
    document: TunnelDocument,
    api: Arc<dyn TunnelConfigApi>,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
struct SlotState {
    in_flight: bool,
    pending: Option<PendingRun>,
}

#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases a slot whose driving future was dropped mid-apply.
struct FlightGuard {
    slot: Arc<Slot>,
    armed: bool,
}

impl FlightGuard {
    /// Pass the slot to the first listening waiter of the pending run, or free it.
    fn hand_off(mut self, tunnel_id: &str) {
        self.armed = false;
        let mut state = self.slot.lock();
        let Some(mut run) = state.pending.take() else {
            state.in_flight = false;
            return;
        };
        while !run.waiters.is_empty() {
            let next = run.waiters.remove(0);
            match next.send(Turn::Drive(run)) {
                Err(Turn::Drive(returned)) => run = returned,
                Ok(()) | Err(Turn::Done(_)) => return,
            }
        }
        debug!(tunnel_id = %tunnel_id, "Every queued caller went away, dropping pending run");
        state.in_flight = false;
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.slot.lock();
        state.in_flight = false;
        // Dropping the senders wakes every waiter with an interrupted error
        if let Some(pending) = state.pending.take() {
            warn!(
                waiters = pending.waiters.len(),
                "Tunnel apply interrupted, releasing queued callers"
            );
        }
    }
}

/// Per-tunnel serialized apply of [`TunnelDocument`]s.
pub struct SyncEngine {
    policy: RetryPolicy,
    call_timeout: Duration,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            policy,
            call_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, tunnel_id: &str) -> Arc<Slot> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tunnel_id.to_string())
            .or_default()
            .clone()
    }

    /// Apply `document` to `tunnel_id` through `api`.
    ///
    /// Returns once a run carrying this document, or a newer one submitted while
    /// waiting, has completed.
    /// A queued caller may be woken to drive that run itself.
    ///
    /// # Errors
    ///
    /// Returns the classified error of the run that carried the document.
    /// [`ControllerError::Transient`] is only returned after the retry policy is
    /// exhausted, or when the in-flight run was interrupted.
    pub async fn apply(
        &self,
        tunnel_id: &str,
        document: TunnelDocument,
        api: Arc<dyn TunnelConfigApi>,
    ) -> Result<ApplyOutcome, ControllerError> {
        let slot = self.slot(tunnel_id);

        let own_run = {
            let mut state = slot.lock();
            if state.in_flight {
                let (sender, receiver) = oneshot::channel();
                match state.pending.as_mut() {
                    Some(pending) => {
                        pending.document = document;
                        pending.api = api;
                        pending.waiters.push(sender);
                    }
                    None => {
                        state.pending = Some(PendingRun {
                            document,
                            api,
                            waiters: vec![sender],
                        });
                    }
                }
                Err(receiver)
            } else {
                state.in_flight = true;
                Ok(PendingRun {
                    document,
                    api,
                    waiters: Vec::new(),
                })
            }
        };

        let run = match own_run {
            Ok(run) => run,
            Err(receiver) => {
                debug!(tunnel_id = %tunnel_id, "Apply in flight, coalescing into pending run");
                match receiver.await {
                    Ok(Turn::Done(result)) => return result,
                    Ok(Turn::Drive(run)) => run,
                    Err(_) => {
                        return Err(ControllerError::Transient(format!(
                            "apply to tunnel {tunnel_id} was interrupted"
                        )))
                    }
                }
            }
        };

        self.drive(tunnel_id, slot, run).await
    }

    /// Run `run` while holding the slot, report to its waiters, then hand off.
    async fn drive(
        &self,
        tunnel_id: &str,
        slot: Arc<Slot>,
        run: PendingRun,
    ) -> Result<ApplyOutcome, ControllerError> {
        let guard = FlightGuard { slot, armed: true };

        if !run.waiters.is_empty() {
            debug!(
                tunnel_id = %tunnel_id,
                waiters = run.waiters.len(),
                "Running coalesced follow-up apply"
            );
        }
        let result = self
            .apply_once(tunnel_id, &run.document, run.api.as_ref())
            .await;
        for waiter in run.waiters {
            // A waiter whose reconcile was cancelled no longer listens
            let _ = waiter.send(Turn::Done(result.clone()));
        }

        guard.hand_off(tunnel_id);
        result
    }

    /// Number of callers waiting on the pending run of `tunnel_id`.
    #[must_use]
    pub fn queued(&self, tunnel_id: &str) -> usize {
        self.slot(tunnel_id)
            .lock()
            .pending
            .as_ref()
            .map_or(0, |p| p.waiters.len())
    }

    async fn apply_once(
        &self,
        tunnel_id: &str,
        document: &TunnelDocument,
        api: &dyn TunnelConfigApi,
    ) -> Result<ApplyOutcome, ControllerError> {
        let start = Instant::now();
        let result = self.fetch_compare_replace(tunnel_id, document, api).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(ApplyOutcome::Applied { rules }) => {
                info!(
                    tunnel_id = %tunnel_id,
                    rules = rules,
                    elapsed = ?elapsed,
                    "Applied tunnel ingress configuration"
                );
                record_sync(tunnel_id, SYNC_OUTCOME_APPLIED, elapsed);
                record_ingress_rules(tunnel_id, *rules);
            }
            Ok(ApplyOutcome::Unchanged) => {
                debug!(tunnel_id = %tunnel_id, "Tunnel ingress configuration already up to date");
                record_sync(tunnel_id, SYNC_OUTCOME_UNCHANGED, elapsed);
                record_ingress_rules(tunnel_id, document.rule_count());
            }
            Err(e) => {
                warn!(
                    tunnel_id = %tunnel_id,
                    error = %e,
                    class = e.category(),
                    "Failed to apply tunnel ingress configuration"
                );
                record_sync(tunnel_id, SYNC_OUTCOME_ERROR, elapsed);
                record_sync_error(e.category());
            }
        }
        result
    }

    async fn fetch_compare_replace(
        &self,
        tunnel_id: &str,
        document: &TunnelDocument,
        api: &dyn TunnelConfigApi,
    ) -> Result<ApplyOutcome, ControllerError> {
        let remote = retry_transient(
            &self.policy,
            "fetch tunnel configuration",
            self.call_timeout,
            move || api.get_configuration(tunnel_id),
        )
        .await?;

        if document.matches_remote(&remote) {
            return Ok(ApplyOutcome::Unchanged);
        }

        let ingress = document.ingress();
        retry_transient(
            &self.policy,
            "replace tunnel configuration",
            self.call_timeout,
            move || api.put_configuration(tunnel_id, ingress),
        )
        .await?;

        Ok(ApplyOutcome::Applied {
            rules: document.rule_count(),
        })
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod sync_tests;
