//! Suspend-aware update application for one logical client.
//!
//! Every sent update gets the next id and sits on a FIFO until its replies
//! are collected. While the process is suspended in a debugger nothing can
//! answer, so the call returns optimistically and leaves the id queued.
//! The next non-suspended call confirms the queue front to back before it
//! transmits anything new.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::ClientError;
use super::fanout::TargetSet;
use super::protocol::{ManagedCodeUpdateRequest, Reply, StaticAssetUpdateRequest};
use crate::core::{ApplyStatus, ManagedCodeUpdate, StaticAssetUpdate, aggregate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingUpdate {
    update_id: u64,
    fully_applicable: bool,
}

#[derive(Debug, Default)]
struct ApplyState {
    next_update_id: u64,
    pending: VecDeque<PendingUpdate>,
}

pub struct DeltaApplier {
    /// Log prefix ("agent" / "browser")
    module: &'static str,
    targets: Arc<TargetSet>,
    shared_secret: String,
    state: Mutex<ApplyState>,
}

impl DeltaApplier {
    pub fn new(module: &'static str, targets: Arc<TargetSet>, shared_secret: String) -> Self {
        Self {
            module,
            targets,
            shared_secret,
            state: Mutex::new(ApplyState::default()),
        }
    }

    pub fn targets(&self) -> &Arc<TargetSet> {
        &self.targets
    }

    pub fn shared_secret(&self) -> &str {
        &self.shared_secret
    }

    /// Ids sent but not yet confirmed, oldest first.
    pub async fn pending_ids(&self) -> Vec<u64> {
        self.state
            .lock()
            .await
            .pending
            .iter()
            .map(|p| p.update_id)
            .collect()
    }

    pub async fn apply_managed(
        &self,
        updates: &[ManagedCodeUpdate],
        capabilities: &[String],
        is_process_suspended: bool,
        cancel: &CancellationToken,
    ) -> Result<ApplyStatus, ClientError> {
        let mut applicable = Vec::with_capacity(updates.len());
        for update in updates {
            let missing = update.missing_capabilities(capabilities);
            if missing.is_empty() {
                applicable.push(update);
            } else {
                crate::log!(self.module; "skipping update for module {}: runtime lacks {}", update.module_id, missing.join(", "));
            }
        }

        if applicable.is_empty() {
            crate::debug!(self.module; "no updates applicable to this process");
            return Ok(ApplyStatus::NoChangesApplied);
        }

        let fully_applicable = applicable.len() == updates.len();
        let secret = self.shared_secret.as_str();
        self.apply(fully_applicable, is_process_suspended, cancel, |id| {
            serde_json::to_string(&ManagedCodeUpdateRequest::new(secret, id, &applicable))
        })
        .await
    }

    pub async fn apply_assets(
        &self,
        assets: &[StaticAssetUpdate],
        is_process_suspended: bool,
        cancel: &CancellationToken,
    ) -> Result<ApplyStatus, ClientError> {
        if assets.is_empty() {
            return Ok(ApplyStatus::NoChangesApplied);
        }

        for asset in assets {
            crate::debug!(self.module; "sending static asset '{}'", asset.asset_path);
        }

        let secret = self.shared_secret.as_str();
        self.apply(true, is_process_suspended, cancel, |id| {
            serde_json::to_string(&StaticAssetUpdateRequest::new(secret, id, assets))
        })
        .await
    }

    async fn apply(
        &self,
        fully_applicable: bool,
        is_process_suspended: bool,
        cancel: &CancellationToken,
        encode: impl FnOnce(u64) -> serde_json::Result<String>,
    ) -> Result<ApplyStatus, ClientError> {
        let mut state = tokio::select! {
            state = self.state.lock() => state,
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
        };

        if !is_process_suspended {
            self.confirm_pending(&mut state, cancel).await?;
        }

        let update_id = state.next_update_id;
        state.next_update_id += 1;

        let payload = encode(update_id)?;
        let sent = self.targets.send(update_id, &payload);
        state.pending.push_back(PendingUpdate {
            update_id,
            fully_applicable,
        });

        if sent == 0 {
            crate::debug!(self.module; "no connected targets, assuming update #{} applied", update_id);
        } else {
            crate::debug!(self.module; "sent update #{} to {} target(s)", update_id, sent);
        }

        if is_process_suspended {
            crate::debug!(self.module; "process suspended, update #{} will be confirmed later", update_id);
            return Ok(ApplyStatus::optimistic(fully_applicable));
        }

        let replies = self.targets.receive(update_id, cancel).await?;
        state.pending.pop_front();
        Ok(self.settle(update_id, fully_applicable, &replies))
    }

    /// Confirm every queued update in order. An id leaves the queue only
    /// after its replies are in, so cancellation never loses one.
    async fn confirm_pending(
        &self,
        state: &mut ApplyState,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        while let Some(pending) = state.pending.front().copied() {
            let replies = self.targets.receive(pending.update_id, cancel).await?;
            state.pending.pop_front();

            let status = self.settle(pending.update_id, pending.fully_applicable, &replies);
            if status.is_failed() {
                crate::log!(self.module; "deferred update #{} failed to apply", pending.update_id);
            }
        }
        Ok(())
    }

    fn settle(&self, update_id: u64, fully_applicable: bool, replies: &[Reply]) -> ApplyStatus {
        for reply in replies {
            for entry in &reply.log {
                crate::logger::relay(self.module, entry.severity, &entry.message);
            }
        }

        let outcomes: Vec<_> = replies.iter().map(|r| r.outcome).collect();
        let status = aggregate(&outcomes, fully_applicable);
        crate::debug!(self.module; "update #{}: {}", update_id, status);
        status
    }
}
