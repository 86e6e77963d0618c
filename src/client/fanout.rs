//! Fan-out / fan-in over the physical targets of one logical client.
//!
//! Each connected target (agent process, browser tab) owns an unbounded
//! outbox drained by its transport writer task. Sending is a synchronous
//! enqueue, so an update id is recorded as in flight before any await
//! point. Responses arrive in send order per target: the transport reader
//! pops the oldest in-flight id and files the reply under it.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::ClientError;
use super::protocol::Reply;

pub type TargetId = u64;

struct Target {
    id: TargetId,
    outbox: mpsc::UnboundedSender<String>,
    /// Request ids awaiting a response, oldest first
    in_flight: VecDeque<u64>,
    alive: bool,
}

#[derive(Default)]
struct SetState {
    targets: Vec<Target>,
    next_target: TargetId,
    /// update id -> targets that were sent the update
    expected: FxHashMap<u64, Vec<TargetId>>,
    /// update id -> replies received so far
    replies: FxHashMap<u64, Vec<(TargetId, Reply)>>,
}

impl SetState {
    fn is_alive(&self, id: TargetId) -> bool {
        self.targets.iter().any(|t| t.id == id && t.alive)
    }

    /// All replies for `update_id` if every recipient answered or left.
    fn try_collect(&mut self, update_id: u64) -> Option<Vec<Reply>> {
        let expected = self.expected.get(&update_id)?;
        let replies = self.replies.get(&update_id);
        let answered = |id: &TargetId| replies.is_some_and(|r| r.iter().any(|(t, _)| t == id));

        if expected
            .iter()
            .any(|id| !answered(id) && self.is_alive(*id))
        {
            return None;
        }

        let expected = self.expected.remove(&update_id).unwrap_or_default();
        let mut replies = self.replies.remove(&update_id).unwrap_or_default();
        Some(
            expected
                .into_iter()
                .map(|id| match replies.iter().position(|(t, _)| *t == id) {
                    Some(i) => replies.swap_remove(i).1,
                    None => Reply::disconnected(),
                })
                .collect(),
        )
    }
}

pub struct TargetSet {
    state: Mutex<SetState>,
    /// Bumped on every reply, attach and disconnect
    version: watch::Sender<u64>,
}

impl Default for TargetSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetSet {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SetState::default()),
            version: watch::Sender::new(0),
        }
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Register a new target. The transport drains the returned outbox.
    pub fn attach(&self) -> (TargetId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state.lock();
            let id = state.next_target;
            state.next_target += 1;
            state.targets.push(Target {
                id,
                outbox: tx,
                in_flight: VecDeque::new(),
                alive: true,
            });
            id
        };
        self.bump();
        (id, rx)
    }

    /// Mark a target gone. Its outstanding updates resolve as disconnected.
    pub fn disconnect(&self, id: TargetId) {
        {
            let mut state = self.state.lock();
            state.targets.retain(|t| t.id != id);
        }
        self.bump();
    }

    /// Close every outbox, writer tasks end once drained.
    pub fn close_all(&self) {
        self.state.lock().targets.clear();
        self.bump();
    }

    pub fn connected(&self) -> usize {
        self.state.lock().targets.iter().filter(|t| t.alive).count()
    }

    /// Enqueue a request on every live target. Returns how many got it.
    pub fn send(&self, update_id: u64, payload: &str) -> usize {
        let mut state = self.state.lock();
        let mut recipients = Vec::new();

        for target in state.targets.iter_mut().filter(|t| t.alive) {
            if target.outbox.send(payload.to_owned()).is_ok() {
                target.in_flight.push_back(update_id);
                recipients.push(target.id);
            } else {
                target.alive = false;
            }
        }

        let sent = recipients.len();
        state.expected.insert(update_id, recipients);
        sent
    }

    /// Enqueue a message that expects no response.
    pub fn notify(&self, payload: &str) -> usize {
        let state = self.state.lock();
        state
            .targets
            .iter()
            .filter(|t| t.alive)
            .filter(|t| t.outbox.send(payload.to_owned()).is_ok())
            .count()
    }

    /// Record a reply from `target` for its oldest in-flight request.
    pub fn complete(&self, target: TargetId, reply: Reply) {
        {
            let mut state = self.state.lock();
            let Some(update_id) = state
                .targets
                .iter_mut()
                .find(|t| t.id == target)
                .and_then(|t| t.in_flight.pop_front())
            else {
                crate::debug!("client"; "unsolicited response from target #{}", target);
                return;
            };
            state
                .replies
                .entry(update_id)
                .or_default()
                .push((target, reply));
        }
        self.bump();
    }

    /// Wait until every target that was sent `update_id` replied or left.
    ///
    /// Cancel-safe: on cancellation the update stays outstanding and a
    /// later call picks up the replies that arrived meanwhile.
    pub async fn receive(
        &self,
        update_id: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Reply>, ClientError> {
        let mut version = self.version.subscribe();
        loop {
            version.borrow_and_update();
            if let Some(replies) = self.state.lock().try_collect(update_id) {
                return Ok(replies);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                changed = version.changed() => {
                    if changed.is_err() {
                        return Err(ClientError::Disposed);
                    }
                }
            }
        }
    }

    /// Wait until at least one target is connected.
    pub async fn wait_for_target(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let mut version = self.version.subscribe();
        loop {
            version.borrow_and_update();
            if self.connected() > 0 {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                changed = version.changed() => {
                    if changed.is_err() {
                        return Err(ClientError::Disposed);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TargetOutcome;

    fn ok() -> Reply {
        Reply {
            outcome: TargetOutcome::Succeeded,
            log: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_receive_waits_for_all_targets() {
        let set = TargetSet::new();
        let (a, mut a_rx) = set.attach();
        let (b, _b_rx) = set.attach();
        let cancel = CancellationToken::new();

        assert_eq!(set.send(1, "u1"), 2);
        assert_eq!(a_rx.recv().await.as_deref(), Some("u1"));

        set.complete(a, ok());
        assert!(set.state.lock().try_collect(1).is_none());

        set.disconnect(b);
        let replies = set.receive(1, &cancel).await.unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].outcome, TargetOutcome::Succeeded);
        assert_eq!(replies[1].outcome, TargetOutcome::Disconnected);
    }

    #[tokio::test]
    async fn test_no_targets_resolves_immediately() {
        let set = TargetSet::new();
        assert_eq!(set.send(1, "u1"), 0);
        let replies = set.receive(1, &CancellationToken::new()).await.unwrap();
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_replies_match_send_order() {
        let set = TargetSet::new();
        let (a, _rx) = set.attach();
        set.send(1, "u1");
        set.send(2, "u2");

        set.complete(a, ok());
        set.complete(
            a,
            Reply {
                outcome: TargetOutcome::Rejected,
                log: Vec::new(),
            },
        );

        let cancel = CancellationToken::new();
        assert_eq!(
            set.receive(1, &cancel).await.unwrap()[0].outcome,
            TargetOutcome::Succeeded
        );
        assert_eq!(
            set.receive(2, &cancel).await.unwrap()[0].outcome,
            TargetOutcome::Rejected
        );
    }

    #[tokio::test]
    async fn test_cancelled_receive_keeps_update_outstanding() {
        let set = TargetSet::new();
        let (a, _rx) = set.attach();
        set.send(7, "u7");

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            set.receive(7, &cancel).await,
            Err(ClientError::Cancelled)
        ));

        set.complete(a, ok());
        let replies = set.receive(7, &CancellationToken::new()).await.unwrap();
        assert_eq!(replies, vec![ok()]);
    }
}
