//! Pipeline - 二本のキューを持つ親子ペア
//!
//! # データの流れ
//! ```text
//! submit_to_child ──► [to-child] ──► 子: process ──► [to-parent] ──► 親: receive
//!                                  (専用スレッド)                   (ホストスレッド, 1 tick 最大 N 件)
//! ```
//!
//! - 親は tick ごとに to-parent キューから最大 `max_per_tick` 件を取り出す
//! - 子は `poll_interval` ごとに停止フラグを確認しながら to-child キューを待つ
//! - 子はループ開始時に親を persist にする。ペアの停止は呼び出し側が `cancel()` する
//! - キュー操作は失敗しない（相手側が居なければ捨ててログに残す）

pub mod dispatcher;
pub mod processor;
pub mod settings;

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::domain::Payload;
use crate::pair::{ChildWork, PairContext, ParentWork};

pub use self::dispatcher::{Message, MessageDispatcher, MessageTransform, Passthrough, Target};
pub use self::processor::{ProcessHandler, QueueProcessor, ReceiveHandler};
pub use self::settings::{DISPATCHER_KEYS, PROCESSOR_KEYS, PipelineSettings, SettingKeys};

/// Sending side of a pipeline's to-parent queue.
///
/// Children get one of these to hand results back to the host thread.
pub struct ParentOutbox<T> {
    tx: Sender<T>,
}

impl<T> Clone for ParentOutbox<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> ParentOutbox<T> {
    pub(crate) fn new(tx: Sender<T>) -> Self {
        Self { tx }
    }

    /// Items waiting for the parent.
    pub fn backlog(&self) -> usize {
        self.tx.len()
    }
}

impl<T: Payload> ParentOutbox<T> {
    pub fn submit_to_parent(&self, payload: T) {
        if let Err(err) = self.tx.send(payload) {
            tracing::debug!(payload = %err.0.envelope().id(), "parent queue closed, payload dropped");
        }
    }
}

impl<T> fmt::Debug for ParentOutbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParentOutbox")
            .field("backlog", &self.tx.len())
            .finish()
    }
}

/// Sending side of a pipeline's to-child queue.
///
/// When every clone is dropped the child's loop sees a disconnected queue
/// and finishes.
pub struct ChildOutbox<T> {
    tx: Sender<T>,
}

impl<T> Clone for ChildOutbox<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> ChildOutbox<T> {
    pub(crate) fn new(tx: Sender<T>) -> Self {
        Self { tx }
    }

    pub fn backlog(&self) -> usize {
        self.tx.len()
    }
}

impl<T: Payload> ChildOutbox<T> {
    pub fn submit_to_child(&self, payload: T) {
        if let Err(err) = self.tx.send(payload) {
            tracing::debug!(payload = %err.0.envelope().id(), "child queue closed, payload dropped");
        }
    }
}

impl<T> fmt::Debug for ChildOutbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildOutbox")
            .field("backlog", &self.tx.len())
            .finish()
    }
}

/// Take at most `max` items without blocking. Returns how many were consumed.
pub(crate) fn drain_batch<T>(inbox: &Receiver<T>, max: usize, mut consume: impl FnMut(T)) -> usize {
    let mut drained = 0;
    while drained < max {
        match inbox.try_recv() {
            Ok(item) => {
                consume(item);
                drained += 1;
            }
            Err(_) => break,
        }
    }
    drained
}

/// Why the child's poll loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollExit {
    StopRequested,
    Disconnected,
}

/// Wait on `inbox` until the child is asked to stop.
///
/// The stop flag is checked before every wait, so a stop is seen within
/// one `interval` plus the time spent handling the current item.
pub(crate) fn poll_until_stopped<T>(
    ctx: &PairContext,
    inbox: &Receiver<T>,
    interval: Duration,
    mut handle: impl FnMut(T),
) -> PollExit {
    loop {
        if ctx.child_stop_requested() {
            return PollExit::StopRequested;
        }
        match inbox.recv_timeout(interval) {
            Ok(item) => handle(item),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                tracing::error!(pair = %ctx.name(), "child queue disconnected, leaving loop");
                return PollExit::Disconnected;
            }
        }
    }
}

/// Parent half of a pipeline: bounded drain of the to-parent queue.
pub(crate) struct DrainSide<T, R> {
    inbox: Receiver<T>,
    max_per_tick: usize,
    receiver: R,
}

impl<T, R> DrainSide<T, R> {
    pub(crate) fn new(inbox: Receiver<T>, max_per_tick: usize, receiver: R) -> Self {
        Self {
            inbox,
            max_per_tick,
            receiver,
        }
    }

    pub(crate) fn receiver_mut(&mut self) -> &mut R {
        &mut self.receiver
    }
}

impl<T, R> ParentWork for DrainSide<T, R>
where
    T: Payload,
    R: ReceiveHandler<T>,
{
    fn parent_run(&mut self, ctx: &PairContext) {
        let receiver = &mut self.receiver;
        let drained = drain_batch(&self.inbox, self.max_per_tick, |item| receiver.receive(item));
        if drained > 0 {
            tracing::debug!(
                pair = %ctx.name(),
                drained,
                backlog = self.inbox.len(),
                "parent drained queue"
            );
        }
    }
}

/// Child half of a pipeline: poll the to-child queue until stopped, then finalize.
pub(crate) struct PollSide<T, P> {
    inbox: Receiver<T>,
    poll_interval: Duration,
    outbox: ParentOutbox<T>,
    handler: P,
}

impl<T, P> PollSide<T, P> {
    pub(crate) fn new(
        inbox: Receiver<T>,
        poll_interval: Duration,
        outbox: ParentOutbox<T>,
        handler: P,
    ) -> Self {
        Self {
            inbox,
            poll_interval,
            outbox,
            handler,
        }
    }
}

impl<T, P> ChildWork for PollSide<T, P>
where
    T: Payload,
    P: ProcessHandler<T>,
{
    fn child_run(&mut self, ctx: &PairContext) {
        ctx.set_persist();

        let handler = &mut self.handler;
        let outbox = &self.outbox;
        let exit = poll_until_stopped(ctx, &self.inbox, self.poll_interval, |item| {
            tracing::trace!(pair = %ctx.name(), payload = %item.envelope().id(), "processing");
            handler.process(item, outbox);
        });
        tracing::debug!(pair = %ctx.name(), ?exit, left = self.inbox.len(), "child loop finished");

        self.handler.finalize(&self.outbox);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PayloadEnvelope, Producer};

    #[test]
    fn drain_batch_respects_the_cap() {
        let (tx, rx) = crossbeam_channel::unbounded();
        for n in 0..5 {
            tx.send(n).unwrap();
        }

        let mut seen = Vec::new();
        assert_eq!(drain_batch(&rx, 2, |n| seen.push(n)), 2);
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(rx.len(), 3);
    }

    #[test]
    fn drain_batch_on_empty_queue_is_a_noop() {
        let (_tx, rx) = crossbeam_channel::unbounded::<u32>();
        assert_eq!(drain_batch(&rx, 10, |_| panic!("nothing to consume")), 0);
    }

    #[test]
    fn backlog_is_readable_for_any_item_type() {
        let (tx, _rx) = crossbeam_channel::unbounded::<u32>();
        tx.send(7).unwrap();
        let to_parent = ParentOutbox::new(tx.clone());
        let to_child = ChildOutbox::new(tx);

        assert_eq!(to_parent.backlog(), 1);
        assert_eq!(to_child.backlog(), 1);
    }

    #[test]
    fn submitting_to_a_closed_queue_is_silent() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let outbox = ParentOutbox::new(tx);

        outbox.submit_to_parent(PayloadEnvelope::new(&Producer::new("tandem", "1.0")));
        assert_eq!(outbox.backlog(), 0);
    }
}
