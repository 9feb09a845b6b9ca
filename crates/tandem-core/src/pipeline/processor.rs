//! QueueProcessor - 汎用の親子キュー処理
//!
//! 子（専用スレッド）で重い処理をして、結果を親（ホストスレッド）で受け取ります。
//! 設定キーは `framework-sending-max` / `framework-receive-interval` です。

use crate::domain::{Lifecycle, PairId, Payload};
use crate::error::Result;
use crate::pair::{PairContext, TaskPair, TickStatus};
use crate::ports::{ConfigProvider, HostScheduler, TickTiming};

use super::settings::{PROCESSOR_KEYS, PipelineSettings};
use super::{ChildOutbox, DrainSide, ParentOutbox, PollSide};

/// Parent-side hook. Runs on the host thread, once per drained item.
pub trait ReceiveHandler<T>: Send + 'static {
    fn receive(&mut self, payload: T);
}

impl<T, F> ReceiveHandler<T> for F
where
    F: FnMut(T) + Send + 'static,
{
    fn receive(&mut self, payload: T) {
        self(payload)
    }
}

/// Child-side hook. Runs on the child's thread.
pub trait ProcessHandler<T>: Send + 'static {
    fn process(&mut self, payload: T, outbox: &ParentOutbox<T>);

    /// Called exactly once after the child loop exits, whatever the reason.
    fn finalize(&mut self, _outbox: &ParentOutbox<T>) {}
}

impl<T, F> ProcessHandler<T> for F
where
    F: FnMut(T, &ParentOutbox<T>) + Send + 'static,
{
    fn process(&mut self, payload: T, outbox: &ParentOutbox<T>) {
        self(payload, outbox)
    }
}

pub struct QueueProcessor<T, R> {
    pair: TaskPair<DrainSide<T, R>>,
    to_parent: ParentOutbox<T>,
    to_child: ChildOutbox<T>,
    settings: PipelineSettings,
}

impl<T, R> Clone for QueueProcessor<T, R> {
    fn clone(&self) -> Self {
        Self {
            pair: self.pair.clone(),
            to_parent: self.to_parent.clone(),
            to_child: self.to_child.clone(),
            settings: self.settings,
        }
    }
}

impl<T, R> QueueProcessor<T, R>
where
    T: Payload,
    R: ReceiveHandler<T>,
{
    /// Read settings from `config` and start the pair on `host`.
    ///
    /// `handler_factory` builds the child's handler from the child's context.
    pub fn start<H, C, P, F>(
        host: &H,
        config: &C,
        name: impl Into<String>,
        timing: TickTiming,
        receiver: R,
        handler_factory: F,
    ) -> Result<Self>
    where
        H: HostScheduler + ?Sized,
        C: ConfigProvider + ?Sized,
        P: ProcessHandler<T>,
        F: FnOnce(&PairContext) -> P,
    {
        let settings = PipelineSettings::resolve(config, PROCESSOR_KEYS);
        Self::with_settings(host, settings, name, timing, receiver, handler_factory)
    }

    pub fn with_settings<H, P, F>(
        host: &H,
        settings: PipelineSettings,
        name: impl Into<String>,
        timing: TickTiming,
        receiver: R,
        handler_factory: F,
    ) -> Result<Self>
    where
        H: HostScheduler + ?Sized,
        P: ProcessHandler<T>,
        F: FnOnce(&PairContext) -> P,
    {
        let settings = PipelineSettings::new(settings.max_per_tick, settings.poll_interval);
        let (parent_tx, parent_rx) = crossbeam_channel::unbounded();
        let (child_tx, child_rx) = crossbeam_channel::unbounded();
        let to_parent = ParentOutbox::new(parent_tx);
        let to_child = ChildOutbox::new(child_tx);

        let child_outbox = to_parent.clone();
        let poll_interval = settings.poll_interval;
        let pair = TaskPair::start(
            host,
            name,
            timing,
            DrainSide::new(parent_rx, settings.max_per_tick, receiver),
            move |ctx| {
                let handler = handler_factory(&ctx);
                PollSide::new(child_rx, poll_interval, child_outbox, handler)
            },
        )?;

        Ok(Self {
            pair,
            to_parent,
            to_child,
            settings,
        })
    }

    pub fn tick(&self) -> Result<TickStatus> {
        self.pair.tick()
    }
}

impl<T, R> QueueProcessor<T, R> {
    pub fn id(&self) -> PairId {
        self.pair.id()
    }

    pub fn name(&self) -> &str {
        self.pair.name()
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    pub fn context(&self) -> &PairContext {
        self.pair.context()
    }

    pub fn parent_outbox(&self) -> ParentOutbox<T> {
        self.to_parent.clone()
    }

    pub fn child_outbox(&self) -> ChildOutbox<T> {
        self.to_child.clone()
    }

    pub fn parent_backlog(&self) -> usize {
        self.to_parent.backlog()
    }

    pub fn child_backlog(&self) -> usize {
        self.to_child.backlog()
    }

    pub fn request_child_stop(&self) {
        self.pair.request_child_stop();
    }

    pub fn set_persist(&self) {
        self.pair.set_persist();
    }

    /// Cancel the parent timer and the child. Items still queued are dropped.
    pub fn cancel(&self) -> Result<()> {
        self.pair.cancel()
    }

    pub fn is_canceled(&self) -> bool {
        self.pair.is_canceled()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.pair.lifecycle()
    }

    pub fn child_lifecycle(&self) -> Lifecycle {
        self.pair.child_lifecycle()
    }

    /// 親側ハンドラを借用する（ホストスレッドから呼ぶこと）
    pub fn with_receiver<O>(&self, f: impl FnOnce(&mut R) -> O) -> O {
        self.pair.with_work(|side| f(side.receiver_mut()))
    }
}

impl<T: Payload, R> QueueProcessor<T, R> {
    pub fn submit_to_parent(&self, payload: T) {
        self.to_parent.submit_to_parent(payload);
    }

    pub fn submit_to_child(&self, payload: T) {
        self.to_child.submit_to_child(payload);
    }
}
