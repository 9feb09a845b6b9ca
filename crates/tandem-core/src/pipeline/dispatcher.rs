//! MessageDispatcher - テキストメッセージ専用のパイプライン
//!
//! 子スレッドで本文を組み立て（`MessageTransform`）、親がホストスレッド上で配送します。
//!
//! # 配送先
//! - `Target::Session`: 安定 ID で指定。配送時に解決し、未接続・不明なら破棄（warn ログ）
//! - `Target::Sender`: 呼び出し元などを直接保持。そのまま送る
//!
//! 設定キーは `framework-message-sending-max` / `framework-message-receive-interval` です。

use std::fmt;
use std::sync::Arc;

use crate::domain::{Lifecycle, PairId, Payload, PayloadEnvelope, SessionId};
use crate::error::Result;
use crate::pair::{PairContext, TickStatus};
use crate::ports::{ConfigProvider, DestinationResolver, HostScheduler, MessageSink, TickTiming};

use super::processor::{ProcessHandler, QueueProcessor, ReceiveHandler};
use super::settings::{DISPATCHER_KEYS, PipelineSettings};
use super::{ChildOutbox, ParentOutbox};

#[derive(Clone)]
pub enum Target {
    Session(SessionId),
    Sender(Arc<dyn MessageSink>),
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Session(id) => f.debug_tuple("Session").field(id).finish(),
            Target::Sender(_) => f.write_str("Sender(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    envelope: PayloadEnvelope,
    target: Target,
    text: String,
}

impl Message {
    pub fn new(envelope: PayloadEnvelope, target: Target, text: impl Into<String>) -> Self {
        Self {
            envelope,
            target,
            text: text.into(),
        }
    }

    pub fn to_session(envelope: PayloadEnvelope, session: SessionId, text: impl Into<String>) -> Self {
        Self::new(envelope, Target::Session(session), text)
    }

    pub fn to_sender(
        envelope: PayloadEnvelope,
        sender: Arc<dyn MessageSink>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(envelope, Target::Sender(sender), text)
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace the body, keeping envelope and target.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..self
        }
    }
}

impl Payload for Message {
    fn envelope(&self) -> &PayloadEnvelope {
        &self.envelope
    }
}

/// Child-side message building. Runs on the child's thread.
///
/// Implementations hand finished messages to `outbox`; anything not
/// submitted is dropped.
pub trait MessageTransform: Send + 'static {
    fn transform(&mut self, message: Message, outbox: &ParentOutbox<Message>);

    fn finalize(&mut self, _outbox: &ParentOutbox<Message>) {}
}

/// Forwards every message unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl MessageTransform for Passthrough {
    fn transform(&mut self, message: Message, outbox: &ParentOutbox<Message>) {
        outbox.submit_to_parent(message);
    }
}

struct TransformStage<M>(M);

impl<M: MessageTransform> ProcessHandler<Message> for TransformStage<M> {
    fn process(&mut self, payload: Message, outbox: &ParentOutbox<Message>) {
        self.0.transform(payload, outbox);
    }

    fn finalize(&mut self, outbox: &ParentOutbox<Message>) {
        self.0.finalize(outbox);
    }
}

/// Parent-side delivery. Runs on the host thread.
struct Delivery<R> {
    resolver: R,
}

impl<R: DestinationResolver> ReceiveHandler<Message> for Delivery<R> {
    fn receive(&mut self, message: Message) {
        match &message.target {
            Target::Sender(sink) => sink.send_message(&message.text),
            Target::Session(id) => match self.resolver.resolve_session(id) {
                Some(session) if self.resolver.is_connected(&session) => {
                    session.send_message(&message.text);
                }
                Some(_) => {
                    tracing::warn!(
                        session = %id,
                        payload = %message.envelope.id(),
                        "session not connected, message dropped"
                    );
                }
                None => {
                    tracing::warn!(
                        session = %id,
                        payload = %message.envelope.id(),
                        "session not found, message dropped"
                    );
                }
            },
        }
    }
}

pub struct MessageDispatcher<R> {
    inner: QueueProcessor<Message, Delivery<R>>,
}

impl<R> Clone for MessageDispatcher<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: DestinationResolver> MessageDispatcher<R> {
    pub fn start<H, C, M, F>(
        host: &H,
        config: &C,
        name: impl Into<String>,
        timing: TickTiming,
        resolver: R,
        transform_factory: F,
    ) -> Result<Self>
    where
        H: HostScheduler + ?Sized,
        C: ConfigProvider + ?Sized,
        M: MessageTransform,
        F: FnOnce(&PairContext) -> M,
    {
        let settings = PipelineSettings::resolve(config, DISPATCHER_KEYS);
        Self::with_settings(host, settings, name, timing, resolver, transform_factory)
    }

    /// A dispatcher whose child forwards messages unchanged.
    pub fn passthrough<H, C>(
        host: &H,
        config: &C,
        name: impl Into<String>,
        timing: TickTiming,
        resolver: R,
    ) -> Result<Self>
    where
        H: HostScheduler + ?Sized,
        C: ConfigProvider + ?Sized,
    {
        Self::start(host, config, name, timing, resolver, |_ctx| Passthrough)
    }

    pub fn with_settings<H, M, F>(
        host: &H,
        settings: PipelineSettings,
        name: impl Into<String>,
        timing: TickTiming,
        resolver: R,
        transform_factory: F,
    ) -> Result<Self>
    where
        H: HostScheduler + ?Sized,
        M: MessageTransform,
        F: FnOnce(&PairContext) -> M,
    {
        let inner = QueueProcessor::with_settings(
            host,
            settings,
            name,
            timing,
            Delivery { resolver },
            |ctx| TransformStage(transform_factory(ctx)),
        )?;
        Ok(Self { inner })
    }

    pub fn tick(&self) -> Result<TickStatus> {
        self.inner.tick()
    }
}

impl<R> MessageDispatcher<R> {
    /// Queue a message for the child's transform.
    pub fn submit_to_child(&self, message: Message) {
        self.inner.submit_to_child(message);
    }

    /// Queue a message for delivery, skipping the transform.
    pub fn submit_to_parent(&self, message: Message) {
        self.inner.submit_to_parent(message);
    }

    pub fn child_outbox(&self) -> ChildOutbox<Message> {
        self.inner.child_outbox()
    }

    pub fn parent_outbox(&self) -> ParentOutbox<Message> {
        self.inner.parent_outbox()
    }

    pub fn id(&self) -> PairId {
        self.inner.id()
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn settings(&self) -> PipelineSettings {
        self.inner.settings()
    }

    pub fn context(&self) -> &PairContext {
        self.inner.context()
    }

    pub fn parent_backlog(&self) -> usize {
        self.inner.parent_backlog()
    }

    pub fn child_backlog(&self) -> usize {
        self.inner.child_backlog()
    }

    pub fn request_child_stop(&self) {
        self.inner.request_child_stop();
    }

    pub fn cancel(&self) -> Result<()> {
        self.inner.cancel()
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.is_canceled()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle()
    }

    pub fn child_lifecycle(&self) -> Lifecycle {
        self.inner.child_lifecycle()
    }

    pub fn with_resolver<O>(&self, f: impl FnOnce(&mut R) -> O) -> O {
        self.inner.with_receiver(|delivery| f(&mut delivery.resolver))
    }
}
