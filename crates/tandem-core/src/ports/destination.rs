//! Destination ports - メッセージの配送先
//!
//! MessageDispatcher の親側だけが使います（ホストスレッド上で呼ばれる）。

use std::sync::Arc;

use crate::domain::SessionId;

/// Something that can show a line of text: a connected session, a console,
/// the context that issued a command.
pub trait MessageSink: Send + Sync {
    fn send_message(&self, text: &str);
}

impl<S: MessageSink + ?Sized> MessageSink for Arc<S> {
    fn send_message(&self, text: &str) {
        (**self).send_message(text)
    }
}

/// Looks up live sessions by their stable identifier.
pub trait DestinationResolver: Send + 'static {
    type Session: MessageSink;

    fn resolve_session(&self, id: &SessionId) -> Option<Self::Session>;

    fn is_connected(&self, session: &Self::Session) -> bool;
}
