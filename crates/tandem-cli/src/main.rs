use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing_subscriber::EnvFilter;

use tandem_core::domain::{Payload, PayloadEnvelope, Producer, SessionId};
use tandem_core::impls::{StaticConfig, TokioHost, TomlConfig};
use tandem_core::pipeline::{Message, MessageDispatcher, ParentOutbox, QueueProcessor};
use tandem_core::ports::{ConfigProvider, DestinationResolver, MessageSink, TickTiming};

#[derive(Debug, Deserialize)]
struct GreetRequest {
    name: String,
}

/// 子スレッドで組み立てる挨拶
#[derive(Debug)]
struct Greeting {
    envelope: PayloadEnvelope,
    name: String,
}

impl Payload for Greeting {
    fn envelope(&self) -> &PayloadEnvelope {
        &self.envelope
    }
}

struct Console;

impl MessageSink for Console {
    fn send_message(&self, text: &str) {
        println!("[console] {text}");
    }
}

/// The demo has no sessions; everything goes to the console.
struct NoSessions;

impl DestinationResolver for NoSessions {
    type Session = Console;

    fn resolve_session(&self, _id: &SessionId) -> Option<Console> {
        None
    }

    fn is_connected(&self, _session: &Console) -> bool {
        false
    }
}

fn load_config() -> tandem_core::Result<Box<dyn ConfigProvider>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(Box::new(TomlConfig::load(path)?)),
        None => Ok(Box::new(StaticConfig::new())),
    }
}

#[tokio::main]
async fn main() -> tandem_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) 設定とホスト（1 tick = 50ms）
    let config = load_config()?;
    let host = TokioHost::start("tandem-host")?;
    let tick = TickTiming::every(Duration::from_millis(50));
    let producer = Producer::new("tandem-cli", env!("CARGO_PKG_VERSION"));
    let console: Arc<dyn MessageSink> = Arc::new(Console);

    // (B) 配送用の dispatcher（子は素通し）
    let dispatcher =
        MessageDispatcher::passthrough(&host, config.as_ref(), "chat", tick, NoSessions)?;

    // (C) 挨拶を子で組み立て、親で dispatcher に渡す processor
    let outbound = dispatcher.parent_outbox();
    let to_console = Arc::clone(&console);
    let reply_producer = producer.clone();
    let processor = QueueProcessor::start(
        &host,
        config.as_ref(),
        "greeter",
        tick,
        move |greeting: Greeting| {
            let text = format!("Hello, {}!", greeting.name);
            let envelope = PayloadEnvelope::new(&reply_producer);
            outbound.submit_to_parent(Message::to_sender(envelope, Arc::clone(&to_console), text));
        },
        |_ctx| {
            |greeting: Greeting, outbox: &ParentOutbox<Greeting>| {
                let name = greeting.name.to_uppercase();
                outbox.submit_to_parent(Greeting { name, ..greeting });
            }
        },
    )?;

    // (D) リクエスト投入（JSON から）
    let requests: Vec<GreetRequest> =
        serde_json::from_str(r#"[{ "name": "tandem" }, { "name": "host thread" }]"#)
            .map_err(|e| tandem_core::TandemError::Config(format!("demo input: {e}")))?;
    for request in requests {
        let greeting = Greeting {
            envelope: PayloadEnvelope::new(&producer),
            name: request.name,
        };
        println!(
            "submitted: {}",
            serde_json::to_string(greeting.envelope()).unwrap_or_default()
        );
        processor.submit_to_child(greeting);
    }

    // (E) 少し回してから止める（persist なので cancel は呼び出し側の責任）
    sleep(Duration::from_millis(500)).await;
    processor.cancel()?;
    dispatcher.cancel()?;
    host.shutdown();
    tracing::info!("demo finished");
    Ok(())
}
