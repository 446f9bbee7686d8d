use std::sync::Arc;

use chatbridge::config::Config;
use chatbridge::dispatch::http::RequestDispatcher;
use chatbridge::dispatch::poll::PollingController;
use chatbridge::dispatch::transport::HttpTransport;
use chatbridge::dispatch::verify::{
    ErrorFieldClassifier, KeyVerifier, VerificationCallbacks,
};
use chatbridge::schedule::TokioSleeper;
use chatbridge::sink::{ErrorCategory, MessageContent, MessageSink, Turn, TurnObserver};
use chatbridge::stream::StreamAdapter;

const USAGE: &str = "usage: chatbridge [--poll] <prompt...> | chatbridge verify <key>";

/// Prints the transcript to stdout. Partial stream updates are printed as
/// the newly appended suffix only.
#[derive(Default)]
struct ConsoleSink {
    printed: std::sync::Mutex<String>,
}

impl MessageSink for ConsoleSink {
    fn add_new_message(&self, content: MessageContent, is_bot: bool, send_update: bool) {
        let text = content.text.or(content.html).unwrap_or_default();
        let mut printed = self.printed.lock().unwrap_or_else(|e| e.into_inner());
        let suffix = text.strip_prefix(printed.as_str()).unwrap_or(&text).to_string();
        print!("{}{suffix}", if printed.is_empty() && is_bot { "bot: " } else { "" });
        if send_update {
            println!();
            printed.clear();
        } else {
            *printed = text;
        }
    }

    fn add_loading_message(&self) {}

    fn remove_last_message(&self) {}

    fn add_new_error_message(&self, category: ErrorCategory, text: &str) {
        eprintln!("[{}] {text}", category.as_str());
    }

    fn remove_introductory_message(&self) {}
}

struct LogObserver;

impl TurnObserver for LogObserver {
    fn on_open(&self) {
        tracing::debug!("stream opened");
    }

    fn on_close(&self) {
        tracing::debug!("stream closed");
    }

    fn on_finish(&self) {
        tracing::info!("turn finished");
    }
}

struct ConsoleVerification;

impl VerificationCallbacks for ConsoleVerification {
    fn on_success(&self, _key: &str) {
        println!("key accepted");
    }

    fn on_fail(&self, message: &str) {
        println!("key rejected: {message}");
    }

    fn on_load(&self) {
        println!("verifying key...");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();

    let config = Config::load();
    tracing::debug!(connect = ?config.connect, "config loaded");

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        anyhow::bail!(USAGE);
    }

    let mut transport = HttpTransport::new();
    if let Some(timeout) = config.connect.timeout() {
        transport = transport.with_timeout(timeout);
    }
    let transport = Arc::new(transport);

    if args[0] == "verify" {
        let key = args.get(1).cloned().unwrap_or_default();
        let request = config.connect.verify_request(&key)?;
        KeyVerifier::new(transport)
            .verify(&key, request, &ConsoleVerification, &ErrorFieldClassifier)
            .await;
        return Ok(());
    }

    let poll = args.first().is_some_and(|a| a == "--poll");
    if poll {
        args.remove(0);
    }
    let prompt = args.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!(USAGE);
    }

    let body = serde_json::json!({"messages": [{"role": "user", "text": prompt}]});
    let ctx = config.connect.request_context(body)?;
    let sink: Arc<dyn MessageSink> = Arc::new(ConsoleSink::default());
    let turn = Turn::new(Arc::new(LogObserver));

    if poll {
        PollingController::new(transport)
            .with_max_attempts(config.connect.max_poll_attempts)
            .poll(ctx, sink, turn)
            .await;
    } else {
        let stream = StreamAdapter::new(Arc::new(TokioSleeper), config.connect.stream_interval());
        RequestDispatcher::new(transport)
            .with_stream_adapter(stream)
            .dispatch(ctx, config.connect.delivery(), sink, turn)
            .await;
    }

    Ok(())
}
