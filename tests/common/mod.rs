//! Shared fakes for integration tests: a recording transcript, turn observer,
//! sleeper, and a scripted transport.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatbridge::dispatch::OutgoingRequest;
use chatbridge::dispatch::transport::{RawResponse, Transport};
use chatbridge::error::BridgeError;
use chatbridge::schedule::Sleeper;
use chatbridge::sink::{ErrorCategory, MessageContent, MessageSink, TurnObserver};
use tokio::net::TcpListener;

/// Ordered log shared between fakes so tests can assert interleaving.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Message {
        content: MessageContent,
        is_bot: bool,
        send_update: bool,
    },
    Loading,
    RemoveLast,
    Error(String),
    RemoveIntro,
    Scroll,
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<MessageContent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Message { content, .. } => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Error(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Text of the last message flagged final.
    pub fn final_text(&self) -> Option<String> {
        self.events().into_iter().rev().find_map(|e| match e {
            SinkEvent::Message {
                content,
                send_update: true,
                ..
            } => content.text,
            _ => None,
        })
    }

    fn push(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl MessageSink for RecordingSink {
    fn add_new_message(&self, content: MessageContent, is_bot: bool, send_update: bool) {
        self.push(SinkEvent::Message {
            content,
            is_bot,
            send_update,
        });
    }

    fn add_loading_message(&self) {
        self.push(SinkEvent::Loading);
    }

    fn remove_last_message(&self) {
        self.push(SinkEvent::RemoveLast);
    }

    fn add_new_error_message(&self, category: ErrorCategory, text: &str) {
        assert_eq!(category, ErrorCategory::Service);
        self.push(SinkEvent::Error(text.to_string()));
    }

    fn remove_introductory_message(&self) {
        self.push(SinkEvent::RemoveIntro);
    }

    fn scroll_to_bottom(&self) {
        self.push(SinkEvent::Scroll);
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub finishes: AtomicUsize,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn finishes(&self) -> usize {
        self.finishes.load(Ordering::SeqCst)
    }
}

impl TurnObserver for RecordingObserver {
    fn on_open(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
    }

    fn on_close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_finish(&self) {
        self.finishes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records requested delays and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
    log: Option<EventLog>,
}

impl RecordingSleeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_log(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            delays: Mutex::new(Vec::new()),
            log: Some(log),
        })
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
        if let Some(log) = &self.log {
            log.lock().unwrap().push(format!("sleep {}", duration.as_millis()));
        }
        tokio::task::yield_now().await;
    }
}

/// Replays canned responses in order and records what was sent.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<RawResponse, BridgeError>>>,
    requests: Mutex<Vec<OutgoingRequest>>,
    log: Option<EventLog>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<RawResponse, BridgeError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            log: None,
        })
    }

    pub fn with_log(responses: Vec<Result<RawResponse, BridgeError>>, log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            log: Some(log),
        })
    }

    pub fn json(status: u16, body: serde_json::Value) -> Arc<Self> {
        Self::new(vec![Ok(RawResponse::json(status, &body))])
    }

    pub fn requests(&self) -> Vec<OutgoingRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, BridgeError> {
        self.requests.lock().unwrap().push(request);
        if let Some(log) = &self.log {
            log.lock().unwrap().push("send".to_string());
        }
        tokio::task::yield_now().await;
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BridgeError::Transport("no scripted response left".into())))
    }
}

/// Bind a TCP listener on localhost and return (listener, port).
pub async fn mock_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Read one HTTP request (headers plus Content-Length body) from the socket.
pub async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    use tokio::io::AsyncReadExt;

    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&data);
        if let Some(idx) = text.find("\r\n\r\n") {
            let len = text[..idx]
                .to_lowercase()
                .lines()
                .find_map(|l| l.strip_prefix("content-length:").map(|v| v.trim().to_string()))
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= idx + 4 + len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}
