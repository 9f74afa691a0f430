//! Bidirectional message channel to the streaming synthesis service.

use crate::credentials::ServiceConfig;
use crate::error::{Result, TalkbackError};
use crossbeam_channel::Receiver;
use std::collections::VecDeque;
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::protocol::CloseFrame;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

const SERVICE: &str = "synthesis";

/// An open channel carrying JSON text messages.
pub trait SpeechChannel: Send {
    fn send(&mut self, text: &str) -> Result<()>;

    /// Next text message; `None` once the server closed the channel normally.
    ///
    /// # Errors
    /// `Transport` if the connection breaks abnormally.
    fn recv(&mut self) -> Result<Option<String>>;

    /// Best-effort close.
    fn close(&mut self);
}

/// Opens channels. Shared read-only across sessions.
pub trait ChannelConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn SpeechChannel>>;
}

impl<T: ChannelConnector> ChannelConnector for Arc<T> {
    fn connect(&self) -> Result<Box<dyn SpeechChannel>> {
        (**self).connect()
    }
}

/// WebSocket connector authenticated with a bearer token.
pub struct WebSocketConnector {
    url: String,
    api_key: String,
    read_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(service: &ServiceConfig) -> Self {
        Self {
            url: service.streaming_speech_url(),
            api_key: service.api_key().to_string(),
            read_timeout: service.timeout(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ChannelConnector for WebSocketConnector {
    fn connect(&self) -> Result<Box<dyn SpeechChannel>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TalkbackError::transport(SERVICE, e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| TalkbackError::transport(SERVICE, e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);

        let (socket, response) = tungstenite::connect(request)
            .map_err(|e| TalkbackError::transport(SERVICE, e.to_string()))?;
        tracing::debug!(status = %response.status(), url = %self.url, "Synthesis channel open");

        set_read_timeout(&socket, self.read_timeout);
        Ok(Box::new(WebSocketChannel { socket }))
    }
}

fn set_read_timeout(socket: &WebSocket<MaybeTlsStream<TcpStream>>, timeout: Duration) {
    let tcp = match socket.get_ref() {
        MaybeTlsStream::Plain(s) => s,
        MaybeTlsStream::Rustls(s) => s.get_ref(),
        _ => return,
    };
    if let Err(e) = tcp.set_read_timeout(Some(timeout)) {
        tracing::debug!("Failed to set read timeout: {}", e);
    }
}

struct WebSocketChannel {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

fn is_normal_close(frame: Option<&CloseFrame>) -> bool {
    frame.is_none_or(|f| matches!(f.code, CloseCode::Normal | CloseCode::Away))
}

impl SpeechChannel for WebSocketChannel {
    fn send(&mut self, text: &str) -> Result<()> {
        self.socket
            .send(Message::text(text))
            .map_err(|e| TalkbackError::transport(SERVICE, e.to_string()))
    }

    fn recv(&mut self) -> Result<Option<String>> {
        loop {
            match self.socket.read() {
                Ok(Message::Text(text)) => return Ok(Some(text.as_str().to_string())),
                Ok(Message::Binary(bytes)) => {
                    return String::from_utf8(bytes.to_vec()).map(Some).map_err(|e| {
                        TalkbackError::Decode {
                            message: format!("Binary message is not UTF-8: {}", e),
                        }
                    });
                }
                Ok(Message::Close(frame)) => {
                    if is_normal_close(frame.as_ref()) {
                        return Ok(None);
                    }
                    let detail = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                        .unwrap_or_default();
                    return Err(TalkbackError::transport(
                        SERVICE,
                        format!("channel closed abnormally: {}", detail),
                    ));
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return Ok(None);
                }
                Err(e) => return Err(TalkbackError::transport(SERVICE, e.to_string())),
            }
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.socket.close(None) {
            tracing::trace!("Channel close: {}", e);
        }
    }
}

/// One step of a scripted channel.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Deliver a text message.
    Message(String),
    /// Sleep before the next step.
    Wait(Duration),
    /// Block until the gate receives a value or is dropped.
    Gate(Receiver<()>),
    /// Fail the read like a dropped connection.
    Fail(String),
    /// Close normally.
    Close,
}

/// Connector that replays a script; for tests and offline runs.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Vec<ScriptStep>,
    connect_error: Option<String>,
    connects: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Every connect attempt fails like a refused connection.
    pub fn refusing(message: &str) -> Self {
        Self {
            connect_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Every message the client sent, across all connections.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ChannelConnector for ScriptedConnector {
    fn connect(&self) -> Result<Box<dyn SpeechChannel>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.connect_error {
            return Err(TalkbackError::transport(SERVICE, message.clone()));
        }
        Ok(Box::new(ScriptedChannel {
            steps: self.script.iter().cloned().collect(),
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct ScriptedChannel {
    steps: VecDeque<ScriptStep>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl SpeechChannel for ScriptedChannel {
    fn send(&mut self, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<String>> {
        while let Some(step) = self.steps.pop_front() {
            match step {
                ScriptStep::Message(text) => return Ok(Some(text)),
                ScriptStep::Wait(delay) => std::thread::sleep(delay),
                ScriptStep::Gate(gate) => {
                    // A dropped sender opens the gate too.
                    let _opened = gate.recv().is_ok();
                }
                ScriptStep::Fail(message) => {
                    return Err(TalkbackError::transport(SERVICE, message));
                }
                ScriptStep::Close => {
                    self.steps.clear();
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.steps.clear();
    }
}
