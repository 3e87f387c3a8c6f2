use reqwest::blocking::Client;
use reqwest::Url;
use std::net::TcpStream;
use thiserror::Error;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

pub const UPLOAD_PATH: &str = "/upload";
pub const DOWNLOAD_PATH: &str = "/download";
pub const CHANNEL_PATH: &str = "/__ws";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid server address '{0}'")]
    Address(String),
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("{code} {reason}")]
    Status { code: u16, reason: String },
    #[error("{0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("{0}")]
    Other(String),
}

/// Bidirectional text channel a running job reports through.
pub trait Channel: Send {
    fn send_text(&mut self, text: &str) -> Result<(), TransportError>;
    /// Next text frame, or `None` once the server closed the channel.
    fn recv_text(&mut self) -> Result<Option<String>, TransportError>;
}

/// Connection to the randomisation server.
pub trait Transport: Send + Sync {
    fn upload(&self, rom: &[u8]) -> Result<(), TransportError>;
    fn open_channel(&self) -> Result<Box<dyn Channel>, TransportError>;
}

/// Talks to a server at `base`: HTTP for the ROM upload and download, a
/// WebSocket on the same host for job progress.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base: Url,
    client: Client,
}

impl HttpTransport {
    pub fn new(base: &str) -> Result<Self, TransportError> {
        let base = Url::parse(base).map_err(|_| TransportError::Address(base.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(TransportError::Address(base.to_string()));
        }
        let client = Client::builder().build()?;
        Ok(Self { base, client })
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url.set_query(None);
        url
    }

    pub fn download_url(&self) -> Url {
        self.endpoint(DOWNLOAD_PATH)
    }

    pub fn channel_url(&self) -> Result<Url, TransportError> {
        let mut url = self.endpoint(CHANNEL_PATH);
        let scheme = if self.base.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| TransportError::Address(self.base.to_string()))?;
        Ok(url)
    }

    /// Fetches the randomised ROM after a successful job.
    pub fn download(&self) -> Result<Vec<u8>, TransportError> {
        let response = self.client.get(self.download_url()).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }
        Ok(response.bytes()?.to_vec())
    }
}

fn status_error(status: reqwest::StatusCode) -> TransportError {
    TransportError::Status {
        code: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
    }
}

impl Transport for HttpTransport {
    fn upload(&self, rom: &[u8]) -> Result<(), TransportError> {
        log::debug!("uploading {} bytes to {}", rom.len(), self.endpoint(UPLOAD_PATH));
        let response = self
            .client
            .post(self.endpoint(UPLOAD_PATH))
            .body(rom.to_vec())
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }
        Ok(())
    }

    fn open_channel(&self) -> Result<Box<dyn Channel>, TransportError> {
        let url = self.channel_url()?;
        log::debug!("opening job channel at {}", url);
        let (socket, _response) = tungstenite::connect(url.as_str())?;
        Ok(Box::new(WebSocketChannel { socket }))
    }
}

struct WebSocketChannel {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl Channel for WebSocketChannel {
    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.socket.send(Message::text(text.to_string()))?;
        Ok(())
    }

    fn recv_text(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.socket.read() {
                Ok(Message::Text(text)) => return Ok(Some(text.to_string())),
                Ok(Message::Binary(data)) => {
                    return String::from_utf8(data.to_vec())
                        .map(Some)
                        .map_err(|e| TransportError::Other(e.to_string()));
                }
                Ok(Message::Close(_)) => return Ok(None),
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
