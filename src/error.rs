use std::path::PathBuf;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{name} could not be found")]
    ProcessNotFound { name: String },

    #[error("no event handlers registered")]
    NoHandlersRegistered,

    #[error("websocket error: {0}")]
    Websocket(#[from] tungstenite::Error),

    #[error("websocket closed abnormally: {0}")]
    WebsocketClosed(String),

    #[error("subscribe was not acknowledged: {0}")]
    SubscribeAck(String),

    #[error("failed to respawn {}: {source}", path.display())]
    RespawnFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing command line flag --{0}")]
    MissingFlag(&'static str),

    #[error("invalid value for --{flag}: {value}")]
    InvalidFlag { flag: &'static str, value: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("json error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("handler for {event_type} {uri} failed: {source}")]
    Handler {
        uri: String,
        event_type: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation cancelled")]
    Cancelled,
}
