use std::error::Error as StdError;
use std::fmt::Display;
use std::io::Error as IoError;

use chrono::ParseError as ChronoError;
use opus::Error as OpusError;
use reqwest::Error as ReqwestError;
use serde_json::Error as JsonError;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Engine-wide `Result` alias type.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Engine-wide error type.
#[derive(Debug)]
pub enum Error {
    /// A `reqwest` crate error
    Reqwest(ReqwestError),
    /// A `chrono` crate error
    Chrono(ChronoError),
    /// A `serde_json` crate error
    Json(JsonError),
    /// A `tungstenite` crate error
    WebSocket(WsError),
    /// A `std::io` module error
    Io(IoError),
    /// An error in the Opus library
    Opus(OpusError),
    /// A websocket connection was closed, possibly with a close code and message
    Closed(Option<u16>, String),
    /// A json decoding error, with a description and the offending value
    Decode(&'static str, Value),
    /// A generic non-success response from the REST API
    Status(reqwest::StatusCode, Option<Value>),
    /// A rate limit error, with how many seconds to wait before retrying
    RateLimited(u64),
    /// A malformed frame or an unexpected message on one of the gateways
    Protocol(&'static str),
    /// A local invariant violation, e.g. a referenced entity missing from the store
    State(&'static str),
    /// A miscellaneous error, with a description
    Other(&'static str),
}

impl Error {
    #[doc(hidden)]
    pub async fn from_response(response: reqwest::Response) -> Error {
        let status = response.status();

        let value = response
            .bytes()
            .await
            .ok()
            .and_then(|b| serde_json::from_slice(&b).ok());

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            if let Some(Value::Object(ref map)) = value {
                if let Some(delay) = map.get("retry_after").and_then(|v| v.as_u64()) {
                    return Error::RateLimited(delay);
                }
            }
        }
        Error::Status(status, value)
    }
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Error {
        Error::Io(err)
    }
}

impl From<ReqwestError> for Error {
    fn from(err: ReqwestError) -> Error {
        Error::Reqwest(err)
    }
}

impl From<ChronoError> for Error {
    fn from(err: ChronoError) -> Error {
        Error::Chrono(err)
    }
}

impl From<JsonError> for Error {
    fn from(err: JsonError) -> Error {
        Error::Json(err)
    }
}

impl From<WsError> for Error {
    fn from(err: WsError) -> Error {
        Error::WebSocket(err)
    }
}

impl From<OpusError> for Error {
    fn from(err: OpusError) -> Error {
        Error::Opus(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        match *self {
            Error::Reqwest(ref inner) => inner.fmt(f),
            Error::Chrono(ref inner) => inner.fmt(f),
            Error::Json(ref inner) => inner.fmt(f),
            Error::WebSocket(ref inner) => inner.fmt(f),
            Error::Io(ref inner) => inner.fmt(f),
            Error::Opus(ref inner) => inner.fmt(f),
            Error::Closed(code, ref message) => match code {
                Some(code) => write!(f, "Connection closed ({}): {}", code, message),
                None => write!(f, "Connection closed: {}", message),
            },
            Error::Decode(msg, _) => write!(f, "Decode error: {}", msg),
            Error::Status(status, _) => f.write_str(
                status
                    .canonical_reason()
                    .unwrap_or("Unknown bad HTTP status"),
            ),
            Error::RateLimited(secs) => write!(f, "Rate limited for {}s", secs),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::State(msg) => write!(f, "State error: {}", msg),
            Error::Other(msg) => f.write_str(msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self {
            Error::Reqwest(ref inner) => Some(inner),
            Error::Chrono(ref inner) => Some(inner),
            Error::Json(ref inner) => Some(inner),
            Error::WebSocket(ref inner) => Some(inner),
            Error::Io(ref inner) => Some(inner),
            Error::Opus(ref inner) => Some(inner),
            _ => None,
        }
    }
}

