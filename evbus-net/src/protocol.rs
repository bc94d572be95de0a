//! ## evbus-net::protocol
//! **Wire messages and length-prefixed framing**
//!
//! Every exchange is one request frame followed by one reply frame. A frame
//! is a 4-byte big-endian body length followed by a JSON body. Bodies larger
//! than the configured limit are rejected on both sides.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use evbus_core::Value;

use crate::endpoint::Endpoint;
use crate::error::TransportError;

const HEADER_LEN: usize = 4;

/// RPC operations a bus exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Register,
    PushEvent,
    Query,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Register => "Register",
            Method::PushEvent => "PushEvent",
            Method::Query => "Query",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Register" => Ok(Method::Register),
            "PushEvent" => Ok(Method::PushEvent),
            "Query" => Ok(Method::Query),
            other => Err(format!("unknown method {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

/// Asks a remote bus to (stop) forward(ing) `topic` to the requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub address: String,
    pub path: String,
    /// Remote operation the forwarder invokes, always `PushEvent`.
    pub callback: String,
    pub action: Action,
    pub topic: String,
}

impl SubscribeRequest {
    pub fn subscribe(requester: &Endpoint, topic: &str) -> Self {
        Self::build(requester, topic, Action::Subscribe)
    }

    pub fn unsubscribe(requester: &Endpoint, topic: &str) -> Self {
        Self::build(requester, topic, Action::Unsubscribe)
    }

    fn build(requester: &Endpoint, topic: &str, action: Action) -> Self {
        Self {
            address: requester.address.clone(),
            path: requester.path.clone(),
            callback: Method::PushEvent.as_str().to_owned(),
            action,
            topic: topic.to_owned(),
        }
    }

    pub fn requester(&self) -> Endpoint {
        Endpoint::new(self.address.clone(), self.path.clone())
    }
}

/// A published event replayed on a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPush {
    pub args: Vec<Value>,
    pub topic: String,
    /// Identities of the nodes that already dispatched this event.
    #[serde(default)]
    pub trail: Vec<String>,
}

/// Remote query: the callee appends an output reference to `args`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub topic: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Call {
    Register(SubscribeRequest),
    PushEvent(EventPush),
    Query(QueryRequest),
}

impl Call {
    pub fn method(&self) -> Method {
        match self {
            Call::Register(_) => Method::Register,
            Call::PushEvent(_) => Method::PushEvent,
            Call::Query(_) => Method::Query,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub path: String,
    pub call: Call,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    UnknownPath,
    UnknownMethod,
    /// The callee's role does not serve the method.
    Unsupported,
    /// An output-parameter handler was reached by a forwarded event.
    UnsupportedPattern,
    Dispatch,
    BadRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum RpcReply {
    Ack(bool),
    Value(Option<Value>),
    Error(RemoteError),
}

impl<T> From<Result<T, RemoteError>> for RpcReply
where
    T: Into<RpcReply>,
{
    fn from(result: Result<T, RemoteError>) -> Self {
        match result {
            Ok(reply) => reply.into(),
            Err(error) => RpcReply::Error(error),
        }
    }
}

impl From<bool> for RpcReply {
    fn from(ack: bool) -> Self {
        RpcReply::Ack(ack)
    }
}

impl From<Option<Value>> for RpcReply {
    fn from(value: Option<Value>) -> Self {
        RpcReply::Value(value)
    }
}

/// Serializes `msg` into a complete frame.
pub fn frame_message<T: Serialize>(msg: &T, max_frame_bytes: usize) -> Result<BytesMut, TransportError> {
    let body = serde_json::to_vec(msg)?;
    if body.len() > max_frame_bytes || body.len() > u32::MAX as usize {
        return Err(TransportError::FrameTooLarge {
            size: body.len(),
            limit: max_frame_bytes,
        });
    }
    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
    frame.put_u32(body.len() as u32);
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub async fn write_frame<W, T>(writer: &mut W, msg: &T, max_frame_bytes: usize) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = frame_message(msg, max_frame_bytes)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. `Ok(None)` means the peer closed the stream between frames.
pub async fn read_frame<R, T>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<T>, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame_bytes {
        return Err(TransportError::FrameTooLarge {
            size: len,
            limit: max_frame_bytes,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 64 * 1024;

    #[test]
    fn frame_header_is_big_endian_body_length() {
        let frame = frame_message(&RpcReply::Ack(true), LIMIT).unwrap();
        let body = &frame[HEADER_LEN..];
        assert_eq!(&frame[..HEADER_LEN], &(body.len() as u32).to_be_bytes());
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(body).unwrap(),
            serde_json::json!({ "status": "ack", "body": true })
        );
    }

    #[test]
    fn calls_are_tagged_by_method_name() {
        let request = RpcRequest {
            path: "/_server_bus_".into(),
            call: Call::Register(SubscribeRequest::subscribe(
                &Endpoint::new(":2015", "/_client_bus_"),
                "main:calculator",
            )),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["call"]["method"], "Register");
        assert_eq!(json["call"]["params"]["callback"], "PushEvent");
        assert_eq!(json["call"]["params"]["action"], "subscribe");
        assert_eq!(request.call.method(), Method::Register);
    }

    #[test]
    fn push_without_trail_decodes_with_empty_trail() {
        let push: EventPush = serde_json::from_str(r#"{"args":[],"topic":"t"}"#).unwrap();
        assert!(push.trail.is_empty());
    }

    #[test]
    fn method_names_parse() {
        assert_eq!("PushEvent".parse::<Method>(), Ok(Method::PushEvent));
        assert!("Publish".parse::<Method>().is_err());
    }

    #[test]
    fn oversized_frames_are_refused_before_sending() {
        let push = EventPush {
            args: vec![Value::Str("x".repeat(2048))],
            topic: "big".into(),
            trail: Vec::new(),
        };
        assert!(matches!(
            frame_message(&push, 1024),
            Err(TransportError::FrameTooLarge { limit: 1024, .. })
        ));
    }

    #[tokio::test]
    async fn frames_survive_a_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let request = RpcRequest {
            path: "/_bus_".into(),
            call: Call::PushEvent(EventPush {
                args: vec![Value::Int(20), Value::Int(10)],
                topic: "main:calculator".into(),
                trail: vec!["127.0.0.1:2010/_server_bus_".into()],
            }),
        };
        write_frame(&mut a, &request, LIMIT).await.unwrap();
        drop(a);

        let received: Option<RpcRequest> = read_frame(&mut b, LIMIT).await.unwrap();
        assert_eq!(received, Some(request));
        let eof: Option<RpcRequest> = read_frame(&mut b, LIMIT).await.unwrap();
        assert_eq!(eof, None);
    }

    #[tokio::test]
    async fn oversized_header_is_rejected_on_read() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(LIMIT as u32 + 1).to_be_bytes()).await.unwrap();
        let result: Result<Option<RpcReply>, _> = read_frame(&mut b, LIMIT).await;
        assert!(matches!(result, Err(TransportError::FrameTooLarge { .. })));
    }
}
