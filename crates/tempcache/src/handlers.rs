//! Request handlers: one Store action and one response per request

use crate::error::Result;
use crate::store::Store;
use crate::types::{as_millis, Operation};
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Readable byte source for `putObjectByStream`
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// A named operation with its parameters
pub enum Request {
    GetFile {
        key: String,
    },
    GetFilePath {
        key: String,
    },
    GetStream {
        key: String,
    },
    BumpObject {
        key: String,
    },
    PutObjectByFile {
        key: String,
        src_path: PathBuf,
        /// Falls back to the service's default initial life
        initial_life: Option<Duration>,
    },
    PutObjectByStream {
        key: String,
        source: ByteStream,
        initial_life: Option<Duration>,
    },
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::GetFile { .. } => Operation::GetFile,
            Request::GetFilePath { .. } => Operation::GetFilePath,
            Request::GetStream { .. } => Operation::GetStream,
            Request::BumpObject { .. } => Operation::BumpObject,
            Request::PutObjectByFile { .. } => Operation::PutObjectByFile,
            Request::PutObjectByStream { .. } => Operation::PutObjectByStream,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Request::GetFile { key }
            | Request::GetFilePath { key }
            | Request::GetStream { key }
            | Request::BumpObject { key }
            | Request::PutObjectByFile { key, .. }
            | Request::PutObjectByStream { key, .. } => key,
        }
    }

    /// Parameters as reported in telemetry. Streams are not described.
    pub fn params(&self) -> serde_json::Value {
        match self {
            Request::PutObjectByFile {
                key,
                src_path,
                initial_life,
            } => json!({
                "key": key,
                "srcPath": src_path,
                "initialLife": initial_life.map(as_millis),
            }),
            Request::PutObjectByStream {
                key, initial_life, ..
            } => json!({
                "key": key,
                "initialLife": initial_life.map(as_millis),
            }),
            _ => json!({ "key": self.key() }),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation(), self.params())
    }
}

/// Success payloads
#[derive(Debug)]
pub enum Response {
    Bytes(Vec<u8>),
    Path(PathBuf),
    Stream(tokio::fs::File),
    Ack,
}

/// Run `request` against the store
pub async fn handle(store: &Store, request: Request, default_life: Duration) -> Result<Response> {
    match request {
        Request::GetFile { key } => store.read_bytes(&key).await.map(Response::Bytes),
        Request::GetFilePath { key } => store.read_path(&key).await.map(Response::Path),
        Request::GetStream { key } => store.open_stream(&key).await.map(Response::Stream),
        Request::BumpObject { key } => store.bump(&key).await.map(|_| Response::Ack),
        Request::PutObjectByFile {
            key,
            src_path,
            initial_life,
        } => {
            let life = initial_life.unwrap_or(default_life);
            store.put_file(&key, &src_path, life).await?;
            Ok(Response::Ack)
        }
        Request::PutObjectByStream {
            key,
            mut source,
            initial_life,
        } => {
            let life = initial_life.unwrap_or(default_life);
            store.put_stream(&key, &mut source, life).await?;
            Ok(Response::Ack)
        }
    }
}
