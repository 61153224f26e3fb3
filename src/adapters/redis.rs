//! Minimal RESP2 client for the key-value store service.

use crate::config::backend::StoreEndpoint;
use crate::domain::ports::KeyValueStore;
use crate::utils::error::{Result, StackError};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;

const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
const MAX_DEPTH: usize = 32;
const SCAN_BATCH: &str = "100";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    fn describe(&self) -> String {
        match self {
            Self::Simple(s) => format!("simple string '{}'", s),
            Self::Error(e) => format!("error '{}'", e),
            Self::Integer(n) => format!("integer {}", n),
            Self::Bulk(None) => "null bulk string".to_string(),
            Self::Bulk(Some(_)) => "bulk string".to_string(),
            Self::Array(None) => "null array".to_string(),
            Self::Array(Some(items)) => format!("array of {}", items.len()),
        }
    }
}

/// Commands travel as arrays of bulk strings.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

async fn read_line<R: AsyncBufRead + Unpin + Send>(reader: &mut R) -> Result<String> {
    let mut line = Vec::new();
    let read = reader.read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Err(StackError::protocol("connection closed by server"));
    }
    if !line.ends_with(b"\r\n") {
        return Err(StackError::protocol("reply line is not CRLF terminated"));
    }
    line.truncate(line.len() - 2);
    String::from_utf8(line).map_err(|_| StackError::protocol("reply line is not valid UTF-8"))
}

fn parse_length(raw: &str) -> Result<Option<usize>> {
    let length: i64 = raw
        .parse()
        .map_err(|_| StackError::protocol(format!("invalid length '{}'", raw)))?;
    match length {
        -1 => Ok(None),
        n if n < -1 => Err(StackError::protocol(format!("invalid length '{}'", raw))),
        n => Ok(Some(n as usize)),
    }
}

pub fn read_value<'a, R>(reader: &'a mut R) -> Pin<Box<dyn Future<Output = Result<RespValue>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    read_nested(reader, 0)
}

fn read_nested<'a, R>(
    reader: &'a mut R,
    depth: usize,
) -> Pin<Box<dyn Future<Output = Result<RespValue>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let line = read_line(reader).await?;
        let mut chars = line.chars();
        let kind = chars.next();
        let rest = chars.as_str();

        match kind {
            Some('+') => Ok(RespValue::Simple(rest.to_string())),
            Some('-') => Ok(RespValue::Error(rest.to_string())),
            Some(':') => rest
                .parse()
                .map(RespValue::Integer)
                .map_err(|_| StackError::protocol(format!("invalid integer '{}'", rest))),
            Some('$') => match parse_length(rest)? {
                None => Ok(RespValue::Bulk(None)),
                Some(len) if len > MAX_BULK_LEN => {
                    Err(StackError::protocol(format!("bulk string of {} bytes is too large", len)))
                }
                Some(len) => {
                    let mut data = vec![0u8; len + 2];
                    reader.read_exact(&mut data).await?;
                    if !data.ends_with(b"\r\n") {
                        return Err(StackError::protocol("bulk string is not CRLF terminated"));
                    }
                    data.truncate(len);
                    Ok(RespValue::Bulk(Some(data)))
                }
            },
            Some('*') => match parse_length(rest)? {
                None => Ok(RespValue::Array(None)),
                Some(_) if depth >= MAX_DEPTH => Err(StackError::protocol(format!(
                    "arrays nested deeper than {} levels",
                    MAX_DEPTH
                ))),
                Some(len) => {
                    let mut items = Vec::with_capacity(len.min(1024));
                    for _ in 0..len {
                        items.push(read_nested(reader, depth + 1).await?);
                    }
                    Ok(RespValue::Array(Some(items)))
                }
            },
            _ => Err(StackError::protocol(format!("unknown reply type in '{}'", line))),
        }
    })
}

pub struct RedisConnection {
    stream: BufStream<TcpStream>,
    timeout: Duration,
}

impl RedisConnection {
    /// Connects, authenticates, selects the database and checks with PING.
    pub async fn connect(
        endpoint: &StoreEndpoint,
        credentials: Option<(Option<String>, String)>,
        timeout: Duration,
    ) -> Result<Self> {
        if endpoint.tls {
            return Err(StackError::ConfigError {
                message: format!("TLS connections to {} are not supported", endpoint),
            });
        }

        let stream = tokio::time::timeout(
            timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| StackError::TimeoutError {
            operation: format!("connect to {}", endpoint),
        })??;
        stream.set_nodelay(true)?;

        let mut connection = Self {
            stream: BufStream::new(stream),
            timeout,
        };

        if let Some((username, password)) = credentials {
            let reply = match username {
                Some(username) => connection.call(&["AUTH", &username, &password]).await?,
                None => connection.call(&["AUTH", &password]).await?,
            };
            expect_ok(reply)?;
        }

        if let Some(database) = endpoint.database.as_deref().filter(|db| *db != "0") {
            expect_ok(connection.call(&["SELECT", database]).await?)?;
        }

        match connection.call(&["PING"]).await? {
            RespValue::Simple(pong) if pong == "PONG" => Ok(connection),
            other => Err(StackError::protocol(format!(
                "unexpected PING reply: {}",
                other.describe()
            ))),
        }
    }

    /// Sends one command; server error replies are turned into errors.
    pub async fn call(&mut self, args: &[&str]) -> Result<RespValue> {
        match self.raw_call(args).await? {
            RespValue::Error(message) => Err(StackError::protocol(message)),
            value => Ok(value),
        }
    }

    async fn raw_call(&mut self, args: &[&str]) -> Result<RespValue> {
        let bytes: Vec<&[u8]> = args.iter().map(|a| a.as_bytes()).collect();
        let request = encode_command(&bytes);
        let command = args.first().copied().unwrap_or_default().to_string();

        let exchange = async {
            self.stream.write_all(&request).await?;
            self.stream.flush().await?;
            read_value(&mut self.stream).await
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| StackError::TimeoutError { operation: command })?
    }
}

fn expect_ok(reply: RespValue) -> Result<()> {
    match reply {
        RespValue::Simple(ok) if ok == "OK" => Ok(()),
        other => Err(StackError::protocol(format!(
            "expected OK, got {}",
            other.describe()
        ))),
    }
}

fn into_string(reply: RespValue) -> Result<Option<String>> {
    match reply {
        RespValue::Bulk(None) => Ok(None),
        RespValue::Bulk(Some(bytes)) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        other => Err(StackError::protocol(format!(
            "expected bulk string, got {}",
            other.describe()
        ))),
    }
}

fn into_count(reply: RespValue) -> Result<i64> {
    match reply {
        RespValue::Integer(n) => Ok(n),
        other => Err(StackError::protocol(format!(
            "expected integer, got {}",
            other.describe()
        ))),
    }
}

/// Escapes glob metacharacters so `prefix` matches literally in `SCAN MATCH`.
pub fn match_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

/// Splits a `SCAN` reply into the next cursor and the batch of keys.
fn into_scan_page(reply: RespValue) -> Result<(String, Vec<String>)> {
    let mut parts = match reply {
        RespValue::Array(Some(parts)) => parts,
        other => {
            return Err(StackError::protocol(format!(
                "expected SCAN reply, got {}",
                other.describe()
            )))
        }
    };
    if parts.len() != 2 {
        return Err(StackError::protocol("SCAN reply must have two elements"));
    }
    let keys = match parts.pop() {
        Some(RespValue::Array(Some(keys))) => keys
            .into_iter()
            .map(into_string)
            .filter_map(|key| key.transpose())
            .collect::<Result<Vec<_>>>()?,
        Some(RespValue::Array(None)) => Vec::new(),
        _ => return Err(StackError::protocol("SCAN reply has no key list")),
    };
    let cursor = parts
        .pop()
        .map(into_string)
        .transpose()?
        .flatten()
        .ok_or_else(|| StackError::protocol("SCAN reply has no cursor"))?;
    Ok((cursor, keys))
}

/// Pooled RESP client; at most `max_connections` commands are in flight.
pub struct RedisStore {
    endpoint: StoreEndpoint,
    credentials: Option<(Option<String>, String)>,
    timeout: Duration,
    idle: Mutex<Vec<RedisConnection>>,
    permits: Arc<Semaphore>,
}

impl RedisStore {
    pub fn new(
        endpoint: StoreEndpoint,
        credentials: Option<(Option<String>, String)>,
        max_connections: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            timeout,
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
        }
    }

    /// Builds the pool and opens one connection to prove the server is usable.
    pub async fn connect(
        endpoint: StoreEndpoint,
        credentials: Option<(Option<String>, String)>,
        max_connections: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let store = Self::new(endpoint, credentials, max_connections, timeout);
        let connection = store.open().await?;
        store.release(connection);
        Ok(store)
    }

    pub fn endpoint(&self) -> &StoreEndpoint {
        &self.endpoint
    }

    pub fn idle_connections(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    async fn open(&self) -> Result<RedisConnection> {
        RedisConnection::connect(&self.endpoint, self.credentials.clone(), self.timeout).await
    }

    fn release(&self, connection: RedisConnection) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(connection);
        }
    }

    pub async fn execute(&self, args: &[&str]) -> Result<RespValue> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StackError::runtime("redis", "connection pool is closed"))?;

        let pooled = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let mut connection = match pooled {
            Some(connection) => connection,
            None => self.open().await?,
        };

        match connection.raw_call(args).await {
            Ok(RespValue::Error(message)) => {
                self.release(connection);
                Err(StackError::protocol(message))
            }
            Ok(value) => {
                self.release(connection);
                Ok(value)
            }
            // Transport failures leave the stream in an unknown state; drop it.
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn ping(&self) -> Result<()> {
        match self.execute(&["PING"]).await? {
            RespValue::Simple(pong) if pong == "PONG" => Ok(()),
            other => Err(StackError::protocol(format!(
                "unexpected PING reply: {}",
                other.describe()
            ))),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        into_string(self.execute(&["GET", key]).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let reply = match ttl {
            Some(ttl) => {
                let millis = ttl.as_millis().max(1).to_string();
                self.execute(&["SET", key, value, "PX", &millis]).await?
            }
            None => self.execute(&["SET", key, value]).await?,
        };
        expect_ok(reply)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(into_count(self.execute(&["DEL", key]).await?)? > 0)
    }

    async fn hset(&self, name: &str, field: &str, value: &str) -> Result<()> {
        into_count(self.execute(&["HSET", name, field, value]).await?).map(|_| ())
    }

    async fn hget(&self, name: &str, field: &str) -> Result<Option<String>> {
        into_string(self.execute(&["HGET", name, field]).await?)
    }

    async fn hdel(&self, name: &str, field: &str) -> Result<bool> {
        Ok(into_count(self.execute(&["HDEL", name, field]).await?)? > 0)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = match_pattern(prefix);
        let mut cursor = "0".to_string();
        let mut keys = BTreeSet::new();
        loop {
            let reply = self
                .execute(&[
                    "SCAN", &cursor, "MATCH", &pattern, "COUNT", SCAN_BATCH, "TYPE", "string",
                ])
                .await?;
            let (next, batch) = into_scan_page(reply)?;
            keys.extend(batch);
            if next == "0" {
                break;
            }
            cursor = next;
        }
        Ok(keys.into_iter().collect())
    }

    fn close(&self) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.clear();
        }
    }
}
