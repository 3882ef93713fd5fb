//! RESP2 client for Redis-compatible servers

mod codec;

pub use codec::{encode_command, parse_frame, Frame, FrameDecoder};

use std::fmt;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Decoder;
use tracing::debug;

use super::{KeyType, StoreClient, StoreError, StoreResult, Ttl, WriteOp};
use crate::uri::ConnectionSpec;

/// A single TCP connection with its read buffer
struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
    decoder: FrameDecoder,
}

impl Connection {
    async fn write_commands(&mut self, commands: &[Vec<Bytes>]) -> StoreResult<()> {
        let mut out = BytesMut::new();
        for args in commands {
            encode_command(args, &mut out);
        }
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> StoreResult<Frame> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buffer)? {
                return Ok(frame);
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(StoreError::ConnectionClosed);
            }
        }
    }
}

/// Client for one database on a Redis-compatible server.
///
/// Commands are serialized over a single connection.
pub struct RespClient {
    spec: ConnectionSpec,
    conn: Mutex<Connection>,
}

impl fmt::Debug for RespClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RespClient")
            .field("spec", &self.spec)
            .finish()
    }
}

fn cmd(name: &'static str) -> Vec<Bytes> {
    vec![Bytes::from_static(name.as_bytes())]
}

fn key_cmd(name: &'static str, key: &[u8]) -> Vec<Bytes> {
    vec![
        Bytes::from_static(name.as_bytes()),
        Bytes::copy_from_slice(key),
    ]
}

fn num(n: impl ToString) -> Bytes {
    Bytes::from(n.to_string())
}

/// Command arguments for a write operation
fn write_command(op: WriteOp) -> Vec<Bytes> {
    match op {
        WriteOp::Set { key, value } => vec![Bytes::from_static(b"SET"), key, value],
        WriteOp::RPush { key, elements } => {
            let mut args = vec![Bytes::from_static(b"RPUSH"), key];
            args.extend(elements);
            args
        }
        WriteOp::LPush { key, elements } => {
            let mut args = vec![Bytes::from_static(b"LPUSH"), key];
            args.extend(elements);
            args
        }
        WriteOp::LPop { key } => vec![Bytes::from_static(b"LPOP"), key],
        WriteOp::SAdd { key, members } => {
            let mut args = vec![Bytes::from_static(b"SADD"), key];
            args.extend(members);
            args
        }
        WriteOp::SRem { key, members } => {
            let mut args = vec![Bytes::from_static(b"SREM"), key];
            args.extend(members);
            args
        }
        WriteOp::HSet { key, fields } => {
            // HMSET accepts multiple pairs on every server version
            let mut args = vec![Bytes::from_static(b"HMSET"), key];
            for (field, value) in fields {
                args.push(field);
                args.push(value);
            }
            args
        }
        WriteOp::ZAdd { key, entries } => {
            let mut args = vec![Bytes::from_static(b"ZADD"), key];
            for (score, member) in entries {
                args.push(num(score));
                args.push(member);
            }
            args
        }
        WriteOp::Expire { key, ttl } => {
            vec![Bytes::from_static(b"EXPIRE"), key, num(ttl.as_secs())]
        }
        WriteOp::Restore {
            key,
            ttl_ms,
            payload,
        } => vec![Bytes::from_static(b"RESTORE"), key, num(ttl_ms), payload],
    }
}

/// Extract a field from `INFO` output
fn parse_info_field(info: &str, field: &str) -> Option<String> {
    let prefix = format!("{}:", field);
    info.lines()
        .find_map(|line| line.strip_prefix(&prefix))
        .map(|v| v.trim().to_string())
}

/// Pair up a flat `[member, score, member, score, ...]` reply
fn pair_scores(flat: Vec<Bytes>) -> StoreResult<Vec<(Bytes, f64)>> {
    if flat.len() % 2 != 0 {
        return Err(StoreError::Protocol("odd-length WITHSCORES reply".into()));
    }
    let mut out = Vec::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(member), Some(score)) = (iter.next(), iter.next()) {
        let score = std::str::from_utf8(&score)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| {
                StoreError::Protocol(format!(
                    "invalid score: {}",
                    String::from_utf8_lossy(&score)
                ))
            })?;
        out.push((member, score));
    }
    Ok(out)
}

fn pair_fields(flat: Vec<Bytes>) -> StoreResult<Vec<(Bytes, Bytes)>> {
    if flat.len() % 2 != 0 {
        return Err(StoreError::Protocol("odd-length HGETALL reply".into()));
    }
    let mut out = Vec::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        out.push((field, value));
    }
    Ok(out)
}

impl RespClient {
    /// Connect, authenticate and select the database named by `spec`.
    pub async fn connect(spec: ConnectionSpec) -> StoreResult<Self> {
        debug!(endpoint = %spec.identity(), "connecting");
        let stream = TcpStream::connect((spec.host.as_str(), spec.port)).await?;
        stream.set_nodelay(true)?;

        let client = Self {
            spec,
            conn: Mutex::new(Connection {
                stream,
                buffer: BytesMut::with_capacity(16 * 1024),
                decoder: FrameDecoder::new(),
            }),
        };

        if let Some(password) = &client.spec.password {
            let mut args = cmd("AUTH");
            if let Some(user) = &client.spec.username {
                args.push(Bytes::from(user.clone()));
            }
            args.push(Bytes::from(password.clone()));
            client.call(args).await?.into_result()?;
        }
        if client.spec.db != 0 {
            client
                .call(vec![Bytes::from_static(b"SELECT"), num(client.spec.db)])
                .await?
                .into_result()?;
        }
        Ok(client)
    }

    /// Connection parameters this client was opened with
    pub fn spec(&self) -> &ConnectionSpec {
        &self.spec
    }

    /// Send one command and read its reply
    pub async fn call(&self, args: Vec<Bytes>) -> StoreResult<Frame> {
        let mut conn = self.conn.lock().await;
        conn.write_commands(std::slice::from_ref(&args)).await?;
        conn.read_frame().await
    }

    /// Send several commands in one write and read all replies in order
    pub async fn call_pipelined(&self, commands: Vec<Vec<Bytes>>) -> StoreResult<Vec<Frame>> {
        let mut conn = self.conn.lock().await;
        conn.write_commands(&commands).await?;
        let mut replies = Vec::with_capacity(commands.len());
        for _ in 0..commands.len() {
            replies.push(conn.read_frame().await?);
        }
        Ok(replies)
    }
}

#[async_trait]
impl StoreClient for RespClient {
    fn identity(&self) -> String {
        self.spec.identity()
    }

    fn supports_pipelining(&self) -> bool {
        true
    }

    async fn ping(&self) -> StoreResult<()> {
        self.call(cmd("PING")).await?.into_result()?;
        Ok(())
    }

    async fn server_version(&self) -> StoreResult<String> {
        let mut args = cmd("INFO");
        args.push(Bytes::from_static(b"server"));
        let info = self.call(args).await?.into_text()?;
        parse_info_field(&info, "redis_version")
            .ok_or_else(|| StoreError::Protocol("INFO reply has no redis_version".into()))
    }

    async fn key_type(&self, key: &[u8]) -> StoreResult<KeyType> {
        let reply = self.call(key_cmd("TYPE", key)).await?.into_text()?;
        Ok(KeyType::from_reply(&reply))
    }

    async fn ttl(&self, key: &[u8]) -> StoreResult<Ttl> {
        let secs = self.call(key_cmd("TTL", key)).await?.into_integer()?;
        Ok(Ttl::from_secs_reply(secs))
    }

    async fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        self.call(key_cmd("GET", key)).await?.into_bulk()
    }

    async fn lrange_all(&self, key: &[u8]) -> StoreResult<Vec<Bytes>> {
        let mut args = key_cmd("LRANGE", key);
        args.push(Bytes::from_static(b"0"));
        args.push(Bytes::from_static(b"-1"));
        self.call(args).await?.into_bulk_array()
    }

    async fn smembers(&self, key: &[u8]) -> StoreResult<Vec<Bytes>> {
        self.call(key_cmd("SMEMBERS", key)).await?.into_bulk_array()
    }

    async fn hgetall(&self, key: &[u8]) -> StoreResult<Vec<(Bytes, Bytes)>> {
        let flat = self.call(key_cmd("HGETALL", key)).await?.into_bulk_array()?;
        pair_fields(flat)
    }

    async fn zrange_with_scores(&self, key: &[u8]) -> StoreResult<Vec<(Bytes, f64)>> {
        let mut args = key_cmd("ZRANGE", key);
        args.push(Bytes::from_static(b"0"));
        args.push(Bytes::from_static(b"-1"));
        args.push(Bytes::from_static(b"WITHSCORES"));
        let flat = self.call(args).await?.into_bulk_array()?;
        pair_scores(flat)
    }

    async fn dump(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        self.call(key_cmd("DUMP", key)).await?.into_bulk()
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<Bytes>> {
        self.call(key_cmd("KEYS", pattern.as_bytes()))
            .await?
            .into_bulk_array()
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<Bytes>)> {
        let args = vec![
            Bytes::from_static(b"SCAN"),
            num(cursor),
            Bytes::from_static(b"MATCH"),
            Bytes::copy_from_slice(pattern.as_bytes()),
            Bytes::from_static(b"COUNT"),
            num(count),
        ];
        let mut parts = self.call(args).await?.into_array()?.into_iter();
        let (Some(next), Some(keys)) = (parts.next(), parts.next()) else {
            return Err(StoreError::Protocol("SCAN reply must have two elements".into()));
        };
        let next = next.into_text()?;
        let next = next
            .parse::<u64>()
            .map_err(|_| StoreError::Protocol(format!("invalid SCAN cursor: {}", next)))?;
        Ok((next, keys.into_bulk_array()?))
    }

    async fn dbsize(&self) -> StoreResult<u64> {
        let n = self.call(cmd("DBSIZE")).await?.into_integer()?;
        Ok(n.max(0) as u64)
    }

    async fn random_key(&self) -> StoreResult<Option<Bytes>> {
        self.call(cmd("RANDOMKEY")).await?.into_bulk()
    }

    async fn execute(&self, op: WriteOp) -> StoreResult<()> {
        self.call(write_command(op)).await?.into_result()?;
        Ok(())
    }

    async fn pipeline(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        let commands = ops.into_iter().map(write_command).collect();
        // Every reply is read before reporting, so the connection stays in sync
        let replies = self.call_pipelined(commands).await?;
        for reply in replies {
            reply.into_result()?;
        }
        Ok(())
    }
}
