//! Redis coordination back-end
//!
//! Coordinates through any Redis-compatible server with a hand-rolled RESP
//! client. The mutex is a `SET NX PX` key carrying a per-session token; a
//! background task refreshes the TTL while the lock is held, so a crashed
//! agent loses the lock one TTL after its last refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;

use super::{DEFAULT_DIAL_TIMEOUT, DEFAULT_OP_TIMEOUT, MUTEX_NAME, Storage};
use crate::error::{Error, Result};

/// Single RESP reply relevant to the coordination protocol.
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
}

pub struct RedisStorage {
    inner: Arc<Inner>,
}

struct Inner {
    addr: String,
    token: String,
    ttl_ms: u64,
    conn: Mutex<Option<BufStream<TcpStream>>>,
    held: AtomicBool,
}

impl RedisStorage {
    pub async fn connect(
        bootstrap: &str,
        ttl: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let addr = bootstrap
            .split(',')
            .map(str::trim)
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Storage("empty bootstrap".to_string()))?
            .to_string();

        let inner = Arc::new(Inner {
            addr,
            token: session_token(),
            ttl_ms: ttl.as_millis() as u64,
            conn: Mutex::new(None),
            held: AtomicBool::new(false),
        });

        // Fail fast when the coordination service is unreachable.
        {
            let mut conn = inner.conn.lock().await;
            inner.ensure_conn(&mut conn).await?;
        }

        // Refresh the lock TTL while held; release the lock on shutdown.
        let keepalive = inner.clone();
        tokio::spawn(async move {
            let period = (ttl / 3).max(Duration::from_millis(500));
            let mut tick = interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        if keepalive.held.load(Ordering::Acquire) {
                            let _ = keepalive.unlock_guarded().await;
                        }
                        return;
                    }
                    _ = tick.tick() => {
                        if keepalive.held.load(Ordering::Acquire) {
                            keepalive.refresh_lease().await;
                        }
                    }
                }
            }
        });

        Ok(Self { inner })
    }
}

impl Inner {
    async fn ensure_conn<'a>(
        &self,
        guard: &'a mut Option<BufStream<TcpStream>>,
    ) -> Result<&'a mut BufStream<TcpStream>> {
        if guard.is_none() {
            log::debug!("connecting to {}", self.addr);
            let stream = timeout(DEFAULT_DIAL_TIMEOUT, TcpStream::connect(&self.addr))
                .await
                .map_err(|_| Error::Storage(format!("dial timeout: {}", self.addr)))?
                .map_err(|e| Error::Storage(format!("dial {}: {}", self.addr, e)))?;
            *guard = Some(BufStream::new(stream));
        }
        match guard.as_mut() {
            Some(stream) => Ok(stream),
            None => Err(Error::Storage("no connection".to_string())),
        }
    }

    /// Send one command and read one reply. The connection is dropped on any
    /// I/O error so the next call re-dials.
    async fn command(&self, args: &[&[u8]]) -> Result<Reply> {
        let mut guard = self.conn.lock().await;
        let stream = self.ensure_conn(&mut guard).await?;

        let payload = encode_command(args);
        let io = async {
            stream.write_all(&payload).await?;
            stream.flush().await?;
            read_reply(stream).await
        };
        match io.await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }

    async fn refresh_lease(&self) {
        let ttl = self.ttl_ms.to_string();
        let result = timeout(
            DEFAULT_OP_TIMEOUT,
            self.command(&[b"PEXPIRE", MUTEX_NAME.as_bytes(), ttl.as_bytes()]),
        )
        .await;
        match result {
            Ok(Ok(Reply::Integer(1))) => {}
            Ok(Ok(Reply::Integer(_))) => {
                log::error!("mutex lease expired before refresh");
                self.held.store(false, Ordering::Release);
            }
            Ok(Ok(reply)) => log::error!("unexpected refresh reply: {:?}", reply),
            Ok(Err(e)) => log::error!("lease refresh error: {}", e),
            Err(_) => log::error!("lease refresh timeout"),
        }
    }

    /// Delete the lock key only when it still carries this session's token.
    async fn unlock_guarded(&self) -> Result<()> {
        self.held.store(false, Ordering::Release);
        let owner = match self.command(&[b"GET", MUTEX_NAME.as_bytes()]).await? {
            Reply::Bulk(owner) => owner,
            reply => return Err(Error::Storage(format!("unexpected reply: {:?}", reply))),
        };
        if owner.as_deref() != Some(self.token.as_bytes()) {
            return Err(Error::Storage(
                "mutex is not held by this session".to_string(),
            ));
        }
        match self.command(&[b"DEL", MUTEX_NAME.as_bytes()]).await? {
            Reply::Integer(_) => Ok(()),
            reply => Err(Error::Storage(format!("unexpected reply: {:?}", reply))),
        }
    }
}

#[async_trait::async_trait]
impl Storage for RedisStorage {
    async fn mutex_try_lock(&self) -> Result<bool> {
        log::trace!("trying to lock");
        if self.inner.held.load(Ordering::Acquire) {
            return Ok(true);
        }

        let ttl = self.inner.ttl_ms.to_string();
        let result = timeout(
            DEFAULT_OP_TIMEOUT,
            self.inner.command(&[
                b"SET",
                MUTEX_NAME.as_bytes(),
                self.inner.token.as_bytes(),
                b"NX",
                b"PX",
                ttl.as_bytes(),
            ]),
        )
        .await;

        match result {
            Ok(Ok(Reply::Simple(s))) if s == "OK" => {
                self.inner.held.store(true, Ordering::Release);
                log::trace!("locked");
                Ok(true)
            }
            // Nil reply: the mutex is held by another session.
            Ok(Ok(Reply::Bulk(None))) => Ok(false),
            Ok(Ok(reply)) => Err(Error::Storage(format!("unexpected reply: {:?}", reply))),
            Ok(Err(e)) => {
                log::error!("lock error: {}", e);
                Err(e)
            }
            // Deadline exceeded is contention, not an error.
            Err(_) => Ok(false),
        }
    }

    async fn mutex_unlock(&self) -> Result<()> {
        log::trace!("unlocking");
        timeout(DEFAULT_OP_TIMEOUT, self.inner.unlock_guarded())
            .await
            .map_err(|_| Error::Storage("unlock timeout".to_string()))?
            .map_err(|e| {
                log::error!("unlock error: {}", e);
                e
            })
    }

    async fn dictionary_put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        log::trace!("dictionary put");
        let reply = timeout(
            DEFAULT_OP_TIMEOUT,
            self.inner.command(&[b"SET", key, value]),
        )
        .await
        .map_err(|_| Error::Storage("put timeout".to_string()))??;
        match reply {
            Reply::Simple(s) if s == "OK" => Ok(()),
            reply => Err(Error::Storage(format!("unexpected reply: {:?}", reply))),
        }
    }

    async fn dictionary_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        log::trace!("dictionary get");
        let reply = timeout(DEFAULT_OP_TIMEOUT, self.inner.command(&[b"GET", key]))
            .await
            .map_err(|_| Error::Storage("get timeout".to_string()))??;
        match reply {
            Reply::Bulk(value) => Ok(value),
            reply => Err(Error::Storage(format!("unexpected reply: {:?}", reply))),
        }
    }

    async fn dictionary_remove(&self, key: &[u8]) -> Result<()> {
        log::trace!("dictionary remove");
        let reply = timeout(DEFAULT_OP_TIMEOUT, self.inner.command(&[b"DEL", key]))
            .await
            .map_err(|_| Error::Storage("remove timeout".to_string()))??;
        match reply {
            Reply::Integer(_) => Ok(()),
            reply => Err(Error::Storage(format!("unexpected reply: {:?}", reply))),
        }
    }
}

/// Encode a command as a RESP array of bulk strings.
fn encode_command(args: &[&[u8]]) -> BytesMut {
    let mut out = BytesMut::with_capacity(64);
    out.put_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.put_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
    out
}

/// Read a single reply from the stream.
async fn read_reply<S>(stream: &mut S) -> Result<Reply>
where
    S: AsyncBufReadExt + AsyncReadExt + Unpin,
{
    let mut line = String::new();
    let n = stream
        .read_line(&mut line)
        .await
        .map_err(|e| Error::Storage(format!("read error: {}", e)))?;
    if n == 0 {
        return Err(Error::Storage("connection closed".to_string()));
    }
    let line = line.trim_end();

    match line.as_bytes().first() {
        Some(b'+') => Ok(Reply::Simple(line[1..].to_string())),
        Some(b'-') => Ok(Reply::Error(line[1..].to_string())),
        Some(b':') => line[1..]
            .parse()
            .map(Reply::Integer)
            .map_err(|_| Error::Storage(format!("bad integer reply: {}", line))),
        Some(b'$') => {
            let len: i64 = line[1..]
                .parse()
                .map_err(|_| Error::Storage(format!("bad bulk header: {}", line)))?;
            if len < 0 {
                return Ok(Reply::Bulk(None));
            }
            let mut buf = vec![0u8; len as usize + 2];
            stream
                .read_exact(&mut buf)
                .await
                .map_err(|e| Error::Storage(format!("read error: {}", e)))?;
            buf.truncate(len as usize);
            Ok(Reply::Bulk(Some(buf)))
        }
        _ => Err(Error::Storage(format!("unexpected reply: {}", line))),
    }
}

/// Session token carried by the lock key; unique per agent process.
fn session_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{}-{:x}", std::process::id(), nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command() {
        let out = encode_command(&[b"SET", b"pg", b"token", b"NX", b"PX", b"5000"]);
        assert_eq!(
            &out[..],
            b"*6\r\n$3\r\nSET\r\n$2\r\npg\r\n$5\r\ntoken\r\n$2\r\nNX\r\n$2\r\nPX\r\n$4\r\n5000\r\n"
        );
    }

    #[tokio::test]
    async fn test_read_simple_and_integer() {
        let mut input: &[u8] = b"+OK\r\n:1\r\n";
        assert_eq!(
            read_reply(&mut input).await.unwrap(),
            Reply::Simple("OK".to_string())
        );
        assert_eq!(read_reply(&mut input).await.unwrap(), Reply::Integer(1));
    }

    #[tokio::test]
    async fn test_read_bulk() {
        let mut input: &[u8] = b"$5\r\nhello\r\n$-1\r\n";
        assert_eq!(
            read_reply(&mut input).await.unwrap(),
            Reply::Bulk(Some(b"hello".to_vec()))
        );
        assert_eq!(read_reply(&mut input).await.unwrap(), Reply::Bulk(None));
    }

    #[tokio::test]
    async fn test_read_error_reply() {
        let mut input: &[u8] = b"-ERR unknown command\r\n";
        assert_eq!(
            read_reply(&mut input).await.unwrap(),
            Reply::Error("ERR unknown command".to_string())
        );
    }

    #[test]
    fn test_session_tokens_are_unique() {
        assert_ne!(session_token(), session_token());
    }
}
