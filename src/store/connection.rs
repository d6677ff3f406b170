//! RESP3 tracking connection over TCP.
//!
//! A [`Connection`] pipelines commands through a writer task and matches
//! replies in FIFO order in a reader task. Callers only ever await a oneshot
//! reply, so dropping a caller mid-request (for instance on timeout) never
//! leaves a half-written command or an unread reply on the socket.
//!
//! The reader also applies invalidation pushes and stores tracked read replies
//! in the [`ClientSideCache`]. Both happen on the reader task in stream order,
//! so an invalidation that follows a reply can never be applied before the
//! value it invalidates is cached.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::client_cache::ClientSideCache;
use super::resp::{self, Frame};
use super::StoreError;
use crate::local_cache::Value;

const READ_BUFFER_BYTES: usize = 64 * 1024;

type Reply = Result<Frame, StoreError>;

struct Pending {
    reply: oneshot::Sender<Reply>,
    /// Key and TTL under which a bulk reply is stored client-side
    track: Option<(String, Duration)>,
}

struct Request {
    bytes: Bytes,
    pending: Pending,
}

#[derive(Default)]
struct Inflight {
    queue: VecDeque<Pending>,
    closed: bool,
}

impl Inflight {
    fn fail_all(&mut self) {
        self.closed = true;
        for pending in self.queue.drain(..) {
            let _ = pending.reply.send(Err(StoreError::Closed));
        }
    }
}

/// Pipelined connection with client-side tracking enabled.
#[derive(Debug)]
pub struct Connection {
    addr: String,
    requests: mpsc::UnboundedSender<Request>,
    shutdown: CancellationToken,
}

impl Connection {
    /// Connects, switches to RESP3 and enables client-side tracking.
    /// Invalidation pushes are applied to `cache`.
    pub async fn connect_tracking(
        addr: &str,
        cache: Arc<ClientSideCache>,
    ) -> Result<Self, StoreError> {
        let conn = Self::open(addr, cache).await?;

        match conn.request(&["HELLO", "3"], None).await? {
            Frame::Map(_) | Frame::Array(_) => {}
            other => {
                return Err(StoreError::UnexpectedReply {
                    command: "HELLO",
                    reply: other.describe(),
                })
            }
        }
        let reply = conn.request(&["CLIENT", "TRACKING", "ON"], None).await?;
        expect_ok("CLIENT TRACKING", reply)?;

        tracing::debug!(addr, "client tracking enabled");
        Ok(conn)
    }

    async fn open(addr: &str, cache: Arc<ClientSideCache>) -> Result<Self, StoreError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let (requests, receiver) = mpsc::unbounded_channel();
        let inflight = Arc::new(Mutex::new(Inflight::default()));
        let shutdown = CancellationToken::new();

        tokio::spawn(write_loop(
            write_half,
            receiver,
            Arc::clone(&inflight),
            shutdown.clone(),
        ));
        tokio::spawn(read_task(read_half, inflight, cache, shutdown.clone()));

        tracing::debug!(addr, "connected");
        Ok(Self {
            addr: addr.to_string(),
            requests,
            shutdown,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn request(
        &self,
        args: &[&str],
        track: Option<(String, Duration)>,
    ) -> Result<Frame, StoreError> {
        let mut buf = BytesMut::new();
        encode(args, &mut buf);

        let (reply, receiver) = oneshot::channel();
        self.requests
            .send(Request {
                bytes: buf.freeze(),
                pending: Pending { reply, track },
            })
            .map_err(|_| StoreError::Closed)?;

        receiver.await.map_err(|_| StoreError::Closed)?
    }

    /// GET whose reply is cached client-side for `ttl` before any later push
    /// on this connection is processed.
    pub async fn get_tracked(&self, key: &str, ttl: Duration) -> Result<Option<Value>, StoreError> {
        let track = Some((key.to_string(), ttl));
        let reply = self.request(&["GET", key], track).await?;
        bulk_value("GET", reply)
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let reply = self.request(&["SET", key, value], None).await?;
        expect_ok("SET", reply)
    }

    /// Stops both connection tasks; outstanding requests fail with
    /// [`StoreError::Closed`].
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut requests: mpsc::UnboundedReceiver<Request>,
    inflight: Arc<Mutex<Inflight>>,
    shutdown: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        {
            let mut inflight = inflight.lock();
            if inflight.closed {
                let _ = request.pending.reply.send(Err(StoreError::Closed));
                continue;
            }
            // queued before the bytes leave so the reply always finds it
            inflight.queue.push_back(request.pending);
        }

        if let Err(e) = writer.write_all(&request.bytes).await {
            tracing::warn!(error = %e, "write failed, closing connection");
            break;
        }
    }

    inflight.lock().fail_all();
    shutdown.cancel();
    let _ = writer.shutdown().await;
}

async fn read_task(
    reader: OwnedReadHalf,
    inflight: Arc<Mutex<Inflight>>,
    cache: Arc<ClientSideCache>,
    shutdown: CancellationToken,
) {
    let result = read_loop(reader, &inflight, &cache, &shutdown).await;
    if let Err(e) = result {
        if !shutdown.is_cancelled() {
            tracing::warn!(error = %e, "connection lost");
        }
    }

    // no further invalidations can arrive for what is cached
    cache.invalidate_all();
    inflight.lock().fail_all();
    shutdown.cancel();
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    inflight: &Mutex<Inflight>,
    cache: &ClientSideCache,
    shutdown: &CancellationToken,
) -> Result<(), StoreError> {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_BYTES);
    loop {
        while let Some((frame, consumed)) = resp::parse(&buf)? {
            buf.advance(consumed);
            dispatch(frame, inflight, cache)?;
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = reader.read_buf(&mut buf) => {
                if read? == 0 {
                    return Err(StoreError::Closed);
                }
            }
        }
    }
}

fn dispatch(frame: Frame, inflight: &Mutex<Inflight>, cache: &ClientSideCache) -> Result<(), StoreError> {
    if let Frame::Push(items) = frame {
        apply_push(items, cache);
        return Ok(());
    }

    let pending = inflight
        .lock()
        .queue
        .pop_front()
        .ok_or_else(|| StoreError::Protocol(format!("unsolicited reply {}", frame.describe())))?;

    let reply = match frame {
        Frame::Error(message) => Err(StoreError::Server(message)),
        frame => {
            if let (Some((key, ttl)), Frame::Bulk(bytes)) = (&pending.track, &frame) {
                if let Ok(text) = std::str::from_utf8(bytes) {
                    cache.insert(key.clone(), Value::from(text), *ttl);
                }
            }
            Ok(frame)
        }
    };

    // the caller may have given up waiting
    let _ = pending.reply.send(reply);
    Ok(())
}

fn apply_push(items: Vec<Frame>, cache: &ClientSideCache) {
    let mut items = items.into_iter();
    let kind = items.next();
    match kind.as_ref().and_then(Frame::as_text) {
        Some(kind) if kind.eq_ignore_ascii_case("invalidate") => match items.next() {
            Some(Frame::Array(keys)) => {
                for key in keys {
                    if let Some(key) = key.as_text() {
                        cache.invalidate(key);
                    }
                }
            }
            // a null key list means the whole keyspace was flushed
            _ => cache.invalidate_all(),
        },
        other => tracing::debug!(kind = ?other, "ignoring push"),
    }
}

fn encode(args: &[&str], dst: &mut BytesMut) {
    let args: Vec<&[u8]> = args.iter().map(|arg| arg.as_bytes()).collect();
    resp::encode_command(&args, dst);
}

fn expect_ok(command: &'static str, reply: Frame) -> Result<(), StoreError> {
    match reply {
        Frame::Simple(ref s) if s.eq_ignore_ascii_case("OK") => Ok(()),
        other => Err(StoreError::UnexpectedReply {
            command,
            reply: other.describe(),
        }),
    }
}

fn bulk_value(command: &'static str, reply: Frame) -> Result<Option<Value>, StoreError> {
    match reply {
        Frame::Null => Ok(None),
        Frame::Bulk(bytes) => std::str::from_utf8(&bytes)
            .map(|text| Some(Value::from(text)))
            .map_err(|e| StoreError::Protocol(format!("non utf-8 value: {e}"))),
        other => Err(StoreError::UnexpectedReply {
            command,
            reply: other.describe(),
        }),
    }
}
