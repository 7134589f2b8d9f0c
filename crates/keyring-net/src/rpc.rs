//! Agent RPC client
//!
//! One connection per tier. A writer task drains encoded requests; a reader
//! task pairs each response header with the request carrying its sequence
//! number. Stream subscriptions and queries keep their sequence number after
//! the first response and receive records under it until the query is done
//! or the connection closes.

use crate::framing::*;
use crate::tier::*;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Connection settings for one tier
#[derive(Clone, Debug)]
pub struct RpcConfig {
    /// Agent RPC address
    pub addr: String,
    /// Agent RPC auth key (empty for none)
    pub auth_key: String,
    /// Per-request timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

/// Where records for a sequence number go
enum Route {
    Events(mpsc::UnboundedSender<UserEvent>),
    Queries(mpsc::UnboundedSender<QueryRequest>),
    Responses(mpsc::UnboundedSender<NodeResponse>),
}

/// An in-flight request
struct Request {
    /// Completed by the first response header; dropped if the caller gave up
    ack: Option<oneshot::Sender<String>>,
    /// Record sink for requests that stay open after the first response
    route: Option<Route>,
    acked: bool,
}

/// State shared with the reader and writer tasks
#[derive(Default)]
struct Shared {
    requests: Mutex<HashMap<u64, Request>>,
    closed: AtomicBool,
}

impl Shared {
    /// Handle a response header. Returns true when a record body follows.
    fn on_header(&self, header: ResponseHeader) -> bool {
        let mut requests = self.requests.lock();
        let Some(request) = requests.get_mut(&header.seq) else {
            warn!("Response for unknown request {}", header.seq);
            return false;
        };

        if request.acked {
            if !header.error.is_empty() {
                warn!("Record error on request {}: {}", header.seq, header.error);
            }
            return true;
        }

        request.acked = true;
        let failed = !header.error.is_empty();
        if let Some(tx) = request.ack.take() {
            let _ = tx.send(header.error);
        }
        if failed || request.route.is_none() {
            requests.remove(&header.seq);
        }
        false
    }

    /// Deliver one record body to the request registered under `seq`
    fn deliver(&self, seq: u64, body: &[u8]) -> Result<(), FrameError> {
        let mut requests = self.requests.lock();
        let Some(route) = requests.get(&seq).and_then(|r| r.route.as_ref()) else {
            return Ok(());
        };

        let finished = match route {
            Route::Events(tx) => {
                let record: UserEventRecord = decode(body)?;
                let _ = tx.send(record.into());
                false
            }
            Route::Queries(tx) => {
                let record: QueryEventRecord = decode(body)?;
                let _ = tx.send(record.into());
                false
            }
            Route::Responses(tx) => {
                let record: QueryResponseRecord = decode(body)?;
                let done = record.is_done();
                if record.kind == RECORD_ACK {
                    debug!("Query {} acknowledged by {}", seq, record.from);
                }
                if let Some(response) = record.into_response() {
                    let _ = tx.send(response);
                }
                done
            }
        };

        if finished {
            requests.remove(&seq);
        }
        Ok(())
    }

    /// Fail every pending request and end every stream
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.requests.lock().clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Pair response headers with requests until the agent hangs up
async fn read_loop<S>(mut source: S, shared: &Shared) -> Result<(), TransportError>
where
    S: Stream<Item = Result<Bytes, FrameError>> + Unpin,
{
    while let Some(value) = source.next().await {
        let header: ResponseHeader = decode(&value?)?;
        let seq = header.seq;
        if !shared.on_header(header) {
            continue;
        }

        let body = source.next().await.ok_or(TransportError::ConnectionClosed)??;
        shared.deliver(seq, &body)?;
    }
    Ok(())
}

/// Send queued requests until the queue closes or a write fails
async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    shared: Arc<Shared>,
    label: String,
) where
    S: Sink<Bytes, Error = FrameError> + Unpin,
{
    while let Some(message) = outbound.recv().await {
        if let Err(e) = sink.send(message).await {
            warn!("{} agent write failed: {}", label, e);
            break;
        }
    }
    shared.close();
}

/// Agent RPC client implementing [`Tier`]
pub struct RpcTier {
    /// Tier label for logs
    label: String,
    outbound: mpsc::UnboundedSender<Bytes>,
    next_seq: AtomicU64,
    shared: Arc<Shared>,
    timeout: Option<Duration>,
    reader: JoinHandle<()>,
}

impl RpcTier {
    /// Connect, handshake and authenticate
    pub async fn connect(label: impl Into<String>, config: &RpcConfig) -> Result<Self, TransportError> {
        let label = label.into();
        let stream = with_timeout(config.timeout, TcpStream::connect(&config.addr)).await??;
        stream.set_nodelay(true)?;

        let (sink, source) = Framed::new(stream, MsgpackCodec::new()).split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        tokio::spawn(write_loop(sink, outbound_rx, shared.clone(), label.clone()));

        let reader = {
            let label = label.clone();
            let shared = shared.clone();
            tokio::spawn(async move {
                if let Err(e) = read_loop(source, &shared).await {
                    warn!("{} agent read failed: {}", label, e);
                }
                info!("{} agent connection closed", label);
                shared.close();
            })
        };

        let tier = Self {
            label,
            outbound,
            next_seq: AtomicU64::new(0),
            shared,
            timeout: config.timeout,
            reader,
        };

        tier.call(
            Command::Handshake,
            &HandshakeRequest {
                version: IPC_VERSION,
            },
            None,
        )
        .await?;

        if !config.auth_key.is_empty() {
            tier.call(
                Command::Auth,
                &AuthRequest {
                    auth_key: &config.auth_key,
                },
                None,
            )
            .await?;
        }

        info!("Connected to {} agent at {}", tier.label, config.addr);
        Ok(tier)
    }

    /// Send a request and wait for its first response.
    ///
    /// A route registered here stays open afterwards; it ends when the agent
    /// finishes the query or the connection closes.
    async fn call<T: serde::Serialize + Sync>(
        &self,
        command: Command,
        body: &T,
        route: Option<Route>,
    ) -> Result<(), TransportError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let message = encode_request(command, seq, body)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        self.shared.requests.lock().insert(
            seq,
            Request {
                ack: Some(ack_tx),
                route,
                acked: false,
            },
        );
        if self.shared.is_closed() {
            self.shared.requests.lock().remove(&seq);
            return Err(TransportError::ConnectionClosed);
        }

        debug!("{} -> {} (seq {})", self.label, command.as_str(), seq);
        if self.outbound.send(message).is_err() {
            self.shared.requests.lock().remove(&seq);
            return Err(TransportError::ConnectionClosed);
        }

        // On timeout the request stays registered, so a late response is
        // still paired with it and the stream stays in step.
        let error = with_timeout(self.timeout, ack_rx)
            .await?
            .map_err(|_| TransportError::ConnectionClosed)?;

        if !error.is_empty() {
            return Err(TransportError::Remote(error));
        }
        Ok(())
    }
}

impl Drop for RpcTier {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Tier for RpcTier {
    async fn stream_events(&self) -> Result<EventStream, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = StreamRequest { kind: STREAM_USER };
        self.call(Command::Stream, &request, Some(Route::Events(tx)))
            .await?;
        Ok(rx)
    }

    async fn stream_queries(&self) -> Result<QueryStream, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = StreamRequest { kind: STREAM_QUERY };
        self.call(Command::Stream, &request, Some(Route::Queries(tx)))
            .await?;
        Ok(rx)
    }

    async fn user_event(&self, event: &UserEvent) -> Result<(), TransportError> {
        let request = EventRequest {
            name: &event.name,
            payload: serde_bytes::Bytes::new(&event.payload),
            coalesce: event.coalesce,
        };
        self.call(Command::Event, &request, None).await
    }

    async fn respond(
        &self,
        id: QueryId,
        payload: Zeroizing<Vec<u8>>,
    ) -> Result<(), TransportError> {
        let request = RespondRequest {
            id: id.0,
            payload: serde_bytes::Bytes::new(&payload),
        };
        self.call(Command::Respond, &request, None).await
    }

    async fn query(&self, params: QueryParams) -> Result<ResponseStream, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = QueryCommand {
            filter_nodes: Vec::new(),
            filter_tags: BTreeMap::new(),
            request_ack: params.request_ack,
            relay_factor: 0,
            timeout: 0,
            name: &params.name,
            payload: serde_bytes::Bytes::new(&params.payload),
        };
        self.call(Command::Query, &request, Some(Route::Responses(tx)))
            .await?;
        Ok(rx)
    }
}

async fn with_timeout<F: Future>(
    timeout: Option<Duration>,
    fut: F,
) -> Result<F::Output, TransportError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransportError::Timeout),
        None => Ok(fut.await),
    }
}
