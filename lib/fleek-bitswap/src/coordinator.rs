//! Want bookkeeping for a single remote peer.
//!
//! Requests for the same multihash share one want, no matter which codec their CIDs carry. New
//! wants are queued and sent in batches after a short debounce, while the number of wants sent
//! but not yet answered stays within [`Config::max_outstanding_wants`]. A want is answered by a
//! block whose bytes hash to its key, or by a `DontHave` presence for it.
use std::collections::hash_map::Entry as MapEntry;
use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::Arc;

use bytes::Bytes;
use cid::multihash::Multihash;
use cid::Cid;
use fleek_ipld::hasher::{Hashers, IDENTITY};
use fleek_ipld::{AbortSignal, Block, BlockSource, IpldError};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, trace, warn};

use crate::codec::MessageCodec;
use crate::config::Config;
use crate::errors::BitswapError;
use crate::message::{BlockPresenceType, Entry, Message};
use crate::network::{InboundHandler, Network};

type WantKey = Multihash<64>;

struct Waiter {
    id: u64,
    cid: Cid,
    tx: oneshot::Sender<Option<Block>>,
}

struct WantRecord {
    waiters: Vec<Waiter>,
    sent: bool,
}

#[derive(Default)]
struct State {
    wants: HashMap<WantKey, WantRecord>,
    queue: VecDeque<Cid>,
    outstanding: usize,
    flush_scheduled: bool,
    next_waiter: u64,
}

impl State {
    /// Forgets a want that is no longer needed, giving back its budget if it was sent.
    fn release(&mut self, key: &WantKey, record: &WantRecord) {
        if record.sent {
            self.outstanding = self.outstanding.saturating_sub(1);
        } else {
            self.queue.retain(|cid| cid.hash() != key);
        }
    }

    fn has_sendable(&self, max_outstanding: usize) -> bool {
        !self.queue.is_empty() && self.outstanding < max_outstanding
    }
}

struct Inner<N: Network> {
    network: N,
    peer: N::Peer,
    config: Config,
    hashers: Hashers,
    state: Mutex<State>,
}

/// Fetches blocks from one peer over bitswap.
pub struct WantCoordinator<N: Network> {
    inner: Arc<Inner<N>>,
}

impl<N: Network> Clone for WantCoordinator<N> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Removes its waiter when the request finishes, is aborted or is dropped.
struct WaiterGuard<N: Network> {
    inner: Arc<Inner<N>>,
    key: WantKey,
    id: u64,
}

impl<N: Network> Drop for WaiterGuard<N> {
    fn drop(&mut self) {
        let schedule = {
            let mut state = self.inner.state.lock();
            let Some(record) = state.wants.get_mut(&self.key) else {
                return;
            };
            record.waiters.retain(|waiter| waiter.id != self.id);
            if !record.waiters.is_empty() {
                return;
            }
            let Some(record) = state.wants.remove(&self.key) else {
                return;
            };
            trace!("dropping want without waiters");
            state.release(&self.key, &record);
            record.sent && state.has_sendable(self.inner.config.max_outstanding_wants)
        };
        if schedule {
            schedule_flush(&self.inner);
        }
    }
}

fn schedule_flush<N: Network>(inner: &Arc<Inner<N>>) {
    {
        let mut state = inner.state.lock();
        if state.flush_scheduled {
            return;
        }
        state.flush_scheduled = true;
    }
    let Ok(runtime) = Handle::try_current() else {
        warn!("no runtime to schedule a wantlist flush on");
        inner.state.lock().flush_scheduled = false;
        return;
    };
    let coordinator = WantCoordinator {
        inner: inner.clone(),
    };
    let delay = inner.config.send_wantlist_delay;
    runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        coordinator.flush().await;
    });
}

impl<N: Network> WantCoordinator<N> {
    pub fn new(network: N, peer: N::Peer, config: Config) -> Self {
        Self::with_hashers(network, peer, config, Hashers::default())
    }

    pub fn with_hashers(network: N, peer: N::Peer, config: Config, hashers: Hashers) -> Self {
        Self {
            inner: Arc::new(Inner {
                network,
                peer,
                config,
                hashers,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Registers the inbound handler for the bitswap protocol on the network.
    pub fn register(&self) {
        let coordinator = self.clone();
        let handler: InboundHandler<N::Stream> =
            Arc::new(move |stream: N::Stream| -> BoxFuture<'static, ()> {
                let coordinator = coordinator.clone();
                Box::pin(async move { coordinator.handle_stream(stream).await })
            });
        self.inner
            .network
            .register_handler(&self.inner.config.protocol, handler);
    }

    /// Number of distinct wants, sent or not.
    pub fn wants(&self) -> usize {
        self.inner.state.lock().wants.len()
    }

    /// Number of wants waiting to be sent.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Number of wants sent and not answered yet.
    pub fn outstanding(&self) -> usize {
        self.inner.state.lock().outstanding
    }

    /// Asks the peer for `cid`.
    ///
    /// Resolves to `None` when the peer answers that it does not have the block. Identity CIDs
    /// are answered locally.
    pub async fn request(&self, cid: &Cid, signal: &AbortSignal) -> Result<Option<Block>, IpldError> {
        if signal.is_aborted() {
            return Err(signal.error());
        }
        let code = cid.hash().code();
        if code == IDENTITY {
            return Ok(Some(Block::new(
                *cid,
                Bytes::copy_from_slice(cid.hash().digest()),
            )));
        }
        if !self.inner.hashers.supports(code) {
            warn!("no hasher for multihash code 0x{code:x}, cannot request {cid}");
            return Err(IpldError::UnknownMultihash(code));
        }

        let key = *cid.hash();
        let (id, rx) = self.add_waiter(key, *cid);
        let _guard = WaiterGuard {
            inner: self.inner.clone(),
            key,
            id,
        };

        tokio::select! {
            result = rx => result.map_err(|_| IpldError::ProtocolError(format!("want for {cid} was dropped"))),
            _ = signal.aborted() => Err(signal.error()),
        }
    }

    fn add_waiter(&self, key: WantKey, cid: Cid) -> (u64, oneshot::Receiver<Option<Block>>) {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let id = state.next_waiter;
            state.next_waiter += 1;
            let waiter = Waiter { id, cid, tx };
            match state.wants.entry(key) {
                MapEntry::Occupied(mut entry) => {
                    entry.get_mut().waiters.push(waiter);
                    return (id, rx);
                },
                MapEntry::Vacant(entry) => {
                    entry.insert(WantRecord {
                        waiters: vec![waiter],
                        sent: false,
                    });
                    state.queue.push_back(cid);
                    id
                },
            }
        };
        trace!("queued want for {cid}");
        schedule_flush(&self.inner);
        (id, rx)
    }

    /// Sends as many queued wants as the outstanding budget allows.
    ///
    /// Normally driven by the debounce timer, but can be called directly.
    pub async fn flush(&self) {
        let batch = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.flush_scheduled = false;
            let budget = self
                .inner
                .config
                .max_outstanding_wants
                .saturating_sub(state.outstanding);
            let count = budget.min(state.queue.len());
            let batch = state.queue.drain(..count).collect::<Vec<_>>();
            for cid in &batch {
                if let Some(record) = state.wants.get_mut(cid.hash()) {
                    record.sent = true;
                }
            }
            state.outstanding += batch.len();
            batch
        };
        if batch.is_empty() {
            return;
        }

        let (messages, unsendable) = self.build_messages(batch);
        if !unsendable.is_empty() {
            self.give_up(unsendable);
        }
        if !messages.is_empty() {
            if let Err(e) = self.send(messages).await {
                error!("failed to send wantlist to {:?}: {e}", self.inner.peer);
            }
        }

        let reschedule = self
            .inner
            .state
            .lock()
            .has_sendable(self.inner.config.max_outstanding_wants);
        if reschedule {
            schedule_flush(&self.inner);
        }
    }

    /// Packs the batch into messages within the size limit. Wants that do not fit even in an
    /// empty message are returned separately.
    fn build_messages(&self, batch: Vec<Cid>) -> (Vec<Message>, Vec<Cid>) {
        let max_size = self.inner.config.max_message_size;
        let mut messages = Vec::new();
        let mut unsendable = Vec::new();
        let mut message = Message::with_max_size(max_size);
        for cid in batch {
            let mut entry = Entry::new(cid).with_send_dont_have(true);
            loop {
                match message.add_wantlist_entry(entry) {
                    Ok(()) => break,
                    Err(rejected) if !message.wantlist.is_empty() => {
                        messages.push(mem::replace(&mut message, Message::with_max_size(max_size)));
                        entry = rejected;
                    },
                    Err(rejected) => {
                        error!("want for {} does not fit in a message", rejected.cid);
                        unsendable.push(rejected.cid);
                        break;
                    },
                }
            }
        }
        if !message.wantlist.is_empty() {
            messages.push(message);
        }
        (messages, unsendable)
    }

    /// Drops the wants for `cids` and answers their waiters with `None`.
    fn give_up(&self, cids: Vec<Cid>) {
        let mut records = Vec::new();
        {
            let mut state = self.inner.state.lock();
            for cid in cids {
                let key = *cid.hash();
                if let Some(record) = state.wants.remove(&key) {
                    state.release(&key, &record);
                    records.push(record);
                }
            }
        }
        for waiter in records.into_iter().flat_map(|record| record.waiters) {
            if waiter.tx.send(None).is_err() {
                trace!("waiter for {} went away", waiter.cid);
            }
        }
    }

    async fn send(&self, messages: Vec<Message>) -> Result<(), BitswapError> {
        let stream = self
            .inner
            .network
            .open_stream(&self.inner.peer, &self.inner.config.protocol)
            .await?;
        let mut sink = FramedWrite::new(stream, MessageCodec::new(self.inner.config.max_frame_size));
        for message in messages {
            debug!(
                "sending {} wants to {:?}",
                message.wantlist.entries.len(),
                self.inner.peer
            );
            sink.send(message).await?;
        }
        sink.close().await
    }

    /// Reads messages from an incoming stream until it ends or fails.
    pub async fn handle_stream<R: AsyncRead + Unpin>(&self, stream: R) {
        let mut frames = FramedRead::new(stream, MessageCodec::new(self.inner.config.max_frame_size));
        while let Some(message) = frames.next().await {
            match message {
                Ok(message) => self.handle_message(message),
                Err(e) => {
                    error!("incoming stream from {:?} failed: {e}", self.inner.peer);
                    return;
                },
            }
        }
    }

    /// Resolves the wants answered by `message`. Blocks nobody asked for are ignored.
    pub fn handle_message(&self, message: Message) {
        let mut answers: Vec<(WantKey, Option<Bytes>)> = Vec::new();
        for payload in message.blocks {
            let prefix = payload.prefix;
            if !self.inner.hashers.supports(prefix.hash_code) {
                debug!("no hasher for multihash code 0x{:x}, dropping block", prefix.hash_code);
                continue;
            }
            match self.inner.hashers.digest(
                prefix.hash_code,
                &payload.data,
                Some(prefix.hash_len as usize),
            ) {
                Ok(key) => answers.push((key, Some(payload.data))),
                Err(e) => debug!("dropping block: {e}"),
            }
        }
        for presence in message.block_presences {
            if presence.kind == BlockPresenceType::DontHave {
                answers.push((*presence.cid.hash(), None));
            }
        }

        let mut resolved = Vec::new();
        let reschedule = {
            let mut state = self.inner.state.lock();
            for (key, data) in answers {
                let Some(record) = state.wants.remove(&key) else {
                    trace!("ignoring unwanted answer from {:?}", self.inner.peer);
                    continue;
                };
                state.release(&key, &record);
                resolved.push((record, data));
            }
            state.has_sendable(self.inner.config.max_outstanding_wants)
        };

        for (record, data) in resolved {
            for waiter in record.waiters {
                let block = data.clone().map(|data| Block::new(waiter.cid, data));
                if waiter.tx.send(block).is_err() {
                    trace!("waiter for {} went away", waiter.cid);
                }
            }
        }
        if reschedule {
            schedule_flush(&self.inner);
        }
    }
}

impl<N: Network> BlockSource for WantCoordinator<N> {
    async fn get(&self, cid: &Cid, signal: &AbortSignal) -> Result<Option<Block>, IpldError> {
        self.request(cid, signal).await
    }
}
