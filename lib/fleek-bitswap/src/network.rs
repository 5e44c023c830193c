use std::fmt::Debug;
use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

/// Callback invoked for every incoming stream on a registered protocol.
pub type InboundHandler<S> = Arc<dyn Fn(S) -> BoxFuture<'static, ()> + Send + Sync>;

/// Stream transport towards remote peers.
///
/// Connection setup, encryption and multiplexing all live behind this trait.
#[trait_variant::make(Network: Send)]
pub trait _Network: Send + Sync + 'static {
    type Peer: Clone + Debug + Send + Sync + 'static;
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Opens a new outgoing stream to `peer` speaking `protocol`.
    async fn open_stream(&self, peer: &Self::Peer, protocol: &str) -> io::Result<Self::Stream>;

    fn register_handler(&self, protocol: &str, handler: InboundHandler<Self::Stream>);
}
