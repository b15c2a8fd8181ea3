//! A live TCP link to one peer

use crate::config::PoolConfig;
use crate::error::{NetworkError, NetworkResult, StopReason};
use crate::message::{read_message, write_message};
use crate::subscriber::{Handler, Subscriber};
use crate::traits::{ConnectionId, PeerConnection};
use bitcoin::p2p::message::NetworkMessage;
use bitcoin::p2p::Magic;
use radar_core::InventoryMessage;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Called with the channel id once the link has gone down
pub type CloseHook = Box<dyn FnOnce(ConnectionId) + Send + 'static>;

/// A peer connection driven by a reader task and a writer task
pub struct TcpChannel {
    id: ConnectionId,
    address: SocketAddr,
    user_agent: String,
    outbound: mpsc::UnboundedSender<NetworkMessage>,
    inventory: Subscriber<InventoryMessage>,
    connected: AtomicBool,
    cancel: CancellationToken,
}

impl TcpChannel {
    /// Take over a handshaken stream and start its I/O tasks
    pub fn spawn(
        id: ConnectionId,
        address: SocketAddr,
        stream: TcpStream,
        user_agent: String,
        config: &PoolConfig,
        runtime: &Handle,
        on_close: CloseHook,
    ) -> Arc<Self> {
        let (reader, writer) = stream.into_split();
        Self::spawn_io(id, address, reader, writer, user_agent, config, runtime, on_close)
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_io<R, W>(
        id: ConnectionId,
        address: SocketAddr,
        reader: R,
        writer: W,
        user_agent: String,
        config: &PoolConfig,
        runtime: &Handle,
        on_close: CloseHook,
    ) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, queue) = mpsc::unbounded_channel();
        let magic = config.network.magic();
        let channel = Arc::new(Self {
            id,
            address,
            user_agent,
            outbound,
            inventory: Subscriber::new(runtime.clone(), config.backlog_capacity),
            connected: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        });

        runtime.spawn(write_loop(writer, queue, magic, channel.cancel.clone()));
        runtime.spawn(read_loop(Arc::clone(&channel), reader, magic, on_close));
        channel
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Queue a message for the writer task
    pub fn send(&self, message: NetworkMessage) -> NetworkResult<()> {
        if !self.is_connected() {
            return Err(NetworkError::ChannelStopped);
        }
        self.outbound
            .send(message)
            .map_err(|_| NetworkError::ChannelStopped)
    }

    /// Tear the link down. Inventory subscribers receive `ChannelStopped`.
    pub fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!(peer = %self.address, id = self.id, "Closing channel");
        }
        self.cancel.cancel();
        self.inventory.stop(StopReason::ChannelClosed);
    }
}

impl PeerConnection for TcpChannel {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote(&self) -> String {
        self.address.to_string()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe_next_inventory(&self, handler: Handler<InventoryMessage>) {
        self.inventory.subscribe(handler);
    }
}

async fn read_loop<R>(channel: Arc<TcpChannel>, mut reader: R, magic: Magic, on_close: CloseHook)
where
    R: AsyncRead + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = channel.cancel.cancelled() => break,
            message = read_message(&mut reader, magic) => message,
        };

        match message {
            Ok(NetworkMessage::Inv(inventory)) => {
                channel
                    .inventory
                    .relay(InventoryMessage::from(inventory.as_slice()));
            }
            Ok(NetworkMessage::Ping(nonce)) => {
                let _ = channel.send(NetworkMessage::Pong(nonce));
            }
            Ok(other) => trace!(peer = %channel.address, command = %other.cmd(), "Unhandled message"),
            Err(NetworkError::Encoding(e)) => {
                debug!(peer = %channel.address, "Skipping undecodable message: {}", e)
            }
            Err(e) => {
                debug!(peer = %channel.address, "Channel read failed: {}", e);
                break;
            }
        }
    }

    channel.close();
    on_close(channel.id);
}

async fn write_loop<W>(
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<NetworkMessage>,
    magic: Magic,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = queue.recv() => message,
        };

        let Some(message) = message else { break };
        if let Err(e) = write_message(&mut writer, magic, message).await {
            debug!("Channel write failed: {}", e);
            cancel.cancel();
            break;
        }
    }
}
