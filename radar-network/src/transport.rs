//! TCP dialing and the version handshake

use crate::config::PoolConfig;
use crate::error::{NetworkError, NetworkResult};
use crate::message::{read_message, version_message, write_message};
use bitcoin::p2p::message::NetworkMessage;
use bitcoin::p2p::message_network::VersionMessage;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Open a TCP connection within the configured connect timeout
pub async fn dial(address: SocketAddr, config: &PoolConfig) -> NetworkResult<TcpStream> {
    let stream = timeout(config.connect_timeout(), TcpStream::connect(address))
        .await
        .map_err(|_| NetworkError::Timeout)??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Exchange `version`/`verack` with the remote side.
///
/// Returns the peer's version message once both sides have acknowledged.
pub async fn handshake(
    stream: &mut TcpStream,
    address: SocketAddr,
    config: &PoolConfig,
) -> NetworkResult<VersionMessage> {
    let magic = config.network.magic();
    let nonce = rand::random::<u64>();

    let exchange = async {
        write_message(stream, magic, version_message(config, address, nonce)).await?;

        let mut peer_version = None;
        let mut acknowledged = false;
        loop {
            match read_message(stream, magic).await {
                Ok(NetworkMessage::Version(version)) => {
                    if version.nonce == nonce {
                        return Err(NetworkError::Handshake("connected to self".to_string()));
                    }
                    write_message(stream, magic, NetworkMessage::Verack).await?;
                    peer_version = Some(version);
                }
                Ok(NetworkMessage::Verack) => acknowledged = true,
                Ok(NetworkMessage::Ping(nonce)) => {
                    write_message(stream, magic, NetworkMessage::Pong(nonce)).await?;
                }
                Ok(other) => trace!(command = %other.cmd(), "Ignoring message during handshake"),
                Err(NetworkError::Encoding(e)) => debug!("Undecodable message during handshake: {}", e),
                Err(e) => return Err(e),
            }

            if acknowledged {
                if let Some(version) = peer_version.take() {
                    return Ok(version);
                }
            }
        }
    };

    timeout(config.handshake_timeout(), exchange)
        .await
        .map_err(|_| NetworkError::Timeout)?
}

/// Dial and handshake in one step
pub async fn connect(
    address: SocketAddr,
    config: &PoolConfig,
) -> NetworkResult<(TcpStream, VersionMessage)> {
    let mut stream = dial(address, config).await?;
    let version = handshake(&mut stream, address, config).await?;
    debug!(
        peer = %address,
        user_agent = %version.user_agent,
        height = version.start_height,
        "Handshake complete"
    );
    Ok((stream, version))
}
