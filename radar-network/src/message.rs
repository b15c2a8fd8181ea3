//! Bitcoin P2P wire framing
//!
//! Messages are a 24-byte header (magic, command, length, checksum) followed by the
//! payload. Framing is read here; payload decoding and checksum validation are
//! left to the `bitcoin` crate.

use crate::config::PoolConfig;
use crate::error::{NetworkError, NetworkResult};
use bitcoin::consensus::encode;
use bitcoin::p2p::address::Address;
use bitcoin::p2p::message::{NetworkMessage, RawNetworkMessage};
use bitcoin::p2p::message_network::VersionMessage;
use bitcoin::p2p::{Magic, ServiceFlags};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the message header
pub const HEADER_LEN: usize = 24;

/// Largest payload accepted from a peer
pub const MAX_PAYLOAD_LEN: usize = 32 * 1024 * 1024;

/// Read one framed message.
///
/// I/O failures and oversized frames are returned as errors that end the
/// connection. A complete frame whose payload fails to decode yields
/// [`NetworkError::Encoding`]; the stream is still aligned afterwards.
pub async fn read_message<R>(reader: &mut R, magic: Magic) -> NetworkResult<NetworkMessage>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    if header[..4] != magic.to_bytes() {
        return Err(NetworkError::Connection(format!(
            "unexpected network magic {}",
            hex_prefix(&header[..4])
        )));
    }

    let length = u32::from_le_bytes([header[16], header[17], header[18], header[19]]) as usize;
    if length > MAX_PAYLOAD_LEN {
        return Err(NetworkError::Connection(format!(
            "payload of {} bytes exceeds limit",
            length
        )));
    }

    let mut frame = vec![0u8; HEADER_LEN + length];
    frame[..HEADER_LEN].copy_from_slice(&header);
    reader.read_exact(&mut frame[HEADER_LEN..]).await?;

    let raw: RawNetworkMessage =
        encode::deserialize(&frame).map_err(|e| NetworkError::Encoding(e.to_string()))?;
    Ok(raw.payload().clone())
}

/// Frame and write one message.
pub async fn write_message<W>(
    writer: &mut W,
    magic: Magic,
    message: NetworkMessage,
) -> NetworkResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_message(magic, message)).await?;
    writer.flush().await?;
    Ok(())
}

pub fn encode_message(magic: Magic, message: NetworkMessage) -> Vec<u8> {
    encode::serialize(&RawNetworkMessage::new(magic, message))
}

/// Our `version` message for a connection to `peer`.
///
/// The relay flag is set so the peer announces unconfirmed transactions.
pub fn version_message(config: &PoolConfig, peer: SocketAddr, nonce: u64) -> NetworkMessage {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default();
    let receiver = Address::new(&peer, ServiceFlags::NONE);
    let sender = Address::new(&SocketAddr::from(([0, 0, 0, 0], 0)), ServiceFlags::NONE);

    let mut version = VersionMessage::new(
        ServiceFlags::NONE,
        timestamp,
        receiver,
        sender,
        nonce,
        config.user_agent.clone(),
        0,
    );
    version.relay = true;
    NetworkMessage::Version(version)
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash as _;
    use bitcoin::p2p::message_blockdata::Inventory;
    use bitcoin::{Network, Txid};

    #[tokio::test]
    async fn test_read_back_written_messages() {
        let magic = Network::Regtest.magic();
        let inv = NetworkMessage::Inv(vec![Inventory::Transaction(Txid::from_byte_array(
            [9u8; 32],
        ))]);

        let mut buffer = Vec::new();
        write_message(&mut buffer, magic, NetworkMessage::Verack)
            .await
            .unwrap();
        write_message(&mut buffer, magic, inv.clone()).await.unwrap();

        let mut reader = buffer.as_slice();
        assert_eq!(
            read_message(&mut reader, magic).await.unwrap(),
            NetworkMessage::Verack
        );
        assert_eq!(read_message(&mut reader, magic).await.unwrap(), inv);
        assert!(matches!(
            read_message(&mut reader, magic).await,
            Err(NetworkError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_magic_is_rejected() {
        let bytes = encode_message(Network::Bitcoin.magic(), NetworkMessage::Verack);
        let mut reader = bytes.as_slice();
        let result = read_message(&mut reader, Network::Regtest.magic()).await;
        assert!(matches!(result, Err(NetworkError::Connection(_))));
    }

    #[tokio::test]
    async fn test_bad_checksum_keeps_stream_aligned() {
        let magic = Network::Regtest.magic();
        let mut corrupt = encode_message(magic, NetworkMessage::Ping(42));
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xff;
        corrupt.extend(encode_message(magic, NetworkMessage::Pong(42)));

        let mut reader = corrupt.as_slice();
        assert!(matches!(
            read_message(&mut reader, magic).await,
            Err(NetworkError::Encoding(_))
        ));
        assert_eq!(
            read_message(&mut reader, magic).await.unwrap(),
            NetworkMessage::Pong(42)
        );
    }

    #[test]
    fn test_version_message_requests_relay() {
        let config = PoolConfig::default();
        let peer: SocketAddr = "10.0.0.1:8333".parse().unwrap();
        match version_message(&config, peer, 7) {
            NetworkMessage::Version(version) => {
                assert!(version.relay);
                assert_eq!(version.nonce, 7);
                assert_eq!(version.user_agent, config.user_agent);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
}
