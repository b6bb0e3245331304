//! Length-prefixed JSON framing over TCP: a 4-byte big-endian length followed by that many
//! bytes of `serde_json`-encoded [`Message`].

use raft::{MalformedMessage, Message};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Opens a fresh connection to `addr`, writes one framed message, and closes it. Matches the
/// source's one-shot `sendall` per outbound message rather than pooling connections.
pub async fn send_message(addr: SocketAddr, message: &Message) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    write_frame(&mut stream, message).await
}

pub async fn write_frame(stream: &mut TcpStream, message: &Message) -> std::io::Result<()> {
    let body = serde_json::to_vec(message)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    stream.write_all(&(body.len() as u32).to_be_bytes()).await?;
    stream.write_all(&body).await?;
    Ok(())
}

/// Reads one framed message from `stream`, or `None` on a clean EOF before any bytes arrive or
/// on a malformed frame (logged at `debug` and dropped, per the `MalformedMessage` taxonomy —
/// a bad frame from one peer must not take down the connection handler).
pub async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Option<Message>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    match serde_json::from_slice(&body) {
        Ok(message) => Ok(Some(message)),
        Err(err) => {
            debug!(error = %MalformedMessage::from(err), "dropping malformed frame");
            Ok(None)
        }
    }
}
