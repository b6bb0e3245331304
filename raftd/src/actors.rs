//! Binds a TCP listener for one node and forwards every frame it receives into that node's
//! mailbox. Senders open one connection per message and close it immediately after writing
//! (see `transport::send_message`), so a connection's read loop here runs at most once before
//! observing EOF — but nothing on this side assumes that, in case a future sender pipelines.

use crate::transport;
use raft::NodeHandle;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, warn};

pub async fn bind(addr: SocketAddr, handle: NodeHandle) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tokio::spawn(accept_loop(listener, handle));
    Ok(())
}

async fn accept_loop(listener: TcpListener, handle: NodeHandle) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                error!(error = %err, "accept failed");
                continue;
            }
        };
        tokio::spawn(handle_connection(stream, peer, handle.clone()));
    }
}

async fn handle_connection(mut stream: tokio::net::TcpStream, peer: SocketAddr, handle: NodeHandle) {
    loop {
        match transport::read_frame(&mut stream).await {
            Ok(Some(message)) => {
                if handle.send(message).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                warn!(%peer, error = %err, "connection read error");
                return;
            }
        }
    }
}
