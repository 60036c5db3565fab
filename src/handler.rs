//! Connection handler.
//!
//! One handler task owns one [`ConnectionRecord`] from hand-off until the
//! client leaves. It reads the display name, then surfaces every received
//! message to the operator until the client exits, disconnects or errors,
//! and finally releases its pool slot and closes the socket.
//!
//! Receive errors never escape the handler; they end this connection only.

use crate::connection::{classify, display_name, ConnState, ConnectionRecord, Inbound};
use crate::console::Notice;
use crate::server::ServerState;
use bytes::BytesMut;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, trace, warn};

/// Drive one client connection to completion.
pub async fn handle_client<S>(mut record: ConnectionRecord<S>, state: Arc<ServerState>)
where
    S: AsyncRead + Unpin,
{
    let id = record.id;
    let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
    debug!(%id, peer = %record.address, active, "Handler started");

    let mut buffer = BytesMut::zeroed(state.name_size.max(state.message_size));

    match record.stream.read(&mut buffer[..state.name_size]).await {
        Ok(n) => {
            let name = display_name(&buffer[..n]);
            state.pool.set_name(id, &name);
            state
                .notify(Notice::Joined {
                    id,
                    name: name.clone(),
                })
                .await;
            info!(%id, peer = %record.address, name = %name, "Client joined");
            record.activate(name);
        }
        Err(e) => {
            warn!(%id, error = %e, "Handshake receive failed");
            state.notify(Notice::ReceiveError { id }).await;
            record.close();
        }
    }

    while record.state() == ConnState::Active {
        let received = match record.stream.read(&mut buffer[..state.message_size]).await {
            Ok(n) => classify(&buffer[..n]),
            Err(e) => {
                warn!(%id, error = %e, "Receive failed");
                state.notify(Notice::ReceiveError { id }).await;
                record.close();
                break;
            }
        };

        match received {
            Inbound::Message(text) => state.notify(Notice::Message { id, text }).await,
            Inbound::Empty => trace!(%id, "Empty message ignored"),
            inbound @ (Inbound::Exit | Inbound::Closed) => {
                debug!(%id, reason = ?inbound, "Client leaving");
                state
                    .notify(Notice::Left {
                        id,
                        name: record.display_name.clone(),
                    })
                    .await;
                record.close();
            }
        }
    }

    state.pool.remove(id);
    record.terminate();
    drop(record);

    let active = state.active.fetch_sub(1, Ordering::SeqCst) - 1;
    info!(%id, active, pooled = state.pool.len(), "Client removed");
}
