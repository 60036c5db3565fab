//! Operator-facing output.
//!
//! Handlers never write to stdout directly. They publish [`Notice`]s on a
//! bounded channel and a single printer task writes them out, one line each.
//! When the console falls behind, a handler waits on its next notice, so a
//! stalled stdout holds up the chatty connections instead of growing memory.
//! Diagnostics go through `tracing` on stderr instead.

use crate::id::ClientId;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

pub const BANNER: &str = "=== WELCOME TO THE CHATROOM ===";

/// Notices that may be queued ahead of the printer.
pub const NOTICE_BACKLOG: usize = 256;

/// Sending half handed to every connection handler.
pub type NoticeSender = mpsc::Sender<Notice>;
pub type NoticeReceiver = mpsc::Receiver<Notice>;

pub fn channel(backlog: usize) -> (NoticeSender, NoticeReceiver) {
    mpsc::channel(backlog)
}

/// Something the operator should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Joined { id: ClientId, name: String },
    /// Message bytes exactly as received, minus one trailing newline.
    Message { id: ClientId, text: Bytes },
    Left { id: ClientId, name: String },
    ReceiveError { id: ClientId },
}

impl Notice {
    pub fn id(&self) -> ClientId {
        match self {
            Notice::Joined { id, .. }
            | Notice::Message { id, .. }
            | Notice::Left { id, .. }
            | Notice::ReceiveError { id } => *id,
        }
    }

    /// Append the console line for this notice, newline included.
    ///
    /// Message bytes are copied verbatim, even when they are not UTF-8.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Notice::Message { text, .. } => {
                out.reserve(text.len() + 2);
                out.put_u8(b'>');
                out.put_slice(text);
            }
            other => out.put_slice(other.to_string().as_bytes()),
        }
        out.put_u8(b'\n');
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Joined { name, .. } => write!(f, "<<<{name} has joined>>>"),
            Notice::Message { text, .. } => write!(f, ">{}", String::from_utf8_lossy(text)),
            Notice::Left { name, .. } => write!(f, "<<<{name} has left>>>"),
            Notice::ReceiveError { .. } => f.write_str("ERROR: -1"),
        }
    }
}

/// Write every notice to `out` until all senders are gone.
pub async fn print_notices<W>(mut notices: NoticeReceiver, mut out: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = BytesMut::with_capacity(256);
    while let Some(notice) = notices.recv().await {
        line.clear();
        notice.encode(&mut line);
        out.write_all(&line).await?;
        out.flush().await?;
    }
    Ok(())
}
