//! TCP listener and acceptor.
//!
//! Accepts connections, stamps each with a fresh id, admits it into the
//! client pool and spawns a handler task for it. While the pool is full the
//! acceptor waits for a slot instead of accepting further connections; no
//! connection is ever dropped for lack of space.

use crate::config::Config;
use crate::connection::ConnectionRecord;
use crate::console::{Notice, NoticeSender};
use crate::handler::handle_client;
use crate::id::IdAllocator;
use crate::pool::{ClientPool, PoolEntry};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace};

/// Pending-connection backlog of the listening socket.
const LISTEN_BACKLOG: i32 = 10;

/// State shared by the acceptor and every connection handler.
pub struct ServerState {
    pub pool: ClientPool,
    pub ids: IdAllocator,
    /// Connections currently inside a handler. Bookkeeping only.
    pub active: AtomicUsize,
    pub name_size: usize,
    pub message_size: usize,
    notices: NoticeSender,
}

impl ServerState {
    pub fn new(
        capacity: usize,
        first_id: u64,
        name_size: usize,
        message_size: usize,
        notices: NoticeSender,
    ) -> Self {
        Self {
            pool: ClientPool::new(capacity),
            ids: IdAllocator::new(first_id),
            active: AtomicUsize::new(0),
            name_size,
            message_size,
            notices,
        }
    }

    /// Publish a line for the operator, waiting while the console is behind.
    pub async fn notify(&self, notice: Notice) {
        if let Err(e) = self.notices.send(notice).await {
            trace!(id = %e.0.id(), "Console closed, notice dropped");
        }
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    /// Bind the listening socket. Must be called inside a tokio runtime.
    pub async fn bind(config: &Config, notices: NoticeSender) -> io::Result<Self> {
        let addr: SocketAddr = config
            .listen_addr()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let listener = TcpListener::from_std(create_listener(addr)?)?;
        info!(address = %listener.local_addr()?, capacity = config.capacity, "Server listening");

        let state = ServerState::new(
            config.capacity,
            config.first_id,
            config.name_size,
            config.message_size,
            notices,
        );

        Ok(Server {
            listener,
            state: Arc::new(state),
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[cfg(test)]
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, address) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            let Some(id) = self.state.ids.allocate() else {
                error!(peer = %address, "Client id space exhausted, closing connection");
                continue;
            };
            debug!(%id, peer = %address, "New connection");

            let entry = PoolEntry::new(id, address);
            if !self.state.pool.try_add(entry.clone()) {
                let holders: Vec<_> = self
                    .state
                    .pool
                    .snapshot()
                    .into_iter()
                    .map(|(_, held)| held.id.get())
                    .collect();
                info!(
                    %id,
                    peer = %address,
                    capacity = self.state.pool.capacity(),
                    ?holders,
                    "Client pool full, waiting for a free slot"
                );
                self.state.pool.admit(entry).await?;
            }
            debug!(%id, slot = ?self.state.pool.slot_of(id), "Client admitted");

            let record = ConnectionRecord::new(id, address, stream);
            tokio::spawn(handle_client(record, Arc::clone(&self.state)));
        }
    }
}

/// Create a listening socket with address and port reuse enabled.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{self, NoticeReceiver, NOTICE_BACKLOG};
    use crate::id::ClientId;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::time::{sleep, timeout};

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config(capacity: usize) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            capacity,
            name_size: 32,
            message_size: 2048,
            first_id: 10,
            workers: None,
            log_level: "info".to_string(),
        }
    }

    async fn start(capacity: usize) -> (SocketAddr, Arc<ServerState>, NoticeReceiver) {
        let (tx, rx) = console::channel(NOTICE_BACKLOG);
        let server = Server::bind(&test_config(capacity), tx).await.unwrap();
        let addr = server.local_addr().unwrap();
        let state = server.state();
        tokio::spawn(server.run());
        (addr, state, rx)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(WAIT, async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn next_notice(rx: &mut NoticeReceiver) -> Notice {
        timeout(WAIT, rx.recv())
            .await
            .expect("no notice in time")
            .expect("console channel closed")
    }

    /// Connect, send the name, and wait for the join notice.
    async fn join(
        addr: SocketAddr,
        name: &str,
        rx: &mut NoticeReceiver,
    ) -> (TcpStream, ClientId) {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(name.as_bytes()).await.unwrap();
        match next_notice(rx).await {
            Notice::Joined { id, name: joined } => {
                assert_eq!(joined, name);
                (client, id)
            }
            other => panic!("unexpected notice: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_join_message_exit() {
        let (addr, state, mut rx) = start(4).await;

        let (mut client, id) = join(addr, "alice", &mut rx).await;
        assert_eq!(id.get(), 10);
        assert!(state.pool.contains(id));

        client.write_all(b"hello\n").await.unwrap();
        assert_eq!(next_notice(&mut rx).await.to_string(), ">hello");

        client.write_all(b"exit").await.unwrap();
        assert_eq!(
            next_notice(&mut rx).await,
            Notice::Left {
                id,
                name: "alice".into()
            }
        );

        wait_until(|| !state.pool.contains(id)).await;
        wait_until(|| state.active_count() == 0).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abrupt_disconnect() {
        let (addr, state, mut rx) = start(4).await;

        let (client, _) = join(addr, "bob", &mut rx).await;
        drop(client);

        assert_eq!(next_notice(&mut rx).await.to_string(), "<<<bob has left>>>");
        wait_until(|| state.pool.is_empty()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_admits_up_to_capacity() {
        let (addr, state, mut rx) = start(4).await;

        let mut clients = Vec::new();
        let mut ids = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let (client, id) = join(addr, name, &mut rx).await;
            clients.push(client);
            ids.push(id);
        }

        let raw: Vec<u64> = ids.iter().map(|id| id.get()).collect();
        assert_eq!(raw, vec![10, 11, 12, 13]);
        assert_eq!(state.pool.len(), 4);
        assert_eq!(state.active_count(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_full_pool_defers_admission() {
        let (addr, state, mut rx) = start(2).await;

        let (mut a, a_id) = join(addr, "A", &mut rx).await;
        let (_b, b_id) = join(addr, "B", &mut rx).await;
        assert_eq!((a_id.get(), b_id.get()), (10, 11));
        let a_slot = state.pool.slot_of(a_id).unwrap();

        let mut c = TcpStream::connect(addr).await.unwrap();
        c.write_all(b"C").await.unwrap();

        // C is accepted but held back while A and B occupy the pool
        sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
        let held: Vec<ClientId> = state.pool.snapshot().into_iter().map(|(_, e)| e.id).collect();
        assert_eq!(held, vec![a_id, b_id]);

        a.write_all(b"exit").await.unwrap();
        assert_eq!(next_notice(&mut rx).await.to_string(), "<<<A has left>>>");

        let c_id = match next_notice(&mut rx).await {
            Notice::Joined { id, name } => {
                assert_eq!(name, "C");
                id
            }
            other => panic!("unexpected notice: {other:?}"),
        };
        assert_eq!(c_id.get(), 12);
        assert_eq!(state.pool.slot_of(c_id), Some(a_slot));
        assert!(state.pool.contains(b_id));
        drop(c);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_connections_are_independent() {
        let (addr, _state, mut rx) = start(4).await;

        let (mut a, a_id) = join(addr, "A", &mut rx).await;
        let (mut b, b_id) = join(addr, "B", &mut rx).await;

        b.write_all(b"from b\n").await.unwrap();
        assert_eq!(
            next_notice(&mut rx).await,
            Notice::Message {
                id: b_id,
                text: "from b".into()
            }
        );

        a.write_all(b"from a\n").await.unwrap();
        assert_eq!(
            next_notice(&mut rx).await,
            Notice::Message {
                id: a_id,
                text: "from a".into()
            }
        );
    }
}
