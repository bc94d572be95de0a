//! Inbound side: one accept loop per bound address, routing each request to
//! the service mounted under its path.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::RpcService;
use crate::error::TransportError;
use crate::protocol::{read_frame, write_frame, RemoteError, RemoteErrorKind, RpcReply, RpcRequest};

type Routes = Arc<RwLock<HashMap<String, Arc<dyn RpcService>>>>;

struct ListenerInner {
    local_addr: SocketAddr,
    routes: Routes,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ListenerInner {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// Shared handle to a bound listener. Clones refer to the same socket and
/// route table, so several buses can be mounted on one address.
#[derive(Clone)]
pub struct RpcListener {
    inner: Arc<ListenerInner>,
}

impl std::fmt::Debug for RpcListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcListener")
            .field("local_addr", &self.inner.local_addr)
            .field("paths", &self.paths())
            .finish()
    }
}

impl RpcListener {
    pub async fn bind(address: &str, max_frame_bytes: usize) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| TransportError::Bind {
                address: address.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let routes: Routes = Arc::default();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&routes),
            shutdown_rx,
            max_frame_bytes,
        ));
        info!(%local_addr, "RPC listener bound");

        Ok(Self {
            inner: Arc::new(ListenerInner {
                local_addr,
                routes,
                shutdown,
                accept_task: Mutex::new(Some(task)),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Routes requests for `path` to `service`. Returns false if the path is
    /// already taken.
    pub fn mount(&self, path: &str, service: Arc<dyn RpcService>) -> bool {
        let mut routes = self.inner.routes.write();
        if routes.contains_key(path) {
            return false;
        }
        routes.insert(path.to_owned(), service);
        debug!(path, addr = %self.inner.local_addr, "Mounted service");
        true
    }

    pub fn unmount(&self, path: &str) -> bool {
        self.inner.routes.write().remove(path).is_some()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.inner.routes.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn is_running(&self) -> bool {
        !*self.inner.shutdown.borrow()
    }

    /// Stops accepting, closes open connections and releases the socket.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let task = self.inner.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(%error, "Accept loop ended abnormally");
            }
            info!(addr = %self.inner.local_addr, "RPC listener closed");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    routes: Routes,
    mut shutdown: watch::Receiver<bool>,
    max_frame_bytes: usize,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!(%peer, "Accepted connection");
                    tokio::spawn(serve_connection(
                        stream,
                        Arc::clone(&routes),
                        shutdown.clone(),
                        max_frame_bytes,
                    ));
                }
                Err(error) => warn!(%error, "Accept failed"),
            },
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    routes: Routes,
    mut shutdown: watch::Receiver<bool>,
    max_frame_bytes: usize,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            frame = read_frame::<_, RpcRequest>(&mut stream, max_frame_bytes) => frame,
        };

        let request = match frame {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(error) => {
                debug!(%error, "Unreadable request frame");
                let reply = RpcReply::Error(RemoteError::new(
                    RemoteErrorKind::BadRequest,
                    error.to_string(),
                ));
                let _ = write_frame(&mut stream, &reply, max_frame_bytes).await;
                break;
            }
        };

        let reply = route(&routes, request).await;
        if let Err(error) = write_frame(&mut stream, &reply, max_frame_bytes).await {
            debug!(%error, "Reply could not be written");
            break;
        }
    }
}

async fn route(routes: &Routes, request: RpcRequest) -> RpcReply {
    let service = routes.read().get(&request.path).cloned();
    match service {
        Some(service) => service.dispatch(request.call).await,
        None => RpcReply::Error(RemoteError::new(
            RemoteErrorKind::UnknownPath,
            format!("no bus mounted at {}", request.path),
        )),
    }
}
