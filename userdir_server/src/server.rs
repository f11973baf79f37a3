//! A tokio powered websocket server for the user directory.
//!
//! One task accepts connections and spawns a task per client. Each client
//! task owns a [Session] and handles that client's messages strictly in
//! arrival order; store I/O runs on the blocking pool, so a slow store only
//! delays the connection that asked for it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WSMessage;
use userdir_common::network::default_server_host;
use userdir_common::DEFAULT_PAGE_SIZE;

use crate::session::Session;
use crate::store::RecordStore;

pub struct ServerOptions {
    /// Address to listen on
    pub host: String,
    /// Location of the JSON record file
    pub store_path: PathBuf,
    /// Records per page
    pub page_size: usize,
    /// How long a store read may take before the request fails
    pub read_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            store_path: PathBuf::from("data/Users.json"),
            page_size: DEFAULT_PAGE_SIZE,
            read_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Unable to bind to {host}: {source}")]
    Bind {
        host: String,
        source: std::io::Error,
    },
    #[error("Unable to find local address: {0}")]
    LocalAddress(std::io::Error),
}

/// Public entry point to the server process.
///
/// Runs until ctrl-c is received.
///
/// # Example
///
/// ```rust,ignore
/// let opts = ServerOptions::default();
/// let store = Arc::new(JsonFileStore::new(&opts.store_path));
///
/// server_main(opts, store).await?;
/// ```
pub async fn server_main<S: RecordStore>(
    opts: ServerOptions,
    store: Arc<S>,
) -> Result<(), ServerError> {
    let listener = listen(&opts).await?;

    let (stop_tx, _stop_rx) = broadcast::channel::<u8>(1);

    let watcher = tokio::spawn(shutdown_watcher(stop_tx.clone()));

    serve(listener, opts, store, stop_tx).await?;

    watcher.abort();

    log::debug!("Server is done.");

    Ok(())
}

/// Construct a listening socket
pub async fn listen(opts: &ServerOptions) -> Result<TcpListener, ServerError> {
    TcpListener::bind(&opts.host)
        .await
        .map_err(|source| ServerError::Bind {
            host: opts.host.clone(),
            source,
        })
}

async fn shutdown_watcher(stop_tx: broadcast::Sender<u8>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        log::info!("Interrupt received, stopping server");
        let _ = stop_tx.send(1);
    }
}

/// Accept clients on an existing listener until a stop is broadcast.
pub async fn serve<S: RecordStore>(
    listener: TcpListener,
    opts: ServerOptions,
    store: Arc<S>,
    stop_tx: broadcast::Sender<u8>,
) -> Result<(), ServerError> {
    let local_addy = listener.local_addr().map_err(ServerError::LocalAddress)?;

    log::info!("User directory server accepting clients @ {local_addy}");

    let opts = Arc::new(opts);

    client_connect_task(listener, opts, store, stop_tx).await;

    Ok(())
}

// Task that waits for a new client to connect and spawns a new client
// handler task
async fn client_connect_task<S: RecordStore>(
    listener: TcpListener,
    opts: Arc<ServerOptions>,
    store: Arc<S>,
    stop_tx: broadcast::Sender<u8>,
) {
    log::debug!("Starting client connect task");

    let mut stop_rx = stop_tx.subscribe();

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            acc = listener.accept() => {
                match acc {
                    Ok((stream, _)) => {
                        let session = Session::new(
                            uuid::Uuid::new_v4(),
                            store.clone(),
                            &opts,
                        );
                        tokio::spawn(client_handler(
                            stream,
                            session,
                            stop_tx.subscribe(),
                        ));
                    }
                    Err(e) => log::warn!("Unable to accept client: {e}"),
                }
            }
        }
    }

    log::debug!("Stopping client connect task");
}

/// Task for each client that has joined up
async fn client_handler<S: RecordStore>(
    stream: TcpStream,
    session: Session<S>,
    mut stop_rx: broadcast::Receiver<u8>,
) {
    let client_id = session.id();

    let addr = match stream.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(_) => "unknown".to_string(),
    };

    let websocket = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            log::warn!("Handshake with {addr} failed: {e}");
            return;
        }
    };

    log::info!("Client connected: {addr} as {client_id}");

    let (mut tx, mut rx) = websocket.split();

    // replies are queued so a slow socket never holds up request handling
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WSMessage>();

    let writer = tokio::spawn(async move {
        while let Some(data) = out_rx.recv().await {
            if let Err(e) = tx.send(data).await {
                log::debug!("Client {client_id} socket closed on send: {e}");
                break;
            }
        }
        let _ = tx.close().await;
        log::debug!("Ending per-client data-forwarder");
    });

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,

            message = rx.next() => {
                let message = match message {
                    None => break,
                    Some(Ok(x)) => x,
                    Some(Err(error)) => {
                        log::warn!("Client {client_id} dropped: {error}");
                        break;
                    }
                };

                match message {
                    WSMessage::Text(text) => {
                        match session.handle_next(text.as_str()).await {
                            Ok(reply) => {
                                let _ = out_tx.send(WSMessage::text(reply.to_text()));
                            }
                            Err(e) => {
                                log::warn!("Ignoring message from {client_id}: {e}");
                            }
                        }
                    }
                    WSMessage::Binary(x) => {
                        log::warn!(
                            "Client {client_id} sent {} binary bytes, which is not supported. Ignoring.",
                            x.len()
                        );
                    }
                    WSMessage::Close(_) => {
                        log::debug!("Client {client_id} sent close...");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    drop(out_tx);

    let _ = writer.await;

    log::info!("Client disconnected: {client_id}");
}
