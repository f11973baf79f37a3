//! Methods and structs to connect a [PaginationState] to a server.
//!
//! To run a client:
//! - Call [start_client] with the server url. The first page is requested as
//!   soon as the socket is open.
//! - Drive the returned [ClientHandle] from your presentation layer: report
//!   scroll samples, row activations, saves and cancels.
//! - Watch [ClientHandle::subscribe] for a fresh [ClientView] after every
//!   state change.
//!
//! A handle is good for one connection. When the socket closes, the state is
//! reset; connect again with [start_client] to start over from page 0.

use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite, tungstenite::Message, MaybeTlsStream,
    WebSocketStream,
};
use userdir_common::protocol::{ClientMessage, ServerMessage};
use userdir_common::record::UserID;

use crate::pagination::{
    ClientView, PaginationState, ScrollSample, Transition, UserEdit,
};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection Error: {0}")]
    ConnectionError(#[from] tungstenite::Error),

    #[error("Connection is closed")]
    Closed,
}

/// Enumeration describing outgoing messages
#[derive(Debug)]
enum OutgoingMessage {
    /// Instruct client machinery to shut down
    Close,
    /// Send a request to the server
    Request(ClientMessage),
}

/// State shared between the handles and the read task.
struct Shared {
    state: PaginationState,
    /// Taken when the connection is gone, which closes every subscription
    view_tx: Option<watch::Sender<ClientView>>,
}

impl Shared {
    fn publish(&self) {
        if let Some(tx) = &self.view_tx {
            tx.send_replace(self.state.view());
        }
    }
}

/// Handle to a running client connection.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<Mutex<Shared>>,
    output: mpsc::UnboundedSender<OutgoingMessage>,
    view_rx: watch::Receiver<ClientView>,
}

impl ClientHandle {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        // state transitions never panic midway, so a poisoned lock still
        // holds consistent state
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run an operation on the state, ship any request it produced, and
    /// publish the new snapshot.
    fn apply<R>(
        &self,
        op: impl FnOnce(&mut PaginationState) -> (R, Option<ClientMessage>),
    ) -> Result<R, ClientError> {
        let (result, request) = {
            let mut shared = self.lock();
            let out = op(&mut shared.state);
            shared.publish();
            out
        };

        if let Some(request) = request {
            self.output
                .send(OutgoingMessage::Request(request))
                .map_err(|_| ClientError::Closed)?;
        }

        Ok(result)
    }

    /// Current snapshot
    pub fn view(&self) -> ClientView {
        self.view_rx.borrow().clone()
    }

    /// Get a channel that changes whenever the state does
    pub fn subscribe(&self) -> watch::Receiver<ClientView> {
        self.view_rx.clone()
    }

    /// Wait until a snapshot satisfies `pred`.
    ///
    /// Fails with [ClientError::Closed] if the connection goes away before
    /// that happens. The final, disconnected snapshot is still offered to
    /// `pred` first.
    pub async fn wait_for<F>(&self, mut pred: F) -> Result<ClientView, ClientError>
    where
        F: FnMut(&ClientView) -> bool,
    {
        let mut rx = self.view_rx.clone();
        loop {
            {
                let view = rx.borrow_and_update();
                if pred(&view) {
                    return Ok(view.clone());
                }
            }
            rx.changed().await.map_err(|_| ClientError::Closed)?;
        }
    }

    /// Ask for the next page if nothing is loading and more may exist.
    ///
    /// Returns true if a request was sent.
    pub fn request_next_page(&self) -> Result<bool, ClientError> {
        self.apply(|s| {
            let r = s.request_next_page_if_needed();
            (r.is_some(), r)
        })
    }

    /// Report the scroll position. Returns true if a page was requested.
    pub fn scroll(&self, sample: ScrollSample) -> Result<bool, ClientError> {
        self.apply(|s| {
            let r = s.on_scroll(sample);
            (r.is_some(), r)
        })
    }

    /// Select a loaded row for editing.
    pub fn activate_row(&self, id: UserID) -> bool {
        self.apply(|s| (s.on_row_activate(id), None))
            .unwrap_or(false)
    }

    /// Send the edit for the selected row. Returns false if nothing is
    /// selected or the edit was refused; a refusal sets `last_error`.
    pub fn save_edit(&self, edit: UserEdit) -> Result<bool, ClientError> {
        self.apply(|s| {
            let r = s.on_save_edit(edit);
            (r.is_some(), r)
        })
    }

    pub fn cancel_edit(&self) {
        let _ = self.apply(|s| {
            s.on_cancel_edit();
            ((), None)
        });
    }

    /// Close the connection. The state resets once the socket is down.
    pub fn shutdown(&self) {
        let _ = self.output.send(OutgoingMessage::Close);
    }
}

/// Connect to a server and start the client machinery.
///
/// Returns a handle to drive the client, and a task that finishes when the
/// connection is gone.
pub async fn start_client(
    url: &url::Url,
) -> Result<(ClientHandle, JoinHandle<()>), ClientError> {
    info!("Connecting to {url}...");

    let (ws_stream, _) = connect_async(url.as_str()).await?;

    info!("Connected to {url}");

    let (socket_tx, socket_rx) = ws_stream.split();

    let (output, from_client_rx) = mpsc::unbounded_channel();

    let (view_tx, view_rx) = watch::channel(ClientView::default());

    let handle = ClientHandle {
        shared: Arc::new(Mutex::new(Shared {
            state: PaginationState::new(),
            view_tx: Some(view_tx),
        })),
        output,
        view_rx,
    };

    let forwarder = tokio::spawn(forward_task(from_client_rx, socket_tx));

    handle.apply(|s| {
        s.on_open();
        ((), None)
    })?;

    // load the first page right away
    handle.request_next_page()?;

    let reader_handle = handle.clone();
    let task = tokio::spawn(async move {
        read_task(socket_rx, &reader_handle).await;

        reader_handle.apply_close();
        reader_handle.shutdown();

        let _ = forwarder.await;

        debug!("Client system done.");
    });

    Ok((handle, task))
}

impl ClientHandle {
    fn apply_close(&self) {
        let mut shared = self.lock();
        shared.state.on_close();
        shared.publish();
        shared.view_tx = None;
    }

    fn apply_response(&self, message: ServerMessage) {
        let mut shared = self.lock();
        match shared.state.handle_message(message) {
            Transition::PageAppended { page, count } => {
                debug!("Page {page}: {count} users");
            }
            Transition::ReachedEnd => debug!("All users loaded"),
            Transition::RecordUpdated { id, found } => {
                debug!("User {id} updated (loaded: {found})");
            }
            Transition::Failed(reason) => warn!("Error from server: {reason}"),
        }
        shared.publish();
    }
}

type SocketRx = futures_util::stream::SplitStream<
    WebSocketStream<MaybeTlsStream<TcpStream>>,
>;

/// Feed server messages into the state until the socket closes.
async fn read_task(mut socket_rx: SocketRx, handle: &ClientHandle) {
    debug!("Starting client read task");

    while let Some(msg) = socket_rx.next().await {
        let msg = match msg {
            Ok(x) => x,
            Err(e) => {
                warn!("Connection lost: {e}");
                break;
            }
        };

        match msg {
            Message::Text(text) => match ServerMessage::parse(text.as_str()) {
                Ok(message) => handle.apply_response(message),
                Err(e) => warn!("Failed to parse message from server: {e}"),
            },
            Message::Close(_) => {
                debug!("Server closed the connection");
                break;
            }
            _ => {}
        }
    }

    debug!("Ending client read task");
}

/// Task that sends requests from the client to the socket.
async fn forward_task(
    mut input: mpsc::UnboundedReceiver<OutgoingMessage>,
    mut socket_out: SplitSink<
        WebSocketStream<MaybeTlsStream<TcpStream>>,
        Message,
    >,
) {
    debug!("Starting forwarding task");

    while let Some(msg) = input.recv().await {
        match msg {
            OutgoingMessage::Close => {
                let _ = socket_out.close().await;
                break;
            }
            OutgoingMessage::Request(x) => {
                if let Err(e) = socket_out.send(Message::text(x.to_text())).await {
                    warn!("Unable to send request: {e}");
                    break;
                }
            }
        }
    }

    debug!("Ending forwarding task");
}
