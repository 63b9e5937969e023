//! WebSocket transport glue
//!
//! Each accepted connection gets its own forwarding pump and a receive
//! loop. The receive loop processes that connection's messages strictly
//! in order; distinct connections run on independent tasks, so one
//! connection's collaborator waits never stall another's queue.

use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use warp::ws::WebSocket;

use crate::core::dispatcher::Dispatcher;
use crate::core::hub::SharedHub;

/// Handle one WebSocket connection from upgrade to close
pub async fn handle_ws_client(ws: WebSocket, hub: SharedHub) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Forward outbound messages from the hub to the transport. Messages
    // queued for a closed peer are dropped when this pump ends.
    tokio::task::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_tx.send(message).await {
                debug!("Outbound pump closed: {}", e);
                break;
            }
        }
    });

    let connection_id = hub.register_connection(tx).await;
    let dispatcher = Dispatcher::new(hub.clone());

    // Per-connection ordered queue: messages from this connection are
    // processed sequentially and never concurrently.
    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(msg) => {
                if msg.is_close() {
                    info!("Close frame from {}", connection_id);
                    break;
                }
                if let Ok(text) = msg.to_str() {
                    if let Err(e) = dispatcher.handle_message(&connection_id, text).await {
                        warn!("Message from {} rejected: {}", connection_id, e);
                    }
                }
            }
            Err(e) => {
                error!("WebSocket error on {}: {}", connection_id, e);
                break;
            }
        }
    }

    // Transport closed: drain and discard, then tear down
    hub.unregister_connection(&connection_id).await;
}
