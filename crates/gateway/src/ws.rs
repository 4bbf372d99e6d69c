//! Subscriber socket: one connection listens to one sector's hub events.

use std::{sync::Arc, time::Duration};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, StreamExt},
    tracing::{debug, info, warn},
    wabridge_common::SectorId,
};

use crate::state::GatewayState;

/// A frame that cannot be written within this window drops the subscriber.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Drive a subscriber connection until either side closes.
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, sector_id: SectorId) {
    let mut subscription = state.hub.subscribe(sector_id);
    let conn_id = subscription.conn_id.clone();
    info!(sector_id, conn_id = %conn_id, "subscriber connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Write loop: hub frames -> socket.
    let write_conn_id = conn_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(frame) = subscription.frames.recv().await {
            match tokio::time::timeout(WRITE_TIMEOUT, ws_tx.send(Message::Text(frame.into()))).await
            {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    debug!(conn_id = %write_conn_id, error = %e, "subscriber write failed");
                    break;
                },
                Err(_) => {
                    warn!(conn_id = %write_conn_id, "subscriber write timed out");
                    break;
                },
            }
        }
        let _ = ws_tx.close().await;
    });

    // Read loop: clients only listen, so anything but close is ignored.
    let read_conn_id = conn_id.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => {},
                Err(e) => {
                    debug!(conn_id = %read_conn_id, error = %e, "subscriber read failed");
                    break;
                },
            }
        }
    });

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    state.hub.unsubscribe(sector_id, &conn_id);
    info!(sector_id, conn_id = %conn_id, "subscriber disconnected");
}
