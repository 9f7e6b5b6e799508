//! Per-connection task.
//!
//! Each connection gets one task that reads framed requests under a
//! refreshed read deadline, dispatches them in order, and writes replies
//! back. The task also drains the connection's pub/sub queue, rendering
//! deliveries as `message`/`pmessage` arrays. Disconnection tears down the
//! connection's subscriptions deterministically.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::pubsub::PubSubMessage;
use crate::server::dispatcher::{CommandRegistry, ConnectionContext};
use crate::server::AppState;
use crate::shared::resp::decode_request;
use crate::types::Frame;

/// Serve one connection to completion.
pub async fn serve(
    state: Arc<AppState>,
    registry: Arc<CommandRegistry>,
    mut stream: TcpStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
) {
    debug!(%peer, "connection opened");
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut ctx = ConnectionContext::new(state.clone(), outbound_tx);
    let read_deadline = Duration::from_secs(state.config.read_timeout_secs);

    let mut read_buf = BytesMut::with_capacity(4 * 1024);
    let mut write_buf = BytesMut::with_capacity(4 * 1024);

    'outer: loop {
        // Serve any fully-buffered requests before touching the socket.
        loop {
            match decode_request(&mut read_buf) {
                Ok(Some(args)) => {
                    if args.is_empty() {
                        continue;
                    }
                    let frames = registry.dispatch(&mut ctx, &args).await;
                    write_frames(&mut stream, &mut write_buf, &frames).await;
                    if ctx.should_quit {
                        break 'outer;
                    }
                },
                Ok(None) => break,
                Err(err) => {
                    // Reply, then drop the desynchronized buffer; the
                    // connection itself stays open.
                    let frame = Frame::Error(err.wire_message());
                    write_frames(&mut stream, &mut write_buf, std::slice::from_ref(&frame)).await;
                    read_buf.clear();
                    break;
                },
            }
        }

        // Subscriber connections idle legitimately between deliveries;
        // they are reclaimed by the bus idle sweeper, not the read
        // deadline.
        let deadline = if ctx.subscription_count() > 0 {
            Duration::from_secs(24 * 60 * 60)
        } else {
            read_deadline
        };

        tokio::select! {
            () = shutdown.cancelled() => break,
            delivery = outbound_rx.recv() => {
                let Some(message) = delivery else { break };
                let frame = render_delivery(message);
                write_frames(&mut stream, &mut write_buf, std::slice::from_ref(&frame)).await;
            },
            read = tokio::time::timeout(deadline, stream.read_buf(&mut read_buf)) => {
                match read {
                    Err(_) => {
                        debug!(%peer, "read deadline exceeded, closing");
                        break;
                    },
                    Ok(Err(err)) => {
                        trace!(%peer, error = %err, "read failed");
                        break;
                    },
                    Ok(Ok(0)) => break,
                    Ok(Ok(_)) => {},
                }
            },
        }
    }

    // Deterministic subscription teardown.
    state.bus.unsubscribe_all(ctx.subscriber_id);
    debug!(%peer, "connection closed");
}

fn render_delivery(message: PubSubMessage) -> Frame {
    match message {
        PubSubMessage::Message { channel, payload } => Frame::Array(vec![
            Frame::from("message"),
            Frame::from(channel),
            Frame::Bulk(payload),
        ]),
        PubSubMessage::PatternMessage {
            pattern,
            channel,
            payload,
        } => Frame::Array(vec![
            Frame::from("pmessage"),
            Frame::from(pattern),
            Frame::from(channel),
            Frame::Bulk(payload),
        ]),
    }
}

async fn write_frames(stream: &mut TcpStream, buf: &mut BytesMut, frames: &[Frame]) {
    buf.clear();
    for frame in frames {
        frame.encode(buf);
    }
    if let Err(err) = stream.write_all(buf).await {
        trace!(error = %err, "write failed");
    }
}
