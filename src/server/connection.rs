//! Per-connection protocol loop
//!
//! Each accepted socket gets one reader loop and one writer task. Responses
//! and subscription pushes both go through the writer's queue, so lines are
//! never interleaved. Requests on one connection are handled strictly in
//! order: the reader waits for each response before reading the next line.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::protocol::{parse_client_request, ClientRequest, Response};

use super::actor::ActorHandle;
use super::subscriptions::ResponseSink;

/// Longest accepted request line, newline excluded
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line,
    TooLong,
    Eof,
}

/// Serve one client until it disconnects, the daemon shuts down, or the
/// state actor goes away.
pub async fn handle_connection(
    stream: UnixStream,
    actor: ActorHandle,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = unbounded_channel();
    let (closing_tx, closing_rx) = oneshot::channel();
    let writer = tokio::spawn(write_loop(write_half, rx, closing_rx));

    let sink = ResponseSink::new(tx);
    let mut reader = BufReader::new(read_half);
    let mut subscriptions: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            read = read_line_bounded(&mut reader, &mut buf) => read,
            _ = shutdown.recv() => {
                debug!("connection closing for shutdown");
                break;
            }
        };

        match read {
            Ok(LineRead::Line) => {}
            Ok(LineRead::Eof) => break,
            Ok(LineRead::TooLong) => {
                sink.send_line(
                    Response::error(format!(
                        "Request line exceeds {} bytes",
                        MAX_LINE_BYTES
                    ))
                    .to_line(),
                );
                break;
            }
            Err(e) => {
                debug!(error = %e, "connection read failed");
                break;
            }
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                sink.send_line(Response::error(format!("Invalid UTF-8: {}", e)).to_line());
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        match parse_client_request(line) {
            ClientRequest::Malformed(diagnostic) => {
                debug!(%diagnostic, "malformed request");
                sink.send_line(Response::error(diagnostic).to_line());
            }
            ClientRequest::Request(request) => match actor.dispatch(request).await {
                Some(response) => {
                    sink.send_line(response.to_line());
                }
                None => {
                    warn!("state owner unavailable, closing connection");
                    break;
                }
            },
            ClientRequest::Subscription(subscription) => {
                let name = subscription.name;
                match actor.subscribe(name.clone(), sink.clone()).await {
                    Some(()) => {
                        if !subscriptions.contains(&name) {
                            subscriptions.push(name);
                        }
                    }
                    None => {
                        warn!("state owner unavailable, closing connection");
                        break;
                    }
                }
            }
        }
    }

    actor.unsubscribe(subscriptions, sink.clone());
    drop(sink);
    let _ = closing_tx.send(());
    let _ = writer.await;
    debug!("connection closed");
}

/// Read one `\n`-terminated line into `buf`, refusing to buffer more than
/// [`MAX_LINE_BYTES`].
async fn read_line_bounded<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = (&mut *reader).take(MAX_LINE_BYTES as u64 + 1);
    let read = limited.read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() != Some(&b'\n') && buf.len() > MAX_LINE_BYTES {
        return Ok(LineRead::TooLong);
    }
    Ok(LineRead::Line)
}

/// Drain queued lines to the socket, flushing each one. On `closing`, lines
/// already queued are still written.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: UnboundedReceiver<String>,
    mut closing: oneshot::Receiver<()>,
) {
    loop {
        let line = tokio::select! {
            biased;
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = &mut closing => {
                while let Ok(line) = rx.try_recv() {
                    if write_line(&mut writer, &line).await.is_err() {
                        break;
                    }
                }
                break;
            }
        };
        if let Err(e) = write_line(&mut writer, &line).await {
            debug!(error = %e, "connection write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
