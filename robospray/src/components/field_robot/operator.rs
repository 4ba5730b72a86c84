use crate::{error::Result, messages::control::operator::OperatorMessage};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    net::TcpListener,
    sync::mpsc,
};

/// Listen for operator messages on a TCP port and forward them to the
/// decision task. Each connection is handled in its own task.
///
/// * `port`: port to bind on all interfaces.
/// * `messages`: sender into the decision task.
pub async fn listen(port: u16, messages: mpsc::Sender<OperatorMessage>) -> Result<()> {
    // Bind on all interfaces so the dashboard container can reach us.
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "Operator surface listening");

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                tracing::debug!(%peer, "Operator connected");
                let messages = messages.clone();
                tokio::spawn(async move {
                    handle_connection(socket, messages).await;
                    tracing::debug!(%peer, "Operator disconnected");
                });
            }
            Err(e) => tracing::warn!("Failed to accept operator connection: {e}"),
        }
    }
}

/// Read newline delimited operator messages until the connection closes.
/// Malformed lines are logged and skipped.
///
/// * `reader`: the connection.
/// * `messages`: sender into the decision task.
pub async fn handle_connection<R>(reader: R, messages: mpsc::Sender<OperatorMessage>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Operator connection failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<OperatorMessage>(&line) {
            Ok(message) => {
                tracing::info!(?message, "Received operator message");
                if messages.send(message).await.is_err() {
                    // Decision task is gone, nothing left to control.
                    break;
                }
            }
            Err(e) => tracing::warn!("Received a malformed request {e}, data: {line:?}"),
        }
    }
}
