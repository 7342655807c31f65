//! Line-protocol client for integration tests

use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout, Instant};

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// One client connection to a running daemon
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Connect, retrying until the daemon is listening
    pub async fn connect(socket_path: &Path) -> Self {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match UnixStream::connect(socket_path).await {
                Ok(stream) => {
                    let (read_half, write_half) = stream.into_split();
                    return Self {
                        reader: BufReader::new(read_half),
                        writer: write_half,
                    };
                }
                Err(_) if Instant::now() < deadline => {
                    sleep(Duration::from_millis(20)).await;
                }
                Err(e) => panic!("Failed to connect to {}: {}", socket_path.display(), e),
            }
        }
    }

    /// Send one raw line; a trailing newline is added
    pub async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .expect("Failed to write request");
        self.writer.flush().await.expect("Failed to flush request");
    }

    pub async fn send(&mut self, message: &Value) {
        self.send_line(&message.to_string()).await;
    }

    /// Next line, or `None` once the daemon closed the connection
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("Timed out waiting for a line");
        match read {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }

    /// Next line parsed as JSON; panics at end of stream
    pub async fn read_json(&mut self) -> Value {
        let line = self
            .read_line()
            .await
            .expect("Connection closed while waiting for a response");
        assert!(line.ends_with('\n'), "Lines must be newline-terminated: {:?}", line);
        serde_json::from_str(&line)
            .unwrap_or_else(|e| panic!("Expected valid JSON: {}\nLine: {}", e, line))
    }

    /// Send a request and read the next line as its response
    pub async fn request(&mut self, message: Value) -> Value {
        self.send(&message).await;
        self.read_json().await
    }

    /// Subscribe and return the initial snapshot
    pub async fn subscribe(&mut self, name: &str) -> Value {
        self.request(serde_json::json!({ "SubscribeToTypeErrors": name }))
            .await
    }
}
