//! Lifecycle events for an external supervisor
//!
//! When enabled, the daemon writes one JSON object per line to a separate
//! output stream (stdout by default) so a wrapper process can tell when the
//! socket exists, when analysis is ready, and why the daemon died.
//!
//! # Event Format
//!
//! ```json
//! {"SocketCreated":"/tmp/checkd_server_0123456789abcdef.sock"}
//! {"ServerInitialized":null}
//! {"Exception":"critical file changed: /repo/.checkd.toml"}
//! ```
//!
//! Each event is written at most once per process. Delivery is best-effort:
//! write failures are ignored because the reader may already be gone.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::json;

/// A lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    SocketCreated(PathBuf),
    ServerInitialized,
    Exception(String),
}

impl ServerEvent {
    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::SocketCreated(path) => json!({ "SocketCreated": path }),
            Self::ServerInitialized => json!({ "ServerInitialized": null }),
            Self::Exception(message) => json!({ "Exception": message }),
        }
    }
}

#[derive(Default)]
struct Emitted {
    socket_created: bool,
    initialized: bool,
    exception: bool,
}

/// Writer for lifecycle events
pub struct EventEmitter {
    out: Option<Mutex<Box<dyn Write + Send>>>,
    emitted: Mutex<Emitted>,
}

impl EventEmitter {
    /// Emit to stdout
    pub fn stdout() -> Self {
        Self::writer(io::stdout())
    }

    /// Emit to any writer
    pub fn writer(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Some(Mutex::new(Box::new(out))),
            emitted: Mutex::new(Emitted::default()),
        }
    }

    /// Emit nothing
    pub fn disabled() -> Self {
        Self {
            out: None,
            emitted: Mutex::new(Emitted::default()),
        }
    }

    pub fn socket_created(&self, path: &Path) {
        self.emit(ServerEvent::SocketCreated(path.to_path_buf()));
    }

    pub fn server_initialized(&self) {
        self.emit(ServerEvent::ServerInitialized);
    }

    pub fn exception(&self, message: impl Into<String>) {
        self.emit(ServerEvent::Exception(message.into()));
    }

    /// Write `event` unless one of its kind was already written
    pub fn emit(&self, event: ServerEvent) {
        {
            let mut emitted = self.emitted.lock();
            let seen = match event {
                ServerEvent::SocketCreated(_) => &mut emitted.socket_created,
                ServerEvent::ServerInitialized => &mut emitted.initialized,
                ServerEvent::Exception(_) => &mut emitted.exception,
            };
            if *seen {
                return;
            }
            *seen = true;
        }

        let Some(out) = &self.out else {
            return;
        };
        let line = event.to_json().to_string();
        let mut handle = out.lock();
        // Ignore write errors (the reader may have closed)
        let _ = writeln!(handle, "{}", line);
        let _ = handle.flush();
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("enabled", &self.out.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Buffer(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_event_wire_shapes() {
        let buffer = Buffer::default();
        let emitter = EventEmitter::writer(buffer.clone());

        emitter.socket_created(Path::new("/tmp/s.sock"));
        emitter.server_initialized();
        emitter.exception("boom");

        assert_eq!(
            buffer.lines(),
            vec![
                r#"{"SocketCreated":"/tmp/s.sock"}"#,
                r#"{"ServerInitialized":null}"#,
                r#"{"Exception":"boom"}"#,
            ]
        );
    }

    #[test]
    fn test_each_event_at_most_once() {
        let buffer = Buffer::default();
        let emitter = EventEmitter::writer(buffer.clone());

        emitter.exception("first");
        emitter.exception("second");
        emitter.server_initialized();
        emitter.server_initialized();

        let lines = buffer.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("first"));
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let emitter = EventEmitter::writer(Broken);
        emitter.exception("nobody is listening");
    }

    #[test]
    fn test_disabled_emits_nothing() {
        let emitter = EventEmitter::disabled();
        emitter.server_initialized();
    }
}
