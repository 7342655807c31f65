//! Push subscriptions
//!
//! Subscriptions are keyed by client-chosen name and hold a sink into one
//! connection's writer task. The registry itself knows nothing about
//! connections: a connection records the names it created and removes them
//! when it closes.

use std::collections::BTreeMap;

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::protocol::{Response, SubscriptionPush};

/// Write half of one connection, as seen by the rest of the daemon.
///
/// Lines sent here are written in order by the connection's writer task.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    tx: UnboundedSender<String>,
}

impl ResponseSink {
    pub fn new(tx: UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Queue one line. Returns false if the connection is gone.
    pub fn send_line(&self, line: String) -> bool {
        self.tx.send(line).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// True if both sinks write to the same connection
    pub fn same_connection(&self, other: &ResponseSink) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Name-keyed push channels
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    sinks: BTreeMap<String, ResponseSink>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; the last registration for a name wins.
    pub fn register(&mut self, name: impl Into<String>, sink: ResponseSink) {
        let name = name.into();
        if self.sinks.insert(name.clone(), sink).is_some() {
            debug!(subscription = %name, "replaced existing subscription");
        }
    }

    /// Remove a subscription; absent names are ignored.
    pub fn remove(&mut self, name: &str) {
        self.sinks.remove(name);
    }

    /// Remove `name` only if it is still bound to `sink`.
    ///
    /// A closing connection must not drop a name that another connection
    /// has since re-registered.
    pub fn release(&mut self, name: &str, sink: &ResponseSink) {
        if self
            .sinks
            .get(name)
            .map(|bound| bound.same_connection(sink))
            .unwrap_or(false)
        {
            self.sinks.remove(name);
        }
    }

    /// Push `body` to every subscriber. Broken sinks are skipped silently.
    pub fn deliver(&self, body: &Response) {
        for (name, sink) in &self.sinks {
            Self::push(name, sink, body);
        }
    }

    fn push(name: &str, sink: &ResponseSink, body: &Response) {
        let line = SubscriptionPush {
            name: name.to_string(),
            body: body.clone(),
        }
        .to_line();
        if !sink.send_line(line) {
            debug!(subscription = %name, "dropping push to closed connection");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sinks.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.sinks.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn sink() -> (ResponseSink, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        (ResponseSink::new(tx), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_fan_out_reaches_each_sink_once() {
        let mut registry = SubscriptionRegistry::new();
        let (a, mut rx_a) = sink();
        let (b, mut rx_b) = sink();
        registry.register("A", a);
        registry.register("B", b);

        registry.deliver(&Response::TypeErrors(vec![]));

        let lines_a = drain(&mut rx_a);
        let lines_b = drain(&mut rx_b);
        assert_eq!(lines_a.len(), 1);
        assert_eq!(lines_b.len(), 1);
        assert!(lines_a[0].ends_with('\n'));
        assert!(lines_a[0].contains("\"name\":\"A\""));
        assert!(lines_b[0].contains("\"name\":\"B\""));

        registry.remove("A");
        registry.deliver(&Response::TypeErrors(vec![]));
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn test_register_replaces_sink() {
        let mut registry = SubscriptionRegistry::new();
        let (first, mut rx_first) = sink();
        let (second, mut rx_second) = sink();
        registry.register("S", first);
        registry.register("S", second);
        assert_eq!(registry.len(), 1);

        registry.deliver(&Response::Ok);
        assert!(drain(&mut rx_first).is_empty());
        assert_eq!(drain(&mut rx_second).len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        let (s, _rx) = sink();
        registry.register("S", s);
        registry.remove("S");
        registry.remove("S");
        registry.remove("never-registered");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_keeps_reregistered_name() {
        let mut registry = SubscriptionRegistry::new();
        let (old, _rx_old) = sink();
        let (new, _rx_new) = sink();
        registry.register("S", old.clone());
        registry.register("S", new.clone());

        registry.release("S", &old);
        assert!(registry.contains("S"));
        registry.release("S", &new);
        assert!(!registry.contains("S"));
    }

    #[test]
    fn test_closed_sink_does_not_block_others() {
        let mut registry = SubscriptionRegistry::new();
        let (dead, rx_dead) = sink();
        let (live, mut rx_live) = sink();
        drop(rx_dead);
        registry.register("dead", dead);
        registry.register("live", live);

        registry.deliver(&Response::TypeErrors(vec![]));
        assert_eq!(drain(&mut rx_live).len(), 1);
    }
}
