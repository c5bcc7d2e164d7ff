// Topic Router
//
// Maps scopes to STOMP subscriptions and fans inbound frames out to handlers.
// Views sharing a scope share one transport subscription; the last handle to
// go away removes it.

use crate::stomp::Frame;
use crate::transport::Outbound;
use clinicpulse_core::{InboundMessage, MessageSink, Scope};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

pub type Handler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Opaque token returned by [`TopicRouter::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// What happened to one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Decoded and handed to this many handlers
    Delivered(usize),
    /// No subscription matches the frame
    Unrouted,
    /// Body could not be decoded for its topic
    Malformed,
}

struct TopicEntry {
    scope: Scope,
    handlers: Vec<(SubscriptionHandle, Handler)>,
    /// STOMP subscription id while registered with the server
    transport_id: Option<String>,
}

#[derive(Default)]
struct RouterState {
    topics: HashMap<String, TopicEntry>,
    handles: HashMap<SubscriptionHandle, String>,
    by_transport_id: HashMap<String, String>,
    outbound: Option<Outbound>,
    next_handle: u64,
    next_transport_id: u64,
}

impl RouterState {
    fn issue(&mut self, topic: &str) {
        let Some(outbound) = &self.outbound else {
            return;
        };
        let Some(entry) = self.topics.get_mut(topic) else {
            return;
        };
        let id = format!("sub-{}", self.next_transport_id);
        self.next_transport_id += 1;

        tracing::debug!("SUBSCRIBE {} as {}", topic, id);
        send(outbound, &Frame::subscribe(&id, topic));
        if let Some(old) = entry.transport_id.replace(id.clone()) {
            self.by_transport_id.remove(&old);
        }
        self.by_transport_id.insert(id, topic.to_string());
    }
}

fn send(outbound: &Outbound, frame: &Frame) {
    if outbound.send(frame.encode()).is_err() {
        tracing::debug!("Dropped {} frame: transport already closed", frame.command);
    }
}

#[derive(Default)]
pub struct TopicRouter {
    state: Mutex<RouterState>,
    sink: RwLock<Option<Arc<dyn MessageSink>>>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router whose decoded messages are first handed to `sink` (the reconciler).
    pub fn with_sink(sink: Arc<dyn MessageSink>) -> Self {
        let router = Self::default();
        *router.sink.write() = Some(sink);
        router
    }

    pub fn subscribe<F>(&self, scope: Scope, handler: F) -> SubscriptionHandle
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let topic = scope.topic();
        let handler: Handler = Arc::new(handler);
        let mut state = self.state.lock();

        let handle = SubscriptionHandle(state.next_handle);
        state.next_handle += 1;
        state.handles.insert(handle, topic.clone());

        let entry = state
            .topics
            .entry(topic.clone())
            .or_insert_with(|| TopicEntry {
                scope,
                handlers: Vec::new(),
                transport_id: None,
            });
        entry.handlers.push((handle, handler));
        let needs_issue = entry.transport_id.is_none();

        tracing::debug!(
            "Subscribed {:?} to {} ({} handler(s))",
            handle,
            topic,
            entry.handlers.len()
        );
        if needs_issue {
            // queued until attach() when offline
            state.issue(&topic);
        }
        handle
    }

    /// Remove a handler. Returns false if the handle was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut state = self.state.lock();
        let Some(topic) = state.handles.remove(&handle) else {
            return false;
        };

        let now_empty = match state.topics.get_mut(&topic) {
            Some(entry) => {
                entry.handlers.retain(|(h, _)| *h != handle);
                entry.handlers.is_empty()
            }
            None => false,
        };

        if now_empty {
            if let Some(entry) = state.topics.remove(&topic) {
                if let Some(id) = entry.transport_id {
                    state.by_transport_id.remove(&id);
                    if let Some(outbound) = &state.outbound {
                        tracing::debug!("UNSUBSCRIBE {} ({})", topic, id);
                        send(outbound, &Frame::unsubscribe(&id));
                    }
                }
            }
        }
        true
    }

    /// Bind to a freshly connected transport and (re)issue every topic once.
    pub fn attach(&self, outbound: Outbound) -> usize {
        let mut state = self.state.lock();
        state.outbound = Some(outbound);
        state.by_transport_id.clear();
        for entry in state.topics.values_mut() {
            entry.transport_id = None;
        }

        let mut topics: Vec<String> = state.topics.keys().cloned().collect();
        topics.sort();
        for topic in &topics {
            state.issue(topic);
        }
        tracing::info!("Issued {} subscription(s) on connect", topics.len());
        topics.len()
    }

    /// The transport is gone; every registration must be re-issued later.
    pub fn detach(&self) {
        let mut state = self.state.lock();
        state.outbound = None;
        state.by_transport_id.clear();
        for entry in state.topics.values_mut() {
            entry.transport_id = None;
        }
    }

    /// Drop every subscription and return the transport, if attached.
    pub fn clear(&self) -> Option<Outbound> {
        let mut state = self.state.lock();
        state.topics.clear();
        state.handles.clear();
        state.by_transport_id.clear();
        state.outbound.take()
    }

    /// Route one MESSAGE frame body.
    ///
    /// Runs synchronously to completion; handlers are invoked outside the
    /// router lock so they may subscribe or unsubscribe.
    pub fn dispatch(
        &self,
        destination: Option<&str>,
        subscription: Option<&str>,
        body: &str,
    ) -> DispatchOutcome {
        let routed = {
            let state = self.state.lock();
            let topic = destination
                .filter(|d| state.topics.contains_key(*d))
                .map(str::to_string)
                .or_else(|| subscription.and_then(|s| state.by_transport_id.get(s).cloned()));
            topic.and_then(|topic| {
                state.topics.get(&topic).map(|entry| {
                    let handlers: Vec<(SubscriptionHandle, Handler)> = entry.handlers.clone();
                    (entry.scope.clone(), handlers)
                })
            })
        };

        let Some((scope, handlers)) = routed else {
            tracing::warn!(
                "Dropping frame for unknown topic (destination={:?}, subscription={:?})",
                destination,
                subscription
            );
            return DispatchOutcome::Unrouted;
        };

        let message = match InboundMessage::decode(&scope, body) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping frame: {}", e);
                return DispatchOutcome::Malformed;
            }
        };

        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink.accept(&scope, &message);
        }
        let mut delivered = 0;
        for (handle, handler) in &handlers {
            // an earlier handler may have unsubscribed this one
            if !self.state.lock().handles.contains_key(handle) {
                continue;
            }
            handler(&message);
            delivered += 1;
        }
        DispatchOutcome::Delivered(delivered)
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().outbound.is_some()
    }

    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.state.lock().topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|e| e.handlers.len())
            .unwrap_or(0)
    }

    /// Topics currently registered with the server
    pub fn issued_count(&self) -> usize {
        self.state.lock().by_transport_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stomp::Command;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    const SLOT_BODY: &str = r#"{"id":2,"startTime":"2025-03-10T09:00:00","endTime":"2025-03-10T09:30:00","status":"BOOKED"}"#;

    fn scope() -> Scope {
        Scope::slots(1, NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&InboundMessage) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_: &InboundMessage| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            frames.push(Frame::decode(&raw).unwrap().unwrap());
        }
        frames
    }

    #[test]
    fn test_dispatch_reaches_handler() {
        let router = TopicRouter::new();
        let (count, handler) = counter();
        router.subscribe(scope(), handler);

        let outcome = router.dispatch(Some("/topic/slots/1/2025-03-10"), None, SLOT_BODY);

        assert_eq!(outcome, DispatchOutcome::Delivered(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribed_handler_is_never_called() {
        let router = TopicRouter::new();
        let (count, handler) = counter();
        let handle = router.subscribe(scope(), handler);

        assert!(router.unsubscribe(handle));
        assert!(!router.unsubscribe(handle));

        let outcome = router.dispatch(Some(&scope().topic()), None, SLOT_BODY);
        assert_eq!(outcome, DispatchOutcome::Unrouted);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_shared_topic_is_reference_counted() {
        let router = TopicRouter::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.attach(tx);

        let (first_count, first) = counter();
        let (second_count, second) = counter();
        let a = router.subscribe(scope(), first);
        let b = router.subscribe(scope(), second);

        let subscribes = drain(&mut rx);
        assert_eq!(subscribes.len(), 1);
        assert_eq!(subscribes[0].command, Command::Subscribe);
        assert_eq!(router.handler_count(&scope().topic()), 2);

        router.unsubscribe(a);
        assert!(drain(&mut rx).is_empty());
        router.dispatch(Some(&scope().topic()), None, SLOT_BODY);
        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);

        router.unsubscribe(b);
        let unsubscribes = drain(&mut rx);
        assert_eq!(unsubscribes.len(), 1);
        assert_eq!(unsubscribes[0].command, Command::Unsubscribe);
        assert_eq!(unsubscribes[0].header("id"), subscribes[0].header("id"));
        assert!(router.active_topics().is_empty());
        assert_eq!(router.issued_count(), 0);
    }

    #[test]
    fn test_offline_subscriptions_are_issued_on_attach() {
        let router = TopicRouter::new();
        router.subscribe(scope(), |_| {});
        router.subscribe(Scope::PersonalQueue, |_| {});
        assert_eq!(router.issued_count(), 0);

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(router.attach(tx), 2);

        let destinations: Vec<String> = drain(&mut rx)
            .iter()
            .map(|f| f.header("destination").unwrap().to_string())
            .collect();
        assert_eq!(
            destinations,
            vec!["/topic/slots/1/2025-03-10", "/user/queue/notifications"]
        );
    }

    #[test]
    fn test_detach_then_attach_reissues_each_topic_once() {
        let router = TopicRouter::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.attach(tx);
        router.subscribe(scope(), |_| {});
        router.subscribe(scope(), |_| {});
        router.subscribe(Scope::EmergencyAlerts, |_| {});
        assert_eq!(drain(&mut rx).len(), 2);

        router.detach();
        assert!(!router.is_attached());
        assert_eq!(router.issued_count(), 0);
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        router.attach(tx2);
        let frames = drain(&mut rx2);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.command == Command::Subscribe));
    }

    #[test]
    fn test_fallback_to_subscription_id() {
        let router = TopicRouter::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.attach(tx);
        let (count, handler) = counter();
        router.subscribe(scope(), handler);
        let id = drain(&mut rx)[0].header("id").unwrap().to_string();

        let outcome = router.dispatch(Some("/topic/rewritten"), Some(&id), SLOT_BODY);

        assert_eq!(outcome, DispatchOutcome::Delivered(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_malformed_body_is_dropped() {
        let router = TopicRouter::new();
        let (count, handler) = counter();
        router.subscribe(scope(), handler);

        let outcome = router.dispatch(Some(&scope().topic()), None, "{not json");

        assert_eq!(outcome, DispatchOutcome::Malformed);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sink_sees_each_frame_once_for_shared_topic() {
        struct CountingSink(AtomicUsize);
        impl MessageSink for CountingSink {
            fn accept(&self, _: &Scope, _: &InboundMessage) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let router = TopicRouter::with_sink(sink.clone());
        router.subscribe(scope(), |_| {});
        router.subscribe(scope(), |_| {});

        assert_eq!(
            router.dispatch(Some(&scope().topic()), None, SLOT_BODY),
            DispatchOutcome::Delivered(2)
        );
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let router = Arc::new(TopicRouter::new());
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let (r, s) = (router.clone(), slot.clone());
        let handle = router.subscribe(scope(), move |_| {
            if let Some(h) = s.lock().take() {
                r.unsubscribe(h);
            }
        });
        *slot.lock() = Some(handle);

        router.dispatch(Some(&scope().topic()), None, SLOT_BODY);
        assert!(router.active_topics().is_empty());
    }

    #[test]
    fn test_sibling_unsubscribed_mid_dispatch_is_skipped() {
        let router = Arc::new(TopicRouter::new());
        let sibling: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let (r, s) = (router.clone(), sibling.clone());
        router.subscribe(scope(), move |_| {
            if let Some(h) = s.lock().take() {
                r.unsubscribe(h);
            }
        });
        let (calls, handler) = counter();
        *sibling.lock() = Some(router.subscribe(scope(), handler));

        let outcome = router.dispatch(Some(&scope().topic()), None, SLOT_BODY);
        assert_eq!(outcome, DispatchOutcome::Delivered(1));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(router.handler_count(&scope().topic()), 1);
    }

    #[test]
    fn test_clear_returns_outbound_and_forgets_everything() {
        let router = TopicRouter::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        router.attach(tx);
        let handle = router.subscribe(scope(), |_| {});

        assert!(router.clear().is_some());
        assert!(router.clear().is_none());
        assert!(!router.unsubscribe(handle));
        assert_eq!(
            router.dispatch(Some(&scope().topic()), None, SLOT_BODY),
            DispatchOutcome::Unrouted
        );
    }
}
