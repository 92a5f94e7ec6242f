//! Mock implementations of the transport and OCR seams.
//!
//! Mocks record every call and replay queued responses, so tests assert on
//! exactly what the engine did without a network or an OCR engine.

use crate::ocr::{OcrAdapter, OcrError};
use crate::transport::{
    ChatClient, ClientFactory, InboundMessage, LifecycleEvent, SenderId, TransportError,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Chat client that records outbound traffic.
#[derive(Default)]
pub struct MockChatClient {
    replies: Mutex<Vec<(SenderId, String)>>,
    sent: Mutex<Vec<(String, String)>>,
    reachable: Mutex<HashMap<String, String>>,
    fail_sends: AtomicBool,
    teardowns: AtomicUsize,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `resolve_identity(raw)` return `jid`.
    pub fn set_reachable(&self, raw: &str, jid: &str) {
        self.reachable
            .lock()
            .unwrap()
            .insert(raw.to_string(), jid.to_string());
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn last_reply(&self) -> Option<String> {
        self.replies
            .lock()
            .unwrap()
            .last()
            .map(|(_, body)| body.clone())
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn reply(&self, to: &SenderId, body: &str) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("mock send failure".to_string()));
        }
        self.replies
            .lock()
            .unwrap()
            .push((to.clone(), body.to_string()));
        Ok(())
    }

    async fn send_direct(&self, jid: &str, body: &str) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("mock send failure".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((jid.to_string(), body.to_string()));
        Ok(())
    }

    async fn resolve_identity(&self, raw: &str) -> Result<Option<String>, TransportError> {
        Ok(self.reachable.lock().unwrap().get(raw).cloned())
    }

    async fn teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// OCR adapter replaying queued results.
#[derive(Default)]
pub struct MockOcr {
    results: Mutex<VecDeque<Result<Option<Vec<String>>, ()>>>,
    calls: AtomicUsize,
}

impl MockOcr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_result(&self, result: Option<Vec<String>>) {
        self.results.lock().unwrap().push_back(Ok(result));
    }

    pub fn queue_error(&self) {
        self.results.lock().unwrap().push_back(Err(()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrAdapter for MockOcr {
    async fn recognize_digits(&self, _image: &[u8]) -> Result<Option<Vec<String>>, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.results.lock().unwrap().pop_front() {
            Some(Ok(result)) => Ok(result),
            Some(Err(())) => Err(OcrError::Spawn(std::io::Error::other("mock OCR failure"))),
            None => Ok(None),
        }
    }
}

#[derive(Default)]
struct FactoryCounters {
    create_calls: AtomicUsize,
    created: AtomicUsize,
    torn_down: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    lifecycle_senders: Mutex<Vec<mpsc::Sender<LifecycleEvent>>>,
}

/// Shared view of what the factory and its clients have done.
#[derive(Clone, Default)]
pub struct MockCounters {
    inner: Arc<FactoryCounters>,
}

impl MockCounters {
    pub fn create_calls(&self) -> usize {
        self.inner.create_calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    pub fn torn_down(&self) -> usize {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.inner.max_live.load(Ordering::SeqCst)
    }

    /// Lifecycle sender of the n-th successfully created client, for
    /// injecting events from tests.
    pub fn lifecycle_sender(&self, index: usize) -> mpsc::Sender<LifecycleEvent> {
        self.inner.lifecycle_senders.lock().unwrap()[index].clone()
    }
}

/// Factory producing mock clients, optionally failing the first N creates
/// and optionally signalling Ready as soon as a client exists.
pub struct MockClientFactory {
    counters: MockCounters,
    auto_ready: bool,
    fail_first: AtomicUsize,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self {
            counters: MockCounters::default(),
            auto_ready: true,
            fail_first: AtomicUsize::new(0),
        }
    }

    pub fn auto_ready(mut self, auto_ready: bool) -> Self {
        self.auto_ready = auto_ready;
        self
    }

    pub fn fail_first_creates(self, count: usize) -> Self {
        self.fail_first.store(count, Ordering::SeqCst);
        self
    }

    pub fn counters(&self) -> MockCounters {
        self.counters.clone()
    }
}

#[async_trait]
impl ClientFactory for MockClientFactory {
    type Client = MockSupervisedClient;

    async fn create(
        &self,
        lifecycle_tx: mpsc::Sender<LifecycleEvent>,
        _inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Result<Arc<MockSupervisedClient>, TransportError> {
        let inner = &self.counters.inner;
        inner.create_calls.fetch_add(1, Ordering::SeqCst);

        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Connect("mock create failure".to_string()));
        }

        inner.created.fetch_add(1, Ordering::SeqCst);
        let live = inner.live.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_live.fetch_max(live, Ordering::SeqCst);
        inner
            .lifecycle_senders
            .lock()
            .unwrap()
            .push(lifecycle_tx.clone());

        if self.auto_ready {
            let _ = lifecycle_tx.try_send(LifecycleEvent::Ready);
        }

        Ok(Arc::new(MockSupervisedClient {
            counters: self.counters.clone(),
            torn: AtomicBool::new(false),
        }))
    }
}

/// Client handed out by [`MockClientFactory`]; only its teardown behavior
/// matters to the supervisor.
pub struct MockSupervisedClient {
    counters: MockCounters,
    torn: AtomicBool,
}

#[async_trait]
impl ChatClient for MockSupervisedClient {
    async fn reply(&self, _to: &SenderId, _body: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_direct(&self, _jid: &str, _body: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn resolve_identity(&self, raw: &str) -> Result<Option<String>, TransportError> {
        Ok(Some(format!("{raw}@c.us")))
    }

    async fn teardown(&self) {
        if self.torn.swap(true, Ordering::SeqCst) {
            return;
        }
        self.counters.inner.torn_down.fetch_add(1, Ordering::SeqCst);
        self.counters.inner.live.fetch_sub(1, Ordering::SeqCst);
    }
}
