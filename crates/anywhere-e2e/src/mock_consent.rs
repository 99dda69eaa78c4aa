//! Mock consent provider for E2E tests
//!
//! Tests decide when and how each prompt is answered.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anywhere_core::{
    ConsentDecision, ConsentError, ConsentProvider, ConsentRequest, ConsentStatus,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex, Notify};

pub struct MockConsent {
    granted: AtomicBool,
    unavailable: AtomicBool,
    requests: RwLock<Vec<ConsentRequest>>,
    prompts: AtomicUsize,
    prompted: Notify,
    answer_tx: mpsc::UnboundedSender<ConsentDecision>,
    answer_rx: Mutex<mpsc::UnboundedReceiver<ConsentDecision>>,
}

impl MockConsent {
    /// Consent already held; no prompt will be shown
    pub fn granted() -> Arc<Self> {
        let consent = Self::new();
        consent.granted.store(true, Ordering::SeqCst);
        Arc::new(consent)
    }

    /// Consent not yet held; prompts wait for [`Self::answer`]
    pub fn required() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn new() -> Self {
        let (answer_tx, answer_rx) = mpsc::unbounded_channel();
        Self {
            granted: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
            requests: RwLock::new(Vec::new()),
            prompts: AtomicUsize::new(0),
            prompted: Notify::new(),
            answer_tx,
            answer_rx: Mutex::new(answer_rx),
        }
    }

    /// Simulate having nothing in the foreground to show the prompt
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Queue the answer to the current or next prompt
    pub fn answer(&self, decision: ConsentDecision) {
        let _ = self.answer_tx.send(decision);
    }

    /// Wait until a prompt is on screen
    pub async fn wait_for_prompt(&self) {
        self.prompted.notified().await;
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ConsentRequest> {
        self.requests.read().clone()
    }
}

#[async_trait]
impl ConsentProvider for MockConsent {
    fn prepare(&self) -> ConsentStatus {
        if self.granted.load(Ordering::SeqCst) {
            ConsentStatus::Granted
        } else {
            ConsentStatus::Required
        }
    }

    async fn request(&self, request: &ConsentRequest) -> Result<ConsentDecision, ConsentError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ConsentError::Unavailable);
        }

        self.requests.write().push(request.clone());
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.prompted.notify_one();

        let decision = self
            .answer_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(ConsentError::Unavailable)?;

        // The OS remembers a grant
        if decision == ConsentDecision::Granted {
            self.granted.store(true, Ordering::SeqCst);
        }
        Ok(decision)
    }
}
