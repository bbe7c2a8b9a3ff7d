//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use leadkit::adapter::{validate_typed, AdapterError, FieldIssue, SiteAdapter, ValidatedAdapter};
use leadkit::config::{LeadKitConfig, MessageConfig};
use leadkit::handlers::LeadHandlers;
use leadkit::message::MessageComposer;
use leadkit::pipeline::WorkerContext;
use leadkit::record::{JobRecord, SendResult, Stage};
use leadkit::render::{DocumentRenderer, RenderError, RenderRequest};
use leadkit::store::{MemoryBackend, RecordBackend, RecordStore, StoreError};
use leadkit::transmit::{MessageTransmitter, OutboundMessage, TransmitError};
use leadkit::trigger::{BackgroundTrigger, TriggerError};
use leadkit::JobId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate)]
struct ContactForm {
    #[validate(length(min = 1, message = "Name is required"))]
    name: String,
    #[validate(email(message = "Invalid email"))]
    email: String,
}

/// Site accepting `{name, email}` submissions.
pub struct ContactSite;

impl SiteAdapter for ContactSite {
    fn site_slug(&self) -> &str {
        "acme"
    }
    fn template_path(&self) -> &str {
        "/public/pdf/lead.html"
    }
    fn validate(&self, payload: &Value) -> Result<Value, Vec<FieldIssue>> {
        validate_typed::<ContactForm>(payload)
    }
    fn build_document_model(&self, payload: &Value) -> Result<Value, AdapterError> {
        Ok(json!({ "lead": payload }))
    }
    fn render_message_html(&self, payload: &Value) -> Result<String, AdapterError> {
        Ok(format!("<p>New lead from {}</p>", payload["name"].as_str().unwrap_or_default()))
    }
    fn render_message_text(&self, payload: &Value) -> Result<String, AdapterError> {
        Ok(format!("New lead from {}", payload["name"].as_str().unwrap_or_default()))
    }
}

/// Renderer returning a fixed document, or failing on demand.
#[derive(Default)]
pub struct StubRenderer {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl DocumentRenderer for StubRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<Bytes, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RenderError::Engine {
                message: "engine down".into(),
                correlation_id: request.correlation_id,
            });
        }
        Ok(Bytes::from_static(b"%PDF-1.7 stub"))
    }
}

/// Transmitter capturing every message, or failing on demand.
///
/// With `watch` set, it also captures the job record as stored at the
/// moment of sending. With `delay` set, it takes that long to send.
#[derive(Default)]
pub struct StubTransmitter {
    pub fail: AtomicBool,
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub delay: Mutex<Option<Duration>>,
    pub watch: Mutex<Option<RecordStore>>,
    pub records_at_send: Mutex<Vec<JobRecord>>,
}

#[async_trait]
impl MessageTransmitter for StubTransmitter {
    async fn send(&self, message: OutboundMessage) -> Result<SendResult, TransmitError> {
        let correlation_id = message.correlation_id;
        let watch = self.watch.lock().clone();
        if let Some(store) = watch {
            if let Some(record) = store.get(&correlation_id).await.unwrap() {
                self.records_at_send.lock().push(record);
            }
        }
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = SendResult {
            message_id: message.message_id.clone(),
            accepted: message.to.clone(),
            rejected: vec![],
        };
        self.sent.lock().push(message);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransmitError::Delivery {
                message: "channel timeout".into(),
                correlation_id,
            });
        }
        Ok(result)
    }
}

/// Trigger recording the ids it was asked to run.
#[derive(Default)]
pub struct StubTrigger {
    pub fail: AtomicBool,
    pub calls: Mutex<Vec<(String, JobId)>>,
}

#[async_trait]
impl BackgroundTrigger for StubTrigger {
    async fn trigger(&self, origin: &str, id: &JobId) -> Result<(), TriggerError> {
        self.calls.lock().push((origin.to_string(), *id));
        if self.fail.load(Ordering::SeqCst) {
            return Err(TriggerError::Status(503));
        }
        Ok(())
    }
}

impl StubTrigger {
    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }
}

/// Handlers wired to stubs, plus handles on the stubs.
pub struct Harness {
    pub handlers: Arc<LeadHandlers>,
    pub renderer: Arc<StubRenderer>,
    pub transmitter: Arc<StubTransmitter>,
    pub trigger: Arc<StubTrigger>,
}

pub fn config() -> LeadKitConfig {
    let mut config = LeadKitConfig::default();
    config.site.url = Some("https://acme.example".into());
    config.message = MessageConfig {
        to: Some("owner@acme.example".into()),
        from: Some("leads@acme.example".into()),
        inline_logo: false,
        ..MessageConfig::default()
    };
    config
}

/// Memory backend that fails the first save of a record at `fail_at`.
pub struct FlakyBackend {
    inner: MemoryBackend,
    fail_at: Mutex<Option<Stage>>,
}

impl FlakyBackend {
    pub fn failing_once_at(stage: Stage) -> Self {
        Self {
            inner: MemoryBackend::new(),
            fail_at: Mutex::new(Some(stage)),
        }
    }
}

#[async_trait]
impl RecordBackend for FlakyBackend {
    async fn load(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        self.inner.load(id).await
    }

    async fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        let fail = {
            let mut fail_at = self.fail_at.lock();
            if *fail_at == Some(record.stage) {
                *fail_at = None;
                true
            } else {
                false
            }
        };
        if fail {
            return Err(StoreError::Backend("connection reset".into()));
        }
        self.inner.save(record).await
    }
}

pub fn harness_with(config: LeadKitConfig) -> Harness {
    harness_with_store(config, RecordStore::in_memory("acme"))
}

pub fn harness_with_store(config: LeadKitConfig, store: RecordStore) -> Harness {
    let renderer = Arc::new(StubRenderer::default());
    let transmitter = Arc::new(StubTransmitter::default());
    let trigger = Arc::new(StubTrigger::default());

    let adapter = ValidatedAdapter::new(Arc::new(ContactSite)).unwrap();
    let context = WorkerContext::new(
        adapter,
        renderer.clone(),
        transmitter.clone(),
        MessageComposer::new(config.message.clone()),
    );
    let handlers = LeadHandlers::new(
        store,
        Arc::new(context),
        trigger.clone(),
        Arc::new(config),
    );

    Harness {
        handlers: Arc::new(handlers),
        renderer,
        transmitter,
        trigger,
    }
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn lead() -> Value {
    json!({ "name": "Ada Lovelace", "email": "ada@example.com" })
}
