//! In-process implementations of the external interfaces.
//!
//! [`FsSourceStore`] is what the CLI runs against; the in-memory adapters
//! back tests and embedders that have no real collaborator to plug in.

use crate::error::ServiceError;
use crate::external::{
    BotMemoryStore, ChatMessage, Collaborators, Completion, HttpClient, KnowledgeBase,
    LlmProvider, SessionTransport, Snippet, SourceChange, SourceDocument, SourceStore,
};
use crate::value::Value;
use async_trait::async_trait;
use basic_dialog_parser::FunctionTool;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Hex SHA-256 of the source bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ============================================================================
// Source stores
// ============================================================================

/// Scripts under `root/<bot_id>/<path>`, with change detection by polling.
#[derive(Debug, Clone)]
pub struct FsSourceStore {
    root: PathBuf,
    poll_interval: Duration,
}

impl FsSourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn resolve(&self, bot_id: &str, path: &str) -> Result<PathBuf, ServiceError> {
        let relative = Path::new(path);
        let escapes = Path::new(bot_id)
            .components()
            .chain(relative.components())
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ServiceError::Rejected(format!("invalid script path '{}'", path)));
        }
        Ok(self.root.join(bot_id).join(relative))
    }
}

#[async_trait]
impl SourceStore for FsSourceStore {
    async fn get(&self, bot_id: &str, path: &str) -> Result<SourceDocument, ServiceError> {
        let full = self.resolve(bot_id, path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(SourceDocument {
                fingerprint: fingerprint(&bytes),
                bytes,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServiceError::NotFound(full.display().to_string()))
            }
            Err(e) => Err(ServiceError::Transient(format!("{}: {}", full.display(), e))),
        }
    }

    fn subscribe(&self, bot_id: &str, prefix: &str) -> BoxStream<'static, SourceChange> {
        let poll = PollState {
            base: self.root.join(bot_id),
            bot_id: bot_id.to_string(),
            prefix: prefix.to_string(),
            interval: tokio::time::interval(self.poll_interval),
            known: HashMap::new(),
            pending: VecDeque::new(),
            primed: false,
        };
        stream::unfold(poll, |mut poll| async move {
            loop {
                if let Some(change) = poll.pending.pop_front() {
                    return Some((change, poll));
                }
                poll.interval.tick().await;
                let snapshot = scan(&poll.base).await;
                if poll.primed {
                    for (path, fp) in &snapshot {
                        if path.starts_with(&poll.prefix) && poll.known.get(path) != Some(fp) {
                            poll.pending.push_back(SourceChange {
                                bot_id: poll.bot_id.clone(),
                                path: path.clone(),
                                fingerprint: fp.clone(),
                            });
                        }
                    }
                }
                poll.known = snapshot;
                poll.primed = true;
            }
        })
        .boxed()
    }
}

struct PollState {
    base: PathBuf,
    bot_id: String,
    prefix: String,
    interval: tokio::time::Interval,
    known: HashMap<String, String>,
    pending: VecDeque<SourceChange>,
    primed: bool,
}

/// Fingerprint every file under `base`, keyed by `/`-separated relative path.
async fn scan(base: &Path) -> HashMap<String, String> {
    let mut found = HashMap::new();
    let mut dirs = vec![base.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => dirs.push(path),
                Ok(ft) if ft.is_file() => {
                    let Ok(bytes) = tokio::fs::read(&path).await else {
                        continue;
                    };
                    if let Ok(relative) = path.strip_prefix(base) {
                        let key = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/");
                        found.insert(key, fingerprint(&bytes));
                    }
                }
                _ => {}
            }
        }
    }
    found
}

/// Scripts held in memory; [`put`](Self::put) notifies subscribers.
pub struct InMemorySourceStore {
    documents: RwLock<HashMap<(String, String), SourceDocument>>,
    changes: broadcast::Sender<SourceChange>,
}

impl Default for InMemorySourceStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            documents: RwLock::new(HashMap::new()),
            changes,
        }
    }
}

impl InMemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `source` and return its fingerprint.
    pub fn put(&self, bot_id: &str, path: &str, source: impl Into<Vec<u8>>) -> String {
        let bytes = source.into();
        let fp = fingerprint(&bytes);
        self.documents.write().insert(
            (bot_id.to_string(), path.to_string()),
            SourceDocument {
                bytes,
                fingerprint: fp.clone(),
            },
        );
        // No receivers is fine: nobody is watching yet.
        let _ = self.changes.send(SourceChange {
            bot_id: bot_id.to_string(),
            path: path.to_string(),
            fingerprint: fp.clone(),
        });
        fp
    }
}

#[async_trait]
impl SourceStore for InMemorySourceStore {
    async fn get(&self, bot_id: &str, path: &str) -> Result<SourceDocument, ServiceError> {
        self.documents
            .read()
            .get(&(bot_id.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("{}/{}", bot_id, path)))
    }

    fn subscribe(&self, bot_id: &str, prefix: &str) -> BoxStream<'static, SourceChange> {
        let bot_id = bot_id.to_string();
        let prefix = prefix.to_string();
        stream::unfold(self.changes.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(change) => return Some((change, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "source change subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |change| {
            futures::future::ready(change.bot_id == bot_id && change.path.starts_with(&prefix))
        })
        .boxed()
    }
}

// ============================================================================
// Memory and transport
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryBotMemory {
    entries: RwLock<HashMap<(String, String), Value>>,
}

#[async_trait]
impl BotMemoryStore for InMemoryBotMemory {
    async fn get(&self, bot_id: &str, key: &str) -> Result<Value, ServiceError> {
        Ok(self
            .entries
            .read()
            .get(&(bot_id.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn set(&self, bot_id: &str, key: &str, value: Value) -> Result<(), ServiceError> {
        self.entries
            .write()
            .insert((bot_id.to_string(), key.to_string()), value);
        Ok(())
    }
}

/// Keeps every outbound message, in order.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    pub fn messages_for(&self, session_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(s, _)| s == session_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl SessionTransport for RecordingTransport {
    async fn send(&self, session_id: &str, message: &str) -> Result<(), ServiceError> {
        self.sent
            .lock()
            .push((session_id.to_string(), message.to_string()));
        Ok(())
    }
}

// ============================================================================
// Unconfigured collaborators
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct NoKnowledgeBase;

#[async_trait]
impl KnowledgeBase for NoKnowledgeBase {
    async fn search(&self, _collections: &[String], _query: &str) -> Result<Vec<Snippet>, ServiceError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredLlm;

#[async_trait]
impl LlmProvider for UnconfiguredLlm {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: &[FunctionTool],
    ) -> Result<Completion, ServiceError> {
        Err(ServiceError::Rejected("no LLM provider is configured".to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredHttp;

#[async_trait]
impl HttpClient for UnconfiguredHttp {
    async fn get(&self, url: &str) -> Result<String, ServiceError> {
        Err(ServiceError::Rejected(format!("outbound HTTP is disabled (GET {})", url)))
    }

    async fn post(&self, url: &str, _body: &str) -> Result<String, ServiceError> {
        Err(ServiceError::Rejected(format!("outbound HTTP is disabled (POST {})", url)))
    }
}

impl Collaborators {
    /// Everything but the transport left unconfigured, with in-memory bot memory.
    pub fn new(transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            transport,
            memory: Arc::new(InMemoryBotMemory::default()),
            knowledge: Arc::new(NoKnowledgeBase),
            llm: Arc::new(UnconfiguredLlm),
            http: Arc::new(UnconfiguredHttp),
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn BotMemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = http;
        self
    }
}
