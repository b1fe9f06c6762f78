//! The compilation cache and tool registry.
//!
//! One slot per `(bot, script path)` holds the last good compilation, the
//! last failure, and the fingerprint of the newest source seen for that
//! script. Lookups take a short read lock; compiling takes a per-slot async
//! mutex so concurrent callers for the same script wait for one pipeline
//! run and then share its result.
//!
//! # Freshness
//!
//! An entry is served only while its fingerprint matches the newest source
//! fingerprint. Callers take a [`ReadTicket`] before reading a source; a
//! fingerprint read under an older ticket never replaces one recorded under
//! a newer ticket, so a slow caller holding pre-edit bytes cannot make the
//! old compilation current again. After a failed recompile the previous good entry is kept
//! (see [`ToolRegistry::last_good`]) but not served as current; it is
//! replaced once a corrected source compiles.
//!
//! # Negative cache
//!
//! A failed compilation is remembered for `cache.negative_ttl_ms`. Asking
//! for the same fingerprint inside that window returns the cached error
//! without re-running the pipeline.

use crate::config::CacheConfig;
use basic_dialog_parser::{
    compile_bytes, CompileError, Script, SemanticWarning, ToolSchemas, ToolSignature,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A script that passed the whole pipeline. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledScript {
    pub bot_id: String,
    pub script_path: String,
    pub fingerprint: String,
    pub script: Script,
    pub signature: ToolSignature,
    pub schemas: ToolSchemas,
    pub warnings: Vec<SemanticWarning>,
    pub compiled_at: DateTime<Utc>,
}

impl CompiledScript {
    pub fn tool_name(&self) -> &str {
        &self.signature.tool_name
    }

    pub fn is_discoverable(&self) -> bool {
        self.signature.is_discoverable()
    }
}

type ScriptKey = (String, String);

/// Orders source reads. Taken before the read, so a larger ticket saw a
/// source at least as new as a smaller one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadTicket(u64);

#[derive(Debug)]
struct Failure {
    fingerprint: String,
    error: CompileError,
    at: Instant,
}

#[derive(Debug, Default)]
struct SlotState {
    current: Option<Arc<CompiledScript>>,
    failure: Option<Failure>,
    /// Fingerprint of the newest source seen.
    latest: Option<String>,
    /// Ticket of the read that recorded `latest`.
    observed: ReadTicket,
}

impl SlotState {
    fn observe(&mut self, fingerprint: &str, ticket: ReadTicket) -> bool {
        if ticket < self.observed {
            return false;
        }
        self.observed = ticket;
        if self.latest.as_deref() == Some(fingerprint) {
            return false;
        }
        self.latest = Some(fingerprint.to_string());
        true
    }

    fn fresh(&self) -> Option<&Arc<CompiledScript>> {
        self.current
            .as_ref()
            .filter(|c| self.latest.as_deref() == Some(c.fingerprint.as_str()))
    }
}

#[derive(Debug, Default)]
struct Slot {
    compile_lock: tokio::sync::Mutex<()>,
    state: RwLock<SlotState>,
}

#[derive(Debug)]
pub struct ToolRegistry {
    slots: RwLock<HashMap<ScriptKey, Arc<Slot>>>,
    negative_ttl: Duration,
    pipeline_runs: AtomicUsize,
    reads: AtomicU64,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl ToolRegistry {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            negative_ttl: config.negative_ttl(),
            pipeline_runs: AtomicUsize::new(0),
            reads: AtomicU64::new(0),
        }
    }

    /// A ticket for a source read that is about to start.
    pub fn ticket(&self) -> ReadTicket {
        ReadTicket(self.reads.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Return the compilation for `fingerprint`, compiling `source` if needed.
    ///
    /// The bytes count as read now. Use [`ToolRegistry::compile_observed`]
    /// when the read happened earlier.
    pub async fn compile_or_get(
        &self,
        bot_id: &str,
        script_path: &str,
        source: &[u8],
        fingerprint: &str,
    ) -> Result<Arc<CompiledScript>, CompileError> {
        let ticket = self.ticket();
        self.compile_observed(bot_id, script_path, ticket, source, fingerprint)
            .await
    }

    /// Like [`ToolRegistry::compile_or_get`] for bytes read under `ticket`.
    ///
    /// At most one pipeline run per script is in flight; callers arriving
    /// during a run wait for it and receive its result. The result is the
    /// compilation of `source` even when a newer read has since been
    /// recorded; only the newest one is served by [`ToolRegistry::get`].
    pub async fn compile_observed(
        &self,
        bot_id: &str,
        script_path: &str,
        ticket: ReadTicket,
        source: &[u8],
        fingerprint: &str,
    ) -> Result<Arc<CompiledScript>, CompileError> {
        let slot = self.slot(bot_id, script_path);
        slot.state.write().observe(fingerprint, ticket);

        if let Some(hit) = self.cached(&slot, fingerprint) {
            return hit;
        }

        let _compiling = slot.compile_lock.lock().await;
        if let Some(hit) = self.cached(&slot, fingerprint) {
            debug!(bot = bot_id, script = script_path, "joined in-flight compilation");
            return hit;
        }

        self.pipeline_runs.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        match compile_bytes(source, script_path) {
            Ok(compilation) => {
                let compiled = Arc::new(CompiledScript {
                    bot_id: bot_id.to_string(),
                    script_path: script_path.to_string(),
                    fingerprint: fingerprint.to_string(),
                    script: compilation.script,
                    signature: compilation.signature,
                    schemas: compilation.schemas,
                    warnings: compilation.warnings,
                    compiled_at: Utc::now(),
                });
                let mut state = slot.state.write();
                if state.current.is_some() && state.latest.as_deref() != Some(fingerprint) {
                    debug!(bot = bot_id, script = script_path, "compiled a superseded source");
                    return Ok(compiled);
                }
                state.current = Some(Arc::clone(&compiled));
                state.failure = None;
                info!(
                    bot = bot_id,
                    script = script_path,
                    tool = %compiled.tool_name(),
                    warnings = compiled.warnings.len(),
                    elapsed = ?started.elapsed(),
                    "compiled script"
                );
                Ok(compiled)
            }
            Err(error) => {
                warn!(
                    bot = bot_id,
                    script = script_path,
                    errors = error.diagnostics.len(),
                    "compilation failed"
                );
                let mut state = slot.state.write();
                if state.latest.as_deref() == Some(fingerprint) {
                    state.failure = Some(Failure {
                        fingerprint: fingerprint.to_string(),
                        error: error.clone(),
                        at: Instant::now(),
                    });
                }
                Err(error)
            }
        }
    }

    /// The current compilation, if it matches the newest source.
    pub fn get(&self, bot_id: &str, script_path: &str) -> Option<Arc<CompiledScript>> {
        let slot = self.peek(bot_id, script_path)?;
        let state = slot.state.read();
        state.fresh().cloned()
    }

    /// The last successful compilation, even if the source has since changed.
    pub fn last_good(&self, bot_id: &str, script_path: &str) -> Option<Arc<CompiledScript>> {
        let slot = self.peek(bot_id, script_path)?;
        let state = slot.state.read();
        state.current.clone()
    }

    /// The most recent compile error for a script, while it is unresolved.
    pub fn last_failure(&self, bot_id: &str, script_path: &str) -> Option<CompileError> {
        let slot = self.peek(bot_id, script_path)?;
        let state = slot.state.read();
        state.failure.as_ref().map(|f| f.error.clone())
    }

    /// Discoverable, up-to-date tools of a bot, sorted by name.
    pub fn tools(&self, bot_id: &str) -> Vec<Arc<CompiledScript>> {
        let slots: Vec<Arc<Slot>> = self
            .slots
            .read()
            .iter()
            .filter(|((bot, _), _)| bot == bot_id)
            .map(|(_, slot)| Arc::clone(slot))
            .collect();

        let mut tools: Vec<_> = slots
            .iter()
            .filter_map(|slot| slot.state.read().fresh().cloned())
            .filter(|compiled| compiled.is_discoverable())
            .collect();
        tools.sort_by(|a, b| a.tool_name().cmp(b.tool_name()));
        tools
    }

    pub fn find_tool(&self, bot_id: &str, tool_name: &str) -> Option<Arc<CompiledScript>> {
        self.tools(bot_id)
            .into_iter()
            .find(|compiled| compiled.tool_name() == tool_name)
    }

    /// Record that the source now has `fingerprint`. The cached entry stops
    /// being served until a compilation of that fingerprint succeeds.
    pub fn invalidate(&self, bot_id: &str, script_path: &str, fingerprint: &str) {
        let ticket = self.ticket();
        let slot = self.slot(bot_id, script_path);
        if slot.state.write().observe(fingerprint, ticket) {
            debug!(bot = bot_id, script = script_path, "cache entry invalidated");
        }
    }

    /// Script path of the last good compilation named `tool_name`, served or
    /// not.
    pub fn script_for_tool(&self, bot_id: &str, tool_name: &str) -> Option<String> {
        let slots = self.slots.read();
        let mut paths: Vec<&String> = slots
            .iter()
            .filter(|((bot, _), slot)| {
                bot == bot_id
                    && slot
                        .state
                        .read()
                        .current
                        .as_ref()
                        .is_some_and(|c| c.tool_name() == tool_name)
            })
            .map(|((_, path), _)| path)
            .collect();
        paths.sort();
        paths.first().map(|path| path.to_string())
    }

    /// Forget a script entirely, e.g. after its source was deleted.
    pub fn remove(&self, bot_id: &str, script_path: &str) -> bool {
        self.slots
            .write()
            .remove(&(bot_id.to_string(), script_path.to_string()))
            .is_some()
    }

    /// Number of pipeline runs started so far.
    pub fn pipeline_runs(&self) -> usize {
        self.pipeline_runs.load(Ordering::SeqCst)
    }

    fn cached(
        &self,
        slot: &Slot,
        fingerprint: &str,
    ) -> Option<Result<Arc<CompiledScript>, CompileError>> {
        let state = slot.state.read();
        if let Some(current) = &state.current {
            if current.fingerprint == fingerprint {
                return Some(Ok(Arc::clone(current)));
            }
        }
        match &state.failure {
            Some(failure)
                if failure.fingerprint == fingerprint && failure.at.elapsed() < self.negative_ttl =>
            {
                Some(Err(failure.error.clone()))
            }
            _ => None,
        }
    }

    fn peek(&self, bot_id: &str, script_path: &str) -> Option<Arc<Slot>> {
        self.slots
            .read()
            .get(&(bot_id.to_string(), script_path.to_string()))
            .cloned()
    }

    fn slot(&self, bot_id: &str, script_path: &str) -> Arc<Slot> {
        if let Some(slot) = self.peek(bot_id, script_path) {
            return slot;
        }
        let mut slots = self.slots.write();
        Arc::clone(
            slots
                .entry((bot_id.to_string(), script_path.to_string()))
                .or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fingerprint;

    const GOOD: &str = "DESCRIPTION \"Says hi\"\nTALK \"hi\"\n";
    const BROKEN: &str = "DESCRIPTION \"Says hi\"\nIF x THEN\n";

    async fn put(registry: &ToolRegistry, source: &str) -> Result<Arc<CompiledScript>, CompileError> {
        registry
            .compile_or_get("bot", "hello.bas", source.as_bytes(), &fingerprint(source.as_bytes()))
            .await
    }

    #[tokio::test]
    async fn test_hit_does_not_recompile() {
        let registry = ToolRegistry::default();
        let first = put(&registry, GOOD).await.unwrap();
        let second = put(&registry, GOOD).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.pipeline_runs(), 1);
        assert_eq!(first.tool_name(), "hello");
    }

    #[tokio::test]
    async fn test_failure_keeps_last_good_but_stops_serving_it() {
        let registry = ToolRegistry::default();
        let good = put(&registry, GOOD).await.unwrap();

        assert!(put(&registry, BROKEN).await.is_err());
        assert!(registry.get("bot", "hello.bas").is_none());
        assert!(registry.tools("bot").is_empty());
        assert_eq!(registry.last_good("bot", "hello.bas"), Some(good));
        assert!(registry.last_failure("bot", "hello.bas").is_some());
    }

    #[tokio::test]
    async fn test_invalidate_hides_stale_entry() {
        let registry = ToolRegistry::default();
        put(&registry, GOOD).await.unwrap();
        assert_eq!(registry.find_tool("bot", "hello").map(|c| c.script_path.clone()), Some("hello.bas".into()));

        registry.invalidate("bot", "hello.bas", "new-fingerprint");
        assert!(registry.find_tool("bot", "hello").is_none());
    }

    #[tokio::test]
    async fn test_undescribed_scripts_are_not_tools() {
        let registry = ToolRegistry::default();
        registry
            .compile_or_get("bot", "greet.bas", b"TALK \"hi\"\n", "fp")
            .await
            .unwrap();
        assert!(registry.get("bot", "greet.bas").is_some());
        assert!(registry.tools("bot").is_empty());
    }

    #[tokio::test]
    async fn test_slow_reader_cannot_roll_back_an_edit() {
        const EDITED: &str = "DESCRIPTION \"Says hi\"\nTALK \"hello\"\n";
        let registry = ToolRegistry::default();
        put(&registry, GOOD).await.unwrap();

        // One caller reads the old bytes, then the script is edited and a
        // second caller reads and compiles the new bytes first.
        let slow = registry.ticket();
        let fast = registry.ticket();
        let edited_fp = fingerprint(EDITED.as_bytes());
        registry
            .compile_observed("bot", "hello.bas", fast, EDITED.as_bytes(), &edited_fp)
            .await
            .unwrap();

        let old = registry
            .compile_observed("bot", "hello.bas", slow, GOOD.as_bytes(), &fingerprint(GOOD.as_bytes()))
            .await
            .unwrap();
        assert_ne!(old.fingerprint, edited_fp);

        let served = registry.get("bot", "hello.bas").unwrap();
        assert_eq!(served.fingerprint, edited_fp);
        assert_eq!(registry.find_tool("bot", "hello").map(|c| c.fingerprint.clone()), Some(edited_fp));
    }

    #[tokio::test]
    async fn test_script_for_tool_survives_invalidation() {
        let registry = ToolRegistry::default();
        put(&registry, GOOD).await.unwrap();
        registry.invalidate("bot", "hello.bas", "new-fingerprint");

        assert!(registry.find_tool("bot", "hello").is_none());
        assert_eq!(registry.script_for_tool("bot", "hello"), Some("hello.bas".into()));
        assert_eq!(registry.script_for_tool("bot", "other"), None);
        assert_eq!(registry.script_for_tool("elsewhere", "hello"), None);
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = ToolRegistry::default();
        put(&registry, GOOD).await.unwrap();
        assert!(registry.remove("bot", "hello.bas"));
        assert!(!registry.remove("bot", "hello.bas"));
        assert!(registry.get("bot", "hello.bas").is_none());
    }
}
