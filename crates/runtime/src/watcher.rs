//! Recompile scripts when their sources change.

use crate::service::DialogService;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Script files the watcher compiles; other changes under the prefix are ignored.
pub const SCRIPT_EXTENSION: &str = ".bas";

/// Follow change notifications for `bot_id` under `prefix` until `cancel`
/// fires or the store ends the stream.
///
/// Each change first invalidates the cached entry, so the old compilation
/// is no longer served, then recompiles. Compile errors are logged and
/// stay in the registry's negative cache.
pub async fn watch_sources(
    service: Arc<DialogService>,
    bot_id: String,
    prefix: String,
    cancel: CancellationToken,
) {
    let mut changes = service.sources().subscribe(&bot_id, &prefix);
    info!(bot = %bot_id, %prefix, "watching scripts");

    loop {
        let change = tokio::select! {
            _ = cancel.cancelled() => break,
            change = changes.next() => match change {
                Some(change) => change,
                None => break,
            },
        };

        if !change.path.ends_with(SCRIPT_EXTENSION) {
            debug!(path = %change.path, "ignoring non-script change");
            continue;
        }

        service
            .registry()
            .invalidate(&change.bot_id, &change.path, &change.fingerprint);
        match service.compile(&change.bot_id, &change.path).await {
            Ok(compiled) => info!(
                bot = %change.bot_id,
                script = %change.path,
                tool = %compiled.tool_name(),
                discoverable = compiled.is_discoverable(),
                "script reloaded"
            ),
            Err(error) => warn!(
                bot = %change.bot_id,
                script = %change.path,
                %error,
                "script changed but does not compile"
            ),
        }
    }

    info!(bot = %bot_id, "stopped watching scripts");
}

/// Run [`watch_sources`] on the current tokio runtime.
pub fn spawn_watcher(
    service: Arc<DialogService>,
    bot_id: impl Into<String>,
    prefix: impl Into<String>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(watch_sources(service, bot_id.into(), prefix.into(), cancel))
}
