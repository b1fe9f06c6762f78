//! Terminal side of a conversation.

use async_trait::async_trait;
use basic_dialog_runtime::error::ServiceError;
use basic_dialog_runtime::external::SessionTransport;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

/// Writes every outbound message to stdout, one per line.
#[derive(Debug)]
pub struct ConsoleTransport {
    out: Mutex<Stdout>,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

#[async_trait]
impl SessionTransport for ConsoleTransport {
    async fn send(&self, _session_id: &str, message: &str) -> Result<(), ServiceError> {
        let mut out = self.out.lock().await;
        let line = format!("bot> {}\n", message);
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| ServiceError::Transient(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| ServiceError::Transient(e.to_string()))
    }
}

/// Print the input prompt without a trailing newline.
pub async fn prompt() -> std::io::Result<()> {
    let mut out = tokio::io::stdout();
    out.write_all(b"you> ").await?;
    out.flush().await
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}
