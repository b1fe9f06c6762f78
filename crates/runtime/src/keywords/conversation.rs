use super::{arg, done, Invocation, Keyword, KeywordOutcome};
use crate::engine::SuspendReason;
use crate::error::RuntimeError;
use crate::value::{as_number, Value};
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use std::time::Duration;
use tracing::info;

/// `PRINT expr` writes to the log, not to the user.
pub struct Print;

#[async_trait]
impl Keyword for Print {
    fn name(&self) -> &'static str {
        "PRINT"
    }

    async fn invoke(
        &self,
        inv: Invocation<'_>,
        args: Vec<Value>,
    ) -> Result<KeywordOutcome, RuntimeError> {
        info!(
            target: "dialog::print",
            bot = %inv.ctx.bot_id,
            session = %inv.ctx.session_id,
            "{}",
            arg(&args, 0)
        );
        done()
    }
}

/// `WAIT seconds`
///
/// Short waits sleep in place. Anything longer than
/// `engine.max_inline_wait_secs` suspends the run until the deadline.
pub struct Wait;

#[async_trait]
impl Keyword for Wait {
    fn name(&self) -> &'static str {
        "WAIT"
    }

    async fn invoke(
        &self,
        inv: Invocation<'_>,
        args: Vec<Value>,
    ) -> Result<KeywordOutcome, RuntimeError> {
        let seconds = as_number(arg(&args, 0))?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(RuntimeError::InvalidArgument {
                function: "WAIT".to_string(),
                message: format!("expected a non-negative number of seconds, got {seconds}"),
            });
        }

        if seconds <= inv.engine.config().engine.max_inline_wait_secs {
            let cancel = inv.ctx.cancellation();
            tokio::select! {
                _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => {}
            }
            return done();
        }

        let until = TimeDelta::try_milliseconds((seconds * 1000.0) as i64)
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .ok_or_else(|| RuntimeError::InvalidArgument {
                function: "WAIT".to_string(),
                message: format!("{seconds} seconds is too far in the future"),
            })?;
        Ok(KeywordOutcome::Suspend(SuspendReason::Sleeping { until }))
    }
}
