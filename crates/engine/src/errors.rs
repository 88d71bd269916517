//! Composed error handling & recovery policy (§4.8).
//!
//! Grounded on the teacher's ad-hoc retry/backoff logic in
//! `runtime/turn.rs` (a single hardcoded retry loop around the model
//! call), generalized into an ordered chain of classifiers so both the
//! model phase and the tool phase share one recovery vocabulary.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use gridloom_domain::error::Error;

/// Which phase of the reasoning loop produced the error, since the
/// default recovery differs (§4.8: `Skip` for tool phase, `Throw` for
/// model phase).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPhase {
    Model,
    Tool,
}

/// Everything a handler needs to classify and recover from an error.
pub struct ErrorCtx<'a> {
    pub phase: ErrorPhase,
    pub error: &'a Error,
    pub attempt: u32,
    pub tool_name: Option<&'a str>,
}

/// The recovery action a handler decides on for one error.
#[derive(Debug, Clone)]
pub enum Recovery {
    Throw,
    Abort,
    Retry { delay_ms: Option<u64> },
    Fallback { result: Value },
    Skip,
    /// This handler does not classify the error; fall through to the
    /// next handler in the chain (or the phase default).
    Pass,
}

pub trait ErrorHandler: Send + Sync {
    fn can_handle(&self, ctx: &ErrorCtx) -> bool;
    fn handle(&self, ctx: &ErrorCtx) -> Recovery;
}

/// Matches `Error::Timeout` and recommends a bounded retry.
pub struct TimeoutHandler {
    pub max_attempts: u32,
}

impl ErrorHandler for TimeoutHandler {
    fn can_handle(&self, ctx: &ErrorCtx) -> bool {
        matches!(ctx.error, Error::Timeout(_))
    }

    fn handle(&self, ctx: &ErrorCtx) -> Recovery {
        if ctx.attempt < self.max_attempts {
            Recovery::Retry { delay_ms: Some(500) }
        } else {
            Recovery::Skip
        }
    }
}

/// Matches provider errors whose message signals rate limiting and
/// recommends an exponential backoff retry.
pub struct RateLimitHandler {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl ErrorHandler for RateLimitHandler {
    fn can_handle(&self, ctx: &ErrorCtx) -> bool {
        matches!(ctx.error, Error::Provider { message, .. } if message.to_ascii_lowercase().contains("rate limit"))
    }

    fn handle(&self, ctx: &ErrorCtx) -> Recovery {
        if ctx.attempt >= self.max_attempts {
            return Recovery::Throw;
        }
        let delay = (self.base_delay_ms.saturating_mul(1 << ctx.attempt.min(16))).min(self.max_delay_ms);
        Recovery::Retry { delay_ms: Some(delay) }
    }
}

/// Logs every error it sees at `warn` level, then passes — intended to
/// sit first in a chain so nothing slips through unlogged, never itself
/// the deciding handler.
pub struct LoggingHandler;

impl ErrorHandler for LoggingHandler {
    fn can_handle(&self, _ctx: &ErrorCtx) -> bool {
        true
    }

    fn handle(&self, ctx: &ErrorCtx) -> Recovery {
        tracing::warn!(phase = ?ctx.phase, tool = ctx.tool_name, attempt = ctx.attempt, error = %ctx.error, "engine error observed");
        Recovery::Pass
    }
}

/// A generic retry-with-backoff handler that applies to any error,
/// bounded by `max_attempts`. Useful as a catch-all ahead of the phase
/// default.
pub struct RetryHandler {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl ErrorHandler for RetryHandler {
    fn can_handle(&self, _ctx: &ErrorCtx) -> bool {
        true
    }

    fn handle(&self, ctx: &ErrorCtx) -> Recovery {
        if ctx.attempt >= self.max_attempts {
            return Recovery::Pass;
        }
        let delay = (self.base_delay_ms.saturating_mul(1 << ctx.attempt.min(16))).min(self.max_delay_ms);
        Recovery::Retry { delay_ms: Some(delay) }
    }
}

/// Ordered chain of handlers; the first non-`Pass` recovery wins. If
/// every handler passes, the caller applies the phase default
/// (`Skip` for tool errors, `Throw` for model errors — §4.8).
#[derive(Clone, Default)]
pub struct ComposedErrorHandler {
    handlers: Vec<Arc<dyn ErrorHandler>>,
}

impl ComposedErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn resolve(&self, ctx: &ErrorCtx) -> Recovery {
        for handler in &self.handlers {
            if handler.can_handle(ctx) {
                match handler.handle(ctx) {
                    Recovery::Pass => continue,
                    other => return other,
                }
            }
        }
        match ctx.phase {
            ErrorPhase::Tool => Recovery::Skip,
            ErrorPhase::Model => Recovery::Throw,
        }
    }
}

pub fn backoff_duration(delay_ms: Option<u64>) -> Duration {
    Duration::from_millis(delay_ms.unwrap_or(200))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chain_defaults_to_skip_for_tool_phase() {
        let chain = ComposedErrorHandler::new();
        let err = Error::Other("boom".into());
        let ctx = ErrorCtx {
            phase: ErrorPhase::Tool,
            error: &err,
            attempt: 0,
            tool_name: Some("exec"),
        };
        assert!(matches!(chain.resolve(&ctx), Recovery::Skip));
    }

    #[test]
    fn empty_chain_defaults_to_throw_for_model_phase() {
        let chain = ComposedErrorHandler::new();
        let err = Error::Other("boom".into());
        let ctx = ErrorCtx {
            phase: ErrorPhase::Model,
            error: &err,
            attempt: 0,
            tool_name: None,
        };
        assert!(matches!(chain.resolve(&ctx), Recovery::Throw));
    }

    #[test]
    fn timeout_handler_retries_until_exhausted() {
        let chain = ComposedErrorHandler::new().push(Arc::new(TimeoutHandler { max_attempts: 1 }));
        let err = Error::Timeout("slow tool".into());
        let first = ErrorCtx {
            phase: ErrorPhase::Tool,
            error: &err,
            attempt: 0,
            tool_name: Some("exec"),
        };
        assert!(matches!(chain.resolve(&first), Recovery::Retry { .. }));

        let second = ErrorCtx {
            phase: ErrorPhase::Tool,
            error: &err,
            attempt: 1,
            tool_name: Some("exec"),
        };
        assert!(matches!(chain.resolve(&second), Recovery::Skip));
    }

    #[test]
    fn first_matching_handler_short_circuits_chain() {
        struct AlwaysAbort;
        impl ErrorHandler for AlwaysAbort {
            fn can_handle(&self, _ctx: &ErrorCtx) -> bool {
                true
            }
            fn handle(&self, _ctx: &ErrorCtx) -> Recovery {
                Recovery::Abort
            }
        }
        let chain = ComposedErrorHandler::new().push(Arc::new(LoggingHandler)).push(Arc::new(AlwaysAbort));
        let err = Error::Other("boom".into());
        let ctx = ErrorCtx {
            phase: ErrorPhase::Model,
            error: &err,
            attempt: 0,
            tool_name: None,
        };
        assert!(matches!(chain.resolve(&ctx), Recovery::Abort));
    }
}
