use gridloom_domain::error::Result;
use gridloom_domain::event::InvocationId;
use gridloom_domain::schema::Schema;
use gridloom_domain::stream::ModelStepResult;
use gridloom_domain::{Message, ToolDefinition};

/// Which tools a model step may call, distinct from which tools exist.
#[derive(Debug, Clone, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    Named(String),
}

/// Everything a `ModelAdapter::step` call needs to produce one model step:
/// the folded conversation view, the tool surface visible under the
/// current tool policy, and the agent's structured-output contract, if
/// any. Assembled by context rendering (`gridloom-engine`) from the
/// session's folded events; the adapter never reads the session directly.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub invocation_id: InvocationId,
    pub agent_name: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub output_schema: Option<Schema>,
}

/// Provider-tagged model selection plus generation knobs. The engine
/// routes to an adapter purely by `provider`; adapters treat everything
/// else as opaque passthrough.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Provider-specific knobs (reasoning effort, thinking budget, …) that
    /// the engine never interprets, only forwards.
    pub extra: serde_json::Value,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
            extra: serde_json::Value::Null,
        }
    }
}

/// A cooperative cancellation signal threaded through a running
/// invocation; `gridloom-engine`'s `CancelToken` provides the concrete
/// implementation adapters are handed at call time.
pub trait CancelSignal: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// The contract every model provider transport implements. The engine
/// never talks to a vendor API directly; it only calls `step` on
/// whichever adapter is registered for a `ModelConfig::provider` tag.
/// Provider wire protocols (openai/gemini/claude) are out of scope here —
/// the engine treats a `ModelAdapter` as opaque and routes only by tag.
#[async_trait::async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Run one model step to completion, returning the ledger-ready
    /// events and any tool calls the agent loop must now process.
    ///
    /// Implementations that stream internally should emit `StreamEvent`s
    /// for their own bookkeeping (token deltas, tool-call assembly), but
    /// this method's return value is always the fully-assembled
    /// `ModelStepResult` — the agent loop re-derives the live
    /// `AssistantDelta`/`ThoughtDelta` stream from it.
    async fn step(
        &self,
        ctx: &RenderContext,
        config: &ModelConfig,
        cancel: &dyn CancelSignal,
    ) -> Result<ModelStepResult>;

    /// Identifier used in logs/traces; not necessarily the provider tag
    /// (one adapter instance may serve several provider tags).
    fn adapter_id(&self) -> &str;
}
