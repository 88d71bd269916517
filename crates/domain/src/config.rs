use serde::{Deserialize, Serialize};

/// Matches the teacher's `MAX_TOOL_LOOPS` bound on the tool-calling loop.
pub const DEFAULT_MAX_STEPS: u32 = 25;

/// Runtime knobs for a single agent's reasoning loop, independent of any
/// particular model adapter or session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "d_max_steps")]
    pub max_steps: u32,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub parallel: ParallelConfig,
    /// Bound on how many past conversation events are folded into a
    /// rendered context; `None` means unbounded.
    #[serde(default = "d_history_window")]
    pub history_window: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: d_max_steps(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            parallel: ParallelConfig::default(),
            history_window: d_history_window(),
        }
    }
}

fn d_max_steps() -> u32 {
    DEFAULT_MAX_STEPS
}
fn d_history_window() -> Option<usize> {
    Some(200)
}

/// Exponential backoff bounds for tool-execution retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: d_max_attempts(),
            base_delay_ms: d_base_delay_ms(),
            max_delay_ms: d_max_delay_ms(),
        }
    }
}

fn d_max_attempts() -> u32 {
    1
}
fn d_base_delay_ms() -> u64 {
    200
}
fn d_max_delay_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default)]
    pub tool_timeout_ms: Option<u64>,
    #[serde(default)]
    pub branch_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ParallelConfig {
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub min_successful: Option<usize>,
}

/// Caps on sub-agent depth and fan-out, mirroring the teacher's
/// `AgentLimits`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgentLimits {
    #[serde(default = "d_max_depth")]
    pub max_depth: u32,
    #[serde(default = "d_max_children")]
    pub max_children_per_turn: u32,
    #[serde(default = "d_max_duration_ms")]
    pub max_duration_ms: u64,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_depth: d_max_depth(),
            max_children_per_turn: d_max_children(),
            max_duration_ms: d_max_duration_ms(),
        }
    }
}

fn d_max_depth() -> u32 {
    3
}
fn d_max_children() -> u32 {
    5
}
fn d_max_duration_ms() -> u64 {
    30_000
}

/// Allow/deny list gating which tool definitions are visible to an agent.
/// Deny always wins over allow; both lists match by case-insensitive
/// prefix, and `"*"` matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolPolicy {
    pub fn allows(&self, tool_name: &str) -> bool {
        let name = tool_name.to_ascii_lowercase();
        let matches = |pattern: &str| {
            let pattern = pattern.to_ascii_lowercase();
            pattern == "*" || name.starts_with(pattern.as_str())
        };
        if self.deny.iter().any(|p| matches(p)) {
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        self.allow.iter().any(|p| matches(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_policy_allows_all() {
        let policy = ToolPolicy::default();
        assert!(policy.allows("anything.at.all"));
    }

    #[test]
    fn deny_takes_precedence_over_allow() {
        let policy = ToolPolicy {
            allow: vec!["fs.".into()],
            deny: vec!["fs.delete".into()],
        };
        assert!(policy.allows("fs.read"));
        assert!(!policy.allows("fs.delete"));
    }

    #[test]
    fn deny_prefix_blocks_subtree() {
        let policy = ToolPolicy {
            allow: vec![],
            deny: vec!["exec.".into()],
        };
        assert!(!policy.allows("exec.shell"));
        assert!(policy.allows("fs.read"));
    }

    #[test]
    fn deny_star_blocks_everything() {
        let policy = ToolPolicy {
            allow: vec![],
            deny: vec!["*".into()],
        };
        assert!(!policy.allows("fs.read"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let policy = ToolPolicy {
            allow: vec!["FS.".into()],
            deny: vec![],
        };
        assert!(policy.allows("fs.read"));
    }

    #[test]
    fn agent_limits_defaults() {
        let limits = AgentLimits::default();
        assert_eq!(limits.max_depth, 3);
        assert_eq!(limits.max_children_per_turn, 5);
        assert_eq!(limits.max_duration_ms, 30_000);
    }

    #[test]
    fn engine_config_default_max_steps_matches_teacher_loop_bound() {
        assert_eq!(EngineConfig::default().max_steps, DEFAULT_MAX_STEPS);
        assert_eq!(DEFAULT_MAX_STEPS, 25);
    }
}
