use serde::{Deserialize, Serialize};

/// One of the five logical state scopes a session folds from `state_change`
/// events. Each scope is an independent string-keyed map of JSON values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Session,
    User,
    Patient,
    Practice,
    Temp,
}

impl Scope {
    pub const ALL: [Scope; 5] = [
        Scope::Session,
        Scope::User,
        Scope::Patient,
        Scope::Practice,
        Scope::Temp,
    ];

    /// `temp` is inherited by child invocations on handoff (copy-on-handoff);
    /// the others are not automatically propagated.
    pub fn inherited_on_handoff(&self) -> bool {
        matches!(self, Scope::Temp)
    }
}

/// Why a `state_change` event was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateChangeSource {
    /// A tool or model observed and recorded state without an explicit write.
    Observation,
    /// An explicit `state(scope).set/update/delete` call from engine code.
    Mutation,
    /// A direct external poke (e.g. a host injecting state between runs).
    Direct,
}
