//! Severity and phase heuristics for error-level events
//!
//! Classification is best-effort triage. It looks only at the normalized
//! message text and the call-site path, never at where an error was raised.

use serde::{Deserialize, Serialize};

/// Keywords that mark a connectivity loss or a fatal condition.
const MAJOR_KEYWORDS: &[&str] = &[
    "econnrefused",
    "connection refused",
    "connection reset",
    "enotfound",
    "fatal",
    "panic",
    "migration failed",
    "aborting",
    "could not connect",
    "pool closed",
];

/// Keywords that mark slow, partial, or throttled operation.
const DEGRADED_KEYWORDS: &[&str] = &[
    "timed out",
    "timeout",
    "etimedout",
    "partial",
    "rate limit",
    "too many requests",
    "inconsistent",
    "mismatch",
    "retrying",
];

/// Keywords for cosmetic or transient noise.
const MINIMAL_KEYWORDS: &[&str] = &[
    "slow query",
    "deprecated",
    "cache miss",
    "transient",
    "cosmetic",
    "skipped",
];

/// Operational triage tier, ordered `Major > Degraded > Minimal > None`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Minimal,
    Degraded,
    Major,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Minimal => "minimal",
            Severity::Degraded => "degraded",
            Severity::Major => "major",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse subsystem an event originated from, derived from its call site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Cache,
    Streaming,
    Db,
    Graphql,
    Price,
    Oracle,
    Unknown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Cache => "cache",
            Phase::Streaming => "streaming",
            Phase::Db => "db",
            Phase::Graphql => "graphql",
            Phase::Price => "price",
            Phase::Oracle => "oracle",
            Phase::Unknown => "unknown",
        }
    }
}

/// Assign a severity tier to a normalized message.
///
/// Tiers are checked from most to least severe and the first keyword hit
/// wins, so a message naming both a refused connection and a timeout is
/// `Major`.
pub fn classify(message: &str) -> Severity {
    let lowered = message.to_lowercase();

    let tiers = [
        (Severity::Major, MAJOR_KEYWORDS),
        (Severity::Degraded, DEGRADED_KEYWORDS),
        (Severity::Minimal, MINIMAL_KEYWORDS),
    ];

    tiers
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lowered.contains(kw)))
        .map(|(severity, _)| *severity)
        .unwrap_or(Severity::None)
}

/// Derive the phase from a module path or source file path.
pub fn phase_for(path: &str) -> Phase {
    for segment in path
        .split(|c| c == ':' || c == '/' || c == '\\' || c == '.')
        .filter(|s| !s.is_empty())
    {
        let segment = segment.to_lowercase();
        let phase = if segment.contains("cache") {
            Phase::Cache
        } else if segment.contains("stream") {
            Phase::Streaming
        } else if segment.contains("graphql") {
            Phase::Graphql
        } else if segment.contains("price") {
            Phase::Price
        } else if segment.contains("oracle") {
            Phase::Oracle
        } else if matches!(segment.as_str(), "db" | "store" | "migrate" | "sqlx") {
            Phase::Db
        } else {
            continue;
        };
        return phase;
    }

    Phase::Unknown
}
