//! Supported model table
//!
//! Client-facing model names map to the upstream project-model UUIDs and
//! their per-model output bounds. Resolution happens before any account is
//! touched so an unknown model never consumes an attempt.

/// One supported model.
#[derive(Debug, Clone, Copy)]
pub struct ModelEntry {
    pub name: &'static str,
    pub upstream_id: &'static str,
    pub max_tokens: u32,
}

pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-20250219";

pub const MODELS: &[ModelEntry] = &[
    ModelEntry {
        name: "claude-3-7-sonnet-20250219",
        upstream_id: "be71f37b-1487-49fa-a989-a9bb99c0b129",
        max_tokens: 64000,
    },
    ModelEntry {
        name: "claude-4-opus-20250514",
        upstream_id: "bebc7dd5-a24d-4147-85b0-8f62902ea1a3",
        max_tokens: 32000,
    },
    ModelEntry {
        name: "claude-4-sonnet",
        upstream_id: "884dde7c-8def-4365-b19a-57af2787ab84",
        max_tokens: 64000,
    },
];

/// Look up a model by its client-facing name.
pub fn resolve(name: &str) -> Option<&'static ModelEntry> {
    MODELS.iter().find(|m| m.name == name)
}

/// Comma-separated list of supported names, for error messages.
pub fn supported_names() -> String {
    MODELS
        .iter()
        .map(|m| m.name)
        .collect::<Vec<_>>()
        .join(", ")
}
