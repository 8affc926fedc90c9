//! Endpoint addresses and fixed request headers for the Freeplay web API

/// Base URL for all upstream calls.
pub const BASE_URL: &str = "https://app.freeplay.ai";

/// Billing endpoint, relative to the base URL.
pub const BILLING_PATH: &str = "/app_data/settings/billing";

/// Name of the billing feature entry that carries the credit balance.
pub const CREDIT_FEATURE: &str = "Freeplay credits";

/// The upstream only accepts browser-looking traffic; this matches the
/// Chrome build the session cookies were minted under.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36";

/// Completion endpoint for a given project, relative to a base URL.
pub fn completions_path(project_id: &str) -> String {
    format!("/app_data/projects/{project_id}/llm-completions")
}
