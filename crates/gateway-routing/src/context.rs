//! Transport context a routing decision is made against.

use gateway_core::types::TenantId;
use std::collections::HashMap;

/// Routing-relevant view of one inbound request.
///
/// Header names are stored lowercased so strategy lookups are
/// case-insensitive regardless of what the client sent.
#[derive(Debug, Clone)]
pub struct RouteContext {
    /// Tenant whose providers are eligible
    pub tenant: TenantId,
    /// Inbound request path
    pub path: String,
    headers: HashMap<String, String>,
    subdomain: Option<String>,
}

impl RouteContext {
    /// Creates a context for a tenant and inbound path.
    pub fn new(tenant: TenantId, path: impl Into<String>) -> Self {
        Self {
            tenant,
            path: path.into(),
            headers: HashMap::new(),
            subdomain: None,
        }
    }

    /// Records a request header for `ByHeader` strategies.
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Derives the routing subdomain from the request's host, for
    /// `BySubdomain` strategies.
    #[must_use]
    pub fn with_host(mut self, host: &str) -> Self {
        self.subdomain = leading_subdomain(host);
        self
    }

    /// Looks up a recorded header, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The parsed routing subdomain, if the host carried one.
    #[must_use]
    pub fn subdomain(&self) -> Option<&str> {
        self.subdomain.as_deref()
    }
}

/// First host label, present only when the host actually has a
/// subdomain in front of a registrable domain (three labels or more).
fn leading_subdomain(host: &str) -> Option<String> {
    let without_port = host.split(':').next().unwrap_or(host);
    let labels: Vec<&str> = without_port.split('.').collect();
    if labels.len() >= 3 && !labels[0].is_empty() {
        Some(labels[0].to_ascii_lowercase())
    } else {
        None
    }
}
