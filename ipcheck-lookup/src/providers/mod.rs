//! Lookup providers.
//!
//! Each provider maps one upstream source onto [`ProviderOutcome`]:
//! definitive "no data" answers become `NotFound`, while rate limits, 5xx,
//! network failures and unreadable bodies become transient errors. All but
//! [`ReverseDnsProvider`] speak HTTP JSON.
//!
//! [`ProviderOutcome`]: ipcheck_core::traits::ProviderOutcome

mod ip_api;
mod ipapi_co;
mod rdap;
mod reverse_dns;

pub use ip_api::IpApiProvider;
pub use ipapi_co::IpApiCoProvider;
pub use rdap::RdapProvider;
pub use reverse_dns::ReverseDnsProvider;

use std::net::IpAddr;

use reqwest::header::ACCEPT;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

use ipcheck_core::constants::USER_AGENT;
use ipcheck_core::error::{IpCheckError, Result};
use ipcheck_core::types::LookupFields;

/// Builds the HTTP client shared by a provider's calls.
///
/// Deadlines are enforced per attempt by the retry policy, not here.
pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| IpCheckError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Substitutes `ip` into an endpoint template.
pub(crate) fn endpoint(template: &str, ip: IpAddr) -> String {
    template.replace("{ip}", &ip.to_string())
}

/// Sends a GET and maps transport failures, 429 and 5xx to transient errors.
///
/// Other statuses are returned to the caller to interpret.
pub(crate) async fn get(client: &Client, provider: &str, url: &str) -> Result<Response> {
    let response = client
        .get(url)
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| IpCheckError::transient(provider, e))?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(IpCheckError::transient(provider, "rate limited"));
    }
    if status.is_server_error() {
        return Err(IpCheckError::transient(provider, format!("HTTP {}", status)));
    }
    Ok(response)
}

/// Reads a JSON body; an unreadable body is transient.
pub(crate) async fn json_body(provider: &str, response: Response) -> Result<Value> {
    response
        .json::<Value>()
        .await
        .map_err(|e| IpCheckError::transient(provider, format!("invalid JSON: {}", e)))
}

/// Copies non-null `(source, target)` fields from a JSON object.
pub(crate) fn copy_fields(body: &Value, mapping: &[(&str, &str)]) -> LookupFields {
    let mut fields = LookupFields::new();
    for (source, target) in mapping {
        match body.get(*source) {
            None | Some(Value::Null) => {}
            Some(value) => {
                fields.insert((*target).to_string(), value.clone());
            }
        }
    }
    fields
}
