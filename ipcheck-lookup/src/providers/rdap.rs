//! RDAP network registration data (WHOIS replacement).

use std::net::IpAddr;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use ipcheck_core::error::{IpCheckError, Result};
use ipcheck_core::traits::{LookupProvider, ProviderOutcome};
use ipcheck_core::types::{LookupFields, LookupKind};

use super::{copy_fields, endpoint, get, http_client, json_body};

const FIELDS: &[(&str, &str)] = &[
    ("handle", "handle"),
    ("name", "name"),
    ("type", "type"),
    ("country", "country"),
    ("startAddress", "start_address"),
    ("endAddress", "end_address"),
    ("parentHandle", "parent_handle"),
    ("status", "status"),
    ("port43", "whois_server"),
];

/// Network registration lookups over RDAP.
///
/// The default endpoint is the rdap.org bootstrap service, which redirects
/// to the responsible regional registry.
pub struct RdapProvider {
    client: Client,
    url_template: String,
}

impl RdapProvider {
    /// Provider name.
    pub const NAME: &'static str = "rdap";

    /// Creates a provider for an endpoint template containing `{ip}`.
    pub fn new(url_template: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            url_template: url_template.into(),
        })
    }
}

#[async_trait]
impl LookupProvider for RdapProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> LookupKind {
        LookupKind::Whois
    }

    #[instrument(skip(self), fields(provider = "rdap"))]
    async fn lookup(&self, ip: IpAddr) -> Result<ProviderOutcome> {
        let url = endpoint(&self.url_template, ip);
        let response = get(&self.client, Self::NAME, &url).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(%ip, "no RDAP registration");
            return Ok(ProviderOutcome::NotFound("no registration data".into()));
        }
        if !status.is_success() {
            return Err(IpCheckError::transient(Self::NAME, format!("HTTP {}", status)));
        }

        let body = json_body(Self::NAME, response).await?;
        if body.get("objectClassName").and_then(Value::as_str) != Some("ip network") {
            return Err(IpCheckError::transient(Self::NAME, "unexpected response body"));
        }

        Ok(ProviderOutcome::Found(network_fields(&body)))
    }
}

fn network_fields(body: &Value) -> LookupFields {
    let mut fields = copy_fields(body, FIELDS);

    let cidrs: Vec<String> = body
        .get("cidr0_cidrs")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(cidr).collect())
        .unwrap_or_default();
    if !cidrs.is_empty() {
        fields.insert("cidr".into(), json!(cidrs));
    }

    for (action, target) in [("registration", "registered"), ("last changed", "last_changed")] {
        if let Some(date) = event_date(body, action) {
            fields.insert(target.into(), json!(date));
        }
    }

    if let Some(name) = entity_name(body, "registrant") {
        fields.insert("registrant".into(), json!(name));
    }
    if let Some(email) = abuse_email(body) {
        fields.insert("abuse_email".into(), json!(email));
    }

    fields
}

fn cidr(entry: &Value) -> Option<String> {
    let prefix = entry
        .get("v4prefix")
        .or_else(|| entry.get("v6prefix"))
        .and_then(Value::as_str)?;
    let length = entry.get("length").and_then(Value::as_u64)?;
    Some(format!("{}/{}", prefix, length))
}

fn event_date<'a>(body: &'a Value, action: &str) -> Option<&'a str> {
    body.get("events")?
        .as_array()?
        .iter()
        .find(|e| e.get("eventAction").and_then(Value::as_str) == Some(action))?
        .get("eventDate")?
        .as_str()
}

fn entities_with_role<'a>(body: &'a Value, role: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
    body.get("entities")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(move |e| {
            e.get("roles")
                .and_then(Value::as_array)
                .map(|roles| roles.iter().any(|r| r.as_str() == Some(role)))
                .unwrap_or(false)
        })
}

/// Looks up a jCard property (`["fn", {}, "text", "Google LLC"]`).
fn vcard_property<'a>(entity: &'a Value, property: &str) -> Option<&'a str> {
    entity
        .get("vcardArray")?
        .get(1)?
        .as_array()?
        .iter()
        .find(|p| p.get(0).and_then(Value::as_str) == Some(property))?
        .get(3)?
        .as_str()
}

fn entity_name<'a>(body: &'a Value, role: &'a str) -> Option<&'a str> {
    entities_with_role(body, role).find_map(|e| vcard_property(e, "fn"))
}

/// Abuse contacts are usually nested one level under the registrant.
fn abuse_email(body: &Value) -> Option<&str> {
    if let Some(email) = entities_with_role(body, "abuse").find_map(|e| vcard_property(e, "email")) {
        return Some(email);
    }
    body.get("entities")?
        .as_array()?
        .iter()
        .find_map(|e| entities_with_role(e, "abuse").find_map(|a| vcard_property(a, "email")))
}
