//! ip-api.com geolocation.

use std::net::IpAddr;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};

use ipcheck_core::error::{IpCheckError, Result};
use ipcheck_core::traits::{LookupProvider, ProviderOutcome};
use ipcheck_core::types::LookupKind;

use super::{copy_fields, endpoint, get, http_client, json_body};

const FIELDS: &[(&str, &str)] = &[
    ("continent", "continent"),
    ("country", "country"),
    ("countryCode", "country_code"),
    ("regionName", "region"),
    ("city", "city"),
    ("zip", "zip"),
    ("lat", "lat"),
    ("lon", "lon"),
    ("timezone", "timezone"),
    ("isp", "isp"),
    ("org", "org"),
    ("as", "asn"),
];

/// Geolocation through the ip-api.com JSON API.
///
/// The API answers 200 for everything it understands and signals misses
/// (private or reserved ranges) with `"status": "fail"`.
pub struct IpApiProvider {
    client: Client,
    url_template: String,
}

impl IpApiProvider {
    /// Provider name.
    pub const NAME: &'static str = "ip-api.com";

    /// Creates a provider for an endpoint template containing `{ip}`.
    pub fn new(url_template: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            url_template: url_template.into(),
        })
    }
}

#[async_trait]
impl LookupProvider for IpApiProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> LookupKind {
        LookupKind::Geo
    }

    #[instrument(skip(self), fields(provider = "ip-api.com"))]
    async fn lookup(&self, ip: IpAddr) -> Result<ProviderOutcome> {
        let url = endpoint(&self.url_template, ip);
        let response = get(&self.client, Self::NAME, &url).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IpCheckError::transient(Self::NAME, format!("HTTP {}", status)));
        }

        let body = json_body(Self::NAME, response).await?;
        match body.get("status").and_then(Value::as_str) {
            Some("success") => Ok(ProviderOutcome::Found(copy_fields(&body, FIELDS))),
            Some("fail") => {
                let message = body
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("lookup failed");
                debug!(%ip, message, "ip-api.com has no data");
                Ok(ProviderOutcome::NotFound(message.to_string()))
            }
            _ => Err(IpCheckError::transient(Self::NAME, "unexpected response body")),
        }
    }
}
