//! ipapi.co geolocation.

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
    ("continent_code", "continent"),
    ("country_name", "country"),
    ("country_code", "country_code"),
    ("region", "region"),
    ("city", "city"),
    ("postal", "zip"),
    ("latitude", "lat"),
    ("longitude", "lon"),
    ("timezone", "timezone"),
    ("org", "isp"),
    ("org", "org"),
    ("asn", "asn"),
];

/// Geolocation through the ipapi.co JSON API.
///
/// Misses come back as `{"error": true, "reason": "..."}`. A `RateLimited`
/// reason is treated as transient, whatever the status code.
pub struct IpApiCoProvider {
    client: Client,
    url_template: String,
}

impl IpApiCoProvider {
    /// Provider name.
    pub const NAME: &'static str = "ipapi.co";

    /// Creates a provider for an endpoint template containing `{ip}`.
    pub fn new(url_template: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            url_template: url_template.into(),
        })
    }
}

#[async_trait]
impl LookupProvider for IpApiCoProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> LookupKind {
        LookupKind::Geo
    }

    #[instrument(skip(self), fields(provider = "ipapi.co"))]
    async fn lookup(&self, ip: IpAddr) -> Result<ProviderOutcome> {
        let url = endpoint(&self.url_template, ip);
        let response = get(&self.client, Self::NAME, &url).await?;
        let status = response.status();
        let body = json_body(Self::NAME, response).await?;

        if body.get("error").and_then(Value::as_bool).unwrap_or(false) {
            let reason = body
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("lookup failed");
            if reason.eq_ignore_ascii_case("RateLimited") {
                return Err(IpCheckError::transient(Self::NAME, "rate limited"));
            }
            debug!(%ip, reason, "ipapi.co has no data");
            return Ok(ProviderOutcome::NotFound(reason.to_string()));
        }

        if !status.is_success() {
            return Err(IpCheckError::transient(Self::NAME, format!("HTTP {}", status)));
        }

        let fields = copy_fields(&body, FIELDS);
        if fields.is_empty() {
            return Err(IpCheckError::transient(Self::NAME, "empty response body"));
        }
        Ok(ProviderOutcome::Found(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> IpApiCoProvider {
        IpApiCoProvider::new(format!("{}/{{ip}}/json/", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_success_maps_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.1.1.1/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ip": "1.1.1.1",
                "city": "Sydney",
                "country_name": "Australia",
                "country_code": "AU",
                "postal": "2000",
                "latitude": -33.86,
                "longitude": 151.2,
                "org": "CLOUDFLARENET",
                "asn": "AS13335"
            })))
            .mount(&server)
            .await;

        let outcome = provider_for(&server).lookup("1.1.1.1".parse().unwrap()).await.unwrap();
        let fields = match outcome {
            ProviderOutcome::Found(fields) => fields,
            other => panic!("expected Found, got {:?}", other),
        };
        assert_eq!(fields["country"], json!("Australia"));
        assert_eq!(fields["zip"], json!("2000"));
        assert_eq!(fields["isp"], fields["org"]);
    }

    #[tokio::test]
    async fn test_reserved_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ip": "192.168.1.1",
                "error": true,
                "reason": "Reserved IP Address",
                "reserved": true
            })))
            .mount(&server)
            .await;

        let outcome = provider_for(&server).lookup("192.168.1.1".parse().unwrap()).await.unwrap();
        assert_eq!(outcome, ProviderOutcome::NotFound("Reserved IP Address".into()));
    }

    #[tokio::test]
    async fn test_rate_limited_reason_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": true,
                "reason": "RateLimited"
            })))
            .mount(&server)
            .await;

        let err = provider_for(&server).lookup("1.1.1.1".parse().unwrap()).await.unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider_for(&server).lookup("1.1.1.1".parse().unwrap()).await.unwrap_err();
        assert!(err.is_recoverable());
    }
}
