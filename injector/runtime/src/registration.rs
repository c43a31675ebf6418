use anyhow::{bail, Context, Result};
use qtap_injector_core::Registration;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches the operator's registration from the Qpoint API.
#[derive(Clone, Debug)]
pub struct RegistrationClient {
    endpoint: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    registration: RegistrationBody,
}

#[derive(Debug, Deserialize)]
struct RegistrationBody {
    ca: String,
}

// === impl RegistrationClient ===

impl RegistrationClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            endpoint: endpoint.into(),
            http,
        })
    }

    fn url(&self) -> String {
        format!("{}/qtap/registration", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl Registration for RegistrationClient {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn root_ca(&self, token: &str) -> Result<String> {
        let rsp = self
            .http
            .get(self.url())
            .bearer_auth(token)
            .send()
            .await
            .context("fetching registration")?;

        let status = rsp.status();
        if status != reqwest::StatusCode::OK {
            bail!("request failed, status {}", status.as_u16());
        }

        let RegistrationResponse { registration } =
            rsp.json().await.context("decoding registration")?;
        debug!("Fetched registration");
        Ok(registration.ca)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[tokio::test]
    async fn fetches_root_ca() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/qtap/registration"))
            .and(header("authorization", "Bearer s3cr3t"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "registration": { "ca": "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RegistrationClient::new(format!("{}/", server.uri())).unwrap();
        let ca = client.root_ca("s3cr3t").await.unwrap();
        assert_eq!(
            ca,
            "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----"
        );
    }

    #[tokio::test]
    async fn rejects_unsuccessful_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/qtap/registration"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = RegistrationClient::new(server.uri()).unwrap();
        let error = client.root_ca("expired").await.expect_err("must fail");
        assert_eq!(error.to_string(), "request failed, status 401");
    }

    #[tokio::test]
    async fn rejects_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/qtap/registration"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ca": "flat" })),
            )
            .mount(&server)
            .await;

        let client = RegistrationClient::new(server.uri()).unwrap();
        let error = client.root_ca("s3cr3t").await.expect_err("must fail");
        let message = format!("{error:#}");
        assert!(message.starts_with("decoding registration: "), "{message}");
        assert!(message.contains("missing field `registration`"), "{message}");
    }

    #[tokio::test]
    async fn reports_transport_failures() {
        // Nothing listens on the discard port.
        let client = RegistrationClient::new("http://127.0.0.1:9").unwrap();
        let error = client.root_ca("s3cr3t").await.expect_err("must fail");
        let message = format!("{error:#}");
        assert!(message.starts_with("fetching registration: "), "{message}");
        assert!(message.len() > "fetching registration: ".len(), "{message}");
    }
}
