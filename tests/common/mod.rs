//! WireMock-based softener mocking infrastructure
//!
//! Serves canned `mux_http` payloads so the real HTTP client and poller can
//! be exercised without a device on the network.

#![allow(dead_code)]

use gruenbeck_telemetry::{PollerConfig, SoftenerHttpClient};
use std::time::Duration;
use wiremock::{
    matchers::{body_string, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Query body sent for the operational register set
pub const OPERATIONAL_QUERY: &str =
    "id=626&show=D_Y_1|D_Y_5|D_Y_10_1|D_A_1_1|D_A_1_2|D_A_1_3|D_A_2_1|D_A_3_1|D_A_3_2~";

/// Query body sent by the identity probe
pub const PROBE_QUERY: &str = "id=626&show=D_C_1_1|D_Y_6|D_Y_7~";

/// Operational payload as the softener answers it mid-regeneration
pub const OPERATIONAL_PAYLOAD: &str = "<data><code>ok</code>\
<D_Y_1>1</D_Y_1><D_Y_5>3</D_Y_5><D_Y_10_1>2</D_Y_10_1>\
<D_A_1_1>0</D_A_1_1><D_A_1_2>1.86</D_A_1_2><D_A_1_3>52</D_A_1_3>\
<D_A_2_1>14</D_A_2_1><D_A_3_1>9</D_A_3_1><D_A_3_2>78</D_A_3_2></data>";

/// Same registers after regeneration finished
pub const OPERATIONAL_PAYLOAD_IDLE: &str = "<data><code>ok</code>\
<D_Y_1>1</D_Y_1><D_Y_5>0</D_Y_5><D_Y_10_1>2</D_Y_10_1>\
<D_A_1_1>12</D_A_1_1><D_A_1_2>1.75</D_A_1_2><D_A_1_3>52</D_A_1_3>\
<D_A_2_1>0</D_A_2_1><D_A_3_1>0</D_A_3_1><D_A_3_2>0</D_A_3_2></data>";

/// Probe payload
pub const PROBE_PAYLOAD: &str =
    "<data><code>ok</code><D_C_1_1>0</D_C_1_1><D_Y_6>V01.01.02</D_Y_6><D_Y_7>-</D_Y_7></data>";

/// Mock softener
pub struct MockSoftener {
    pub server: MockServer,
}

impl MockSoftener {
    /// Start a mock with no endpoints mounted
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL usable as the poller host
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Poller configuration pointing at this mock
    pub fn config(&self) -> PollerConfig {
        PollerConfig::new(self.url()).with_timeout(Duration::from_secs(5))
    }

    /// HTTP client pointing at this mock
    pub fn client(&self) -> SoftenerHttpClient {
        SoftenerHttpClient::new(&self.config()).expect("client for mock softener")
    }

    /// Answer `query` with `body`
    pub async fn mock_query(&self, query: &str, body: &str) {
        self.mock_response(query, ResponseTemplate::new(200).set_body_string(body))
            .await;
    }

    /// Answer `query` with `body` at most `times` times
    pub async fn mock_query_times(&self, query: &str, body: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/mux_http"))
            .and(body_string(query))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Answer `query` with a custom response, matching the device's request shape
    pub async fn mock_response(&self, query: &str, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/mux_http"))
            .and(header("content-type", "application/xml"))
            .and(body_string(query))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Number of requests the mock has received
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or_default()
    }
}
