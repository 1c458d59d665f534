// =============================================================================
// WAREHOUSE API MODULE
// =============================================================================
// Client for the warehouse backend. The backend owns all durable state
// (catalog, racks, stock); this service only plans and commits through it.
//
// The flow runner talks to the `WarehouseApi` trait so tests can swap the
// HTTP client for an in-memory fake.
// =============================================================================

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiErrorCode};
use crate::metrics;
use crate::models::{
    BackendErrorBody, IdentificationResult, InboundExecuteRequest, InboundPlanRequest,
    MismatchReport, OutboundCheckRequest, OutboundCheckResult, OutboundExecuteRequest,
    OutboundExecuteResult, OutboundPlan, OutboundPlanRequest, PlacementPlan, ScanItem,
};

/// Backend operations used by the flow and the identify passthrough
#[async_trait]
pub trait WarehouseApi: Send + Sync {
    async fn get_item_by_code(&self, code: &str) -> Result<ScanItem, ApiError>;

    async fn plan_inbound(&self, request: &InboundPlanRequest) -> Result<PlacementPlan, ApiError>;

    async fn execute_inbound(&self, request: &InboundExecuteRequest) -> Result<(), ApiError>;

    async fn plan_outbound(&self, request: &OutboundPlanRequest) -> Result<OutboundPlan, ApiError>;

    async fn check_outbound(&self, code: &str) -> Result<OutboundCheckResult, ApiError>;

    async fn execute_outbound(
        &self,
        request: &OutboundExecuteRequest,
    ) -> Result<OutboundExecuteResult, ApiError>;

    async fn identify(
        &self,
        image: Vec<u8>,
        content_type: &str,
    ) -> Result<IdentificationResult, ApiError>;

    async fn report_mismatch(&self, report: &MismatchReport) -> Result<(), ApiError>;

    /// Reachability probe for /ready
    async fn health(&self) -> bool;
}

// =============================================================================
// HTTP CLIENT
// =============================================================================
#[derive(Clone)]
pub struct HttpWarehouseApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpWarehouseApi {
    /// Builds the client.
    ///
    /// # Arguments
    /// * `base_url` - Backend root, without trailing slash
    /// * `token` - Bearer token forwarded on every call
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Sends a request, times it, and turns non-2xx answers into `ApiError::Rejected`
    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Response, ApiError> {
        let start = Instant::now();
        let result = self.authorized(request).send().await;
        let elapsed = start.elapsed().as_secs_f64();

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!(endpoint, error = %err, "Warehouse API unreachable");
                metrics::record_api_call(endpoint, "error", elapsed);
                return Err(ApiError::Transport(err));
            }
        };

        if response.status().is_success() {
            debug!(endpoint, status = response.status().as_u16(), "Warehouse API call");
            metrics::record_api_call(endpoint, "ok", elapsed);
            return Ok(response);
        }

        metrics::record_api_call(endpoint, "rejected", elapsed);
        Err(rejection(response).await)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.send(endpoint, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| ApiError::Decode(format!("{endpoint}: {err}")))
    }

    fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RequestBuilder {
        self.client.post(self.url(path)).json(body)
    }
}

/// Reads the backend's `{code, message}` error body, if there is one
async fn rejection(response: Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<BackendErrorBody>(&body).ok();

    let code = parsed
        .as_ref()
        .and_then(|b| b.code.as_deref())
        .map(ApiErrorCode::from_code);
    let message = parsed
        .and_then(|b| b.message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());

    warn!(status = status.as_u16(), code = ?code, %message, "Warehouse API rejected request");
    ApiError::Rejected {
        status: status.as_u16(),
        code,
        message,
    }
}

/// A 404 without an error body on a by-code route means the code is unknown
fn bare_not_found_as<T>(result: Result<T, ApiError>, code: ApiErrorCode) -> Result<T, ApiError> {
    match result {
        Err(ApiError::Rejected {
            status: 404,
            code: None,
            message,
        }) => Err(ApiError::Rejected {
            status: 404,
            code: Some(code),
            message,
        }),
        other => other,
    }
}

#[async_trait]
impl WarehouseApi for HttpWarehouseApi {
    async fn get_item_by_code(&self, code: &str) -> Result<ScanItem, ApiError> {
        let mut url = reqwest::Url::parse(&self.url("/api/items/code/"))
            .map_err(|err| ApiError::Decode(format!("lookup url: {err}")))?;
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(code);
        }

        let result = self.send_json("lookup", self.client.get(url)).await;
        bare_not_found_as(result, ApiErrorCode::ItemNotFound)
    }

    async fn plan_inbound(&self, request: &InboundPlanRequest) -> Result<PlacementPlan, ApiError> {
        self.send_json(
            "plan-inbound",
            self.post("/api/inventory/inbound-operation/plan", request),
        )
        .await
    }

    async fn execute_inbound(&self, request: &InboundExecuteRequest) -> Result<(), ApiError> {
        self.send(
            "execute-inbound",
            self.post("/api/inventory/inbound-operation/execute", request),
        )
        .await?;
        Ok(())
    }

    async fn plan_outbound(&self, request: &OutboundPlanRequest) -> Result<OutboundPlan, ApiError> {
        self.send_json(
            "plan-outbound",
            self.post("/api/inventory/outbound-operation/plan", request),
        )
        .await
    }

    async fn check_outbound(&self, code: &str) -> Result<OutboundCheckResult, ApiError> {
        let body = OutboundCheckRequest {
            code: code.to_string(),
        };
        let result = self
            .send_json(
                "check-outbound",
                self.post("/api/inventory/outbound-operation/check", &body),
            )
            .await;
        bare_not_found_as(result, ApiErrorCode::AssortmentNotFound)
    }

    async fn execute_outbound(
        &self,
        request: &OutboundExecuteRequest,
    ) -> Result<OutboundExecuteResult, ApiError> {
        self.send_json(
            "execute-outbound",
            self.post("/api/inventory/outbound-operation/execute", request),
        )
        .await
    }

    async fn identify(
        &self,
        image: Vec<u8>,
        content_type: &str,
    ) -> Result<IdentificationResult, ApiError> {
        let part = multipart::Part::bytes(image)
            .file_name("capture")
            .mime_str(content_type)?;
        let form = multipart::Form::new().part("file", part);

        let request = self
            .client
            .post(self.url("/api/items/identify"))
            .multipart(form);
        self.send_json("identify", request).await
    }

    async fn report_mismatch(&self, report: &MismatchReport) -> Result<(), ApiError> {
        self.send(
            "identify-mismatch",
            self.post("/api/items/identify/mismatch", report),
        )
        .await?;
        Ok(())
    }

    async fn health(&self) -> bool {
        let request = self.authorized(self.client.get(self.url("/actuator/health")));
        match request.timeout(Duration::from_secs(2)).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(err) => {
                debug!(error = %err, "Warehouse API health probe failed");
                false
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn item_json() -> serde_json::Value {
        json!({
            "id": 42,
            "code": "ITEM-42",
            "name": "Yoghurt 500g",
            "minTemp": 2.0,
            "maxTemp": 6.0,
            "weight": 0.5,
            "width": 80.0,
            "height": 120.0,
            "depth": 80.0,
            "expirationDays": 21,
            "isDangerous": false
        })
    }

    #[tokio::test]
    async fn lookup_sends_code_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/items/code/ITEM-42"))
            .and(header("authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(item_json()))
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpWarehouseApi::new(server.uri(), Some("t0ken".into())).unwrap();
        let item = api.get_item_by_code("ITEM-42").await.unwrap();

        assert_eq!(item.id, 42);
        assert_eq!(item.name, "Yoghurt 500g");
        assert!(item.photo_url.is_none());
    }

    #[tokio::test]
    async fn bare_404_on_lookup_is_item_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/items/code/NOPE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let api = HttpWarehouseApi::new(server.uri(), None).unwrap();
        match api.get_item_by_code("NOPE").await {
            Err(ApiError::Rejected { status, code, .. }) => {
                assert_eq!(status, 404);
                assert_eq!(code, Some(ApiErrorCode::ItemNotFound));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn bare_404_on_check_is_assortment_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/inventory/outbound-operation/check"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let api = HttpWarehouseApi::new(server.uri(), None).unwrap();
        match api.check_outbound("NOPE").await {
            Err(ApiError::Rejected { status, code, .. }) => {
                assert_eq!(status, 404);
                assert_eq!(code, Some(ApiErrorCode::AssortmentNotFound));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn backend_error_body_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/inventory/inbound-operation/execute"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "PLACEMENT_CONFLICT",
                "message": "Position 1/2 on R5 is occupied"
            })))
            .mount(&server)
            .await;

        let api = HttpWarehouseApi::new(server.uri(), None).unwrap();
        let request = InboundExecuteRequest {
            code: "ITEM-42".into(),
            placements: vec![],
        };
        match api.execute_inbound(&request).await {
            Err(ApiError::Rejected {
                status,
                code,
                message,
            }) => {
                assert_eq!(status, 409);
                assert_eq!(code, Some(ApiErrorCode::PlacementConflict));
                assert_eq!(message, "Position 1/2 on R5 is occupied");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_backend_code_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/inventory/outbound-operation/check"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"code": "RACK_LOCKED"})),
            )
            .mount(&server)
            .await;

        let api = HttpWarehouseApi::new(server.uri(), None).unwrap();
        match api.check_outbound("K").await {
            Err(ApiError::Rejected { code, message, .. }) => {
                assert_eq!(code, Some(ApiErrorCode::Other("RACK_LOCKED".into())));
                assert_eq!(message, "Unprocessable Entity");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn outbound_execute_posts_codes_and_skip_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/inventory/outbound-operation/execute"))
            .and(body_json(json!({
                "assortments": [{"code": "A"}, {"code": "B"}],
                "skipFifo": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuedCount": 2,
                "operations": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpWarehouseApi::new(format!("{}/", server.uri()), None).unwrap();
        let codes = vec!["A".to_string(), "B".to_string()];
        let result = api
            .execute_outbound(&OutboundExecuteRequest::new(&codes, true))
            .await
            .unwrap();

        assert_eq!(result.issued_count, 2);
    }

    #[tokio::test]
    async fn malformed_success_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/inventory/outbound-operation/plan"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let api = HttpWarehouseApi::new(server.uri(), None).unwrap();
        let request = OutboundPlanRequest {
            item_id: 1,
            quantity: 1,
        };
        assert!(matches!(
            api.plan_outbound(&request).await,
            Err(ApiError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn identify_uploads_multipart_file() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/items/identify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "identificationId": "abc",
                "candidates": [{
                    "itemId": 42,
                    "code": "ITEM-42",
                    "name": "Yoghurt 500g",
                    "similarity": 0.93
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpWarehouseApi::new(server.uri(), None).unwrap();
        let result = api.identify(vec![0xff, 0xd8, 0xff], "image/jpeg").await.unwrap();

        assert_eq!(result.identification_id, "abc");
        assert_eq!(result.candidates[0].item_id, 42);

        let received = server.received_requests().await.unwrap();
        let content_type = received[0]
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("multipart/form-data"));
    }

    #[tokio::test]
    async fn health_reflects_reachability() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/actuator/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let api = HttpWarehouseApi::new(server.uri(), None).unwrap();
        assert!(api.health().await);

        let unreachable = HttpWarehouseApi::new("http://127.0.0.1:1", None).unwrap();
        assert!(!unreachable.health().await);
    }
}
