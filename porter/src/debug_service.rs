use crate::errors::PorterError;
use crate::manager::PorterManager;
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, StatusCode};
use serde::{Deserialize, Serialize};
use shared::http::{BoxedResponse, make_boxed_error_response, make_json_response};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;

#[derive(Deserialize)]
struct MockRequest {
    name: String,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct MockResponse<'a> {
    name: &'a str,
    result: &'static str,
}

fn bad_request(error: impl ToString) -> BoxedResponse {
    make_json_response(
        StatusCode::BAD_REQUEST,
        &ErrorBody {
            error: error.to_string(),
        },
    )
}

/// Local-only endpoint that injects a message into a porter's self-test path.
///
/// `POST /mock` with `{"name": "<porter>", "message": "<payload>"}`. An empty
/// message uses the porter analyzer's built-in mock message.
#[derive(Clone)]
pub struct DebugService {
    manager: PorterManager,
}

impl DebugService {
    pub fn new(manager: PorterManager) -> Self {
        Self { manager }
    }

    async fn handle(&self, method: &Method, path: &str, body: Bytes) -> BoxedResponse {
        if path != "/mock" || method != Method::POST {
            return make_boxed_error_response(StatusCode::NOT_FOUND);
        }

        let request: MockRequest = match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => return bad_request(format!("invalid request body: {e}")),
        };

        match self.manager.mock(&request.name, &request.message).await {
            Ok(()) => make_json_response(
                StatusCode::OK,
                &MockResponse {
                    name: &request.name,
                    result: "ok",
                },
            ),
            Err(e) => {
                if !matches!(e, PorterError::UnknownPorter(_)) {
                    tracing::warn!(porter = %request.name, error = %e, "mock message failed");
                }
                bad_request(e)
            }
        }
    }
}

impl Service<Request<Incoming>> for DebugService {
    type Response = BoxedResponse;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => return Ok(bad_request(format!("failed to read body: {e}"))),
            };
            Ok(service.handle(&parts.method, parts.uri.path(), body).await)
        })
    }
}
