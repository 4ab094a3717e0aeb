use crate::http::{BoxedResponse, make_boxed_error_response, make_text_response};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, StatusCode};
use std::convert::Infallible;
use std::future::{Ready, ready};

/// Liveness and readiness probes. `is_ready` is evaluated on every `/ready` call.
pub struct AdminService<F> {
    is_ready: F,
}

impl<F> AdminService<F>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self { is_ready }
    }

    fn route(&self, path: &str) -> BoxedResponse {
        match path {
            "/health" => make_text_response(StatusCode::OK, "ok\n"),
            "/ready" => match (self.is_ready)() {
                true => make_text_response(StatusCode::OK, "ok\n"),
                false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
            },
            _ => make_boxed_error_response(StatusCode::NOT_FOUND),
        }
    }
}

impl<F> Service<Request<Incoming>> for AdminService<F>
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    type Response = BoxedResponse;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        ready(Ok(self.route(req.uri().path())))
    }
}
