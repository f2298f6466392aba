use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::api::transport::{ApiRequest, ApiResponse, HttpTransport, Method, TransportError};

#[derive(Debug, Clone)]
struct Route {
    method: Method,
    path: String,
    reply: Result<ApiResponse, TransportError>,
}

/// Transport answering from canned routes and recording every request.
///
/// Routes match on method and unencoded path; the newest matching route
/// wins. Unmatched requests get a 404.
#[derive(Debug, Default, Clone)]
pub struct StubTransport {
    routes: Arc<Mutex<Vec<Route>>>,
    requests: Arc<Mutex<Vec<ApiRequest>>>,
}

impl StubTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: Method, path: &str, status: u16, body: Value) {
        self.push(method, path, Ok(ApiResponse::new(status, body)));
    }

    pub fn ok(&self, method: Method, path: &str, body: Value) {
        self.respond(method, path, 200, body);
    }

    /// Makes the route fail without a response.
    pub fn fail(&self, method: Method, path: &str, err: TransportError) {
        self.push(method, path, Err(err));
    }

    fn push(&self, method: Method, path: &str, reply: Result<ApiResponse, TransportError>) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Route {
                method,
                path: path.to_owned(),
                reply,
            });
    }

    #[must_use]
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Requests sent to `path`, oldest first.
    #[must_use]
    pub fn requests_to(&self, method: Method, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path() == path)
            .collect()
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let path = request.path();
        let method = request.method;
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes
            .iter()
            .rev()
            .find(|r| r.method == method && r.path == path)
            .map_or_else(
                || {
                    Ok(ApiResponse::new(
                        404,
                        serde_json::json!({ "detail": format!("no route for {method} {path}") }),
                    ))
                },
                |r| r.reply.clone(),
            )
    }
}
