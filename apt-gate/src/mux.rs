// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Routed response cache.

[CachedMux] binds URL templates to [Function] handlers. A route
registered with a nonzero TTL has its responses memoized, keyed on the
template plus the extracted path variables; a zero TTL always calls
the handler. Handler errors become `500` with an empty body; error
detail stays in the trace, never in the response.
*/

use {
    axum::{
        body::Body,
        extract::Path,
        http::{header, StatusCode},
        response::{IntoResponse, Response},
        routing::get,
        Router,
    },
    prost::Message,
    serde::Serialize,
    std::{collections::BTreeMap, sync::Arc, time::Duration},
    verified_cache::{
        prefix::PrefixStorage, ByteStorage, Function, Memoized, ProtoCodec,
    },
};

/// A routed request: the matched template and its path variables.
///
/// The variable map is ordered, so the serialized form (and with it
/// the cache key) is canonical.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RouteRequest {
    pub path: String,
    pub vars: BTreeMap<String, String>,
}

/// A cacheable HTTP response.
#[derive(Clone, PartialEq, Message)]
pub struct CachedResponse {
    /// HTTP status; zero means 200.
    #[prost(uint32, tag = "1")]
    pub status: u32,

    #[prost(string, tag = "2")]
    pub content_type: String,

    #[prost(bytes = "vec", tag = "3")]
    pub body: Vec<u8>,

    /// Redirect target for 3xx responses.
    #[prost(string, tag = "4")]
    pub location: String,
}

impl CachedResponse {
    pub fn ok(content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status: StatusCode::OK.as_u16() as u32,
            content_type: content_type.to_string(),
            body,
            location: String::new(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND.as_u16() as u32,
            ..Default::default()
        }
    }

    pub fn redirect(location: String) -> Self {
        Self {
            status: StatusCode::MOVED_PERMANENTLY.as_u16() as u32,
            location,
            ..Default::default()
        }
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let status = if self.status == 0 {
            StatusCode::OK
        } else {
            StatusCode::from_u16(self.status as u16)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        };

        let mut builder = Response::builder().status(status);
        if !self.content_type.is_empty() {
            builder = builder.header(header::CONTENT_TYPE, &self.content_type);
        }
        if !self.location.is_empty() {
            builder = builder.header(header::LOCATION, &self.location);
        }

        builder
            .body(Body::from(self.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

/// A router whose handlers read through a shared response cache.
pub struct CachedMux {
    storage: Arc<dyn ByteStorage>,
    router: Router,
}

impl CachedMux {
    pub fn new(storage: Arc<dyn ByteStorage>) -> Self {
        Self {
            storage,
            router: Router::new(),
        }
    }

    /// Bind a handler to a URL template.
    ///
    /// A nonzero `ttl` wraps the handler in a response cache under the
    /// `mux:<template>` key space. A zero `ttl` leaves every request
    /// to the handler.
    pub fn register(
        &mut self,
        path: &str,
        ttl: Duration,
        handler: Arc<dyn Function<RouteRequest, CachedResponse>>,
    ) {
        let handler: Arc<dyn Function<RouteRequest, CachedResponse>> = if ttl.is_zero() {
            handler
        } else {
            Arc::new(Memoized::new(
                PrefixStorage::new(format!("mux:{}", path), self.storage.clone()),
                handler,
                ProtoCodec,
                ttl,
            ))
        };

        let template = path.to_string();
        let route = get(move |Path(vars): Path<BTreeMap<String, String>>| {
            let handler = handler.clone();
            let template = template.clone();

            async move {
                let request = RouteRequest {
                    path: template.clone(),
                    vars,
                };

                match handler.call(request).await {
                    Ok(response) => response.into_response(),
                    Err(error) => {
                        tracing::error!(route = %template, %error, "request handler failed");
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    }
                }
            }
        });

        self.router = std::mem::take(&mut self.router).route(path, route);
    }

    /// Finish registration, yielding the axum router.
    pub fn into_router(self) -> Router {
        self.router
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        axum::http::Request,
        std::sync::atomic::{AtomicUsize, Ordering},
        tower::ServiceExt,
        verified_cache::MemoryStorage,
    };

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Function<RouteRequest, CachedResponse> for CountingHandler {
        async fn call(&self, request: RouteRequest) -> verified_cache::Result<CachedResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let name = request.vars.get("name").cloned().unwrap_or_default();
            Ok(CachedResponse::ok("text/plain", name.into_bytes()))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl Function<RouteRequest, CachedResponse> for FailingHandler {
        async fn call(&self, _request: RouteRequest) -> verified_cache::Result<CachedResponse> {
            Err(verified_cache::CacheError::Handler("boom".into()))
        }
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn routes_and_extracts_vars() {
        let mut mux = CachedMux::new(Arc::new(MemoryStorage::new()));
        mux.register(
            "/hello/{name}",
            Duration::ZERO,
            Arc::new(CountingHandler {
                calls: AtomicUsize::new(0),
            }),
        );
        let router = mux.into_router();

        let response = router
            .oneshot(Request::get("/hello/world").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain"
        );
        assert_eq!(body_string(response).await, "world");
    }

    #[tokio::test]
    async fn nonzero_ttl_caches_responses() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });

        let mut mux = CachedMux::new(Arc::new(MemoryStorage::new()));
        mux.register("/hello/{name}", Duration::from_secs(60), handler.clone());
        let router = mux.into_router();

        for _ in 0..3 {
            let response = router
                .clone()
                .oneshot(Request::get("/hello/cached").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(body_string(response).await, "cached");
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        // A different variable binding is a different cache entry.
        router
            .clone()
            .oneshot(Request::get("/hello/other").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_ttl_always_calls() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });

        let mut mux = CachedMux::new(Arc::new(MemoryStorage::new()));
        mux.register("/hello/{name}", Duration::ZERO, handler.clone());
        let router = mux.into_router();

        for _ in 0..3 {
            router
                .clone()
                .oneshot(Request::get("/hello/fresh").body(Body::empty()).unwrap())
                .await
                .unwrap();
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn handler_errors_become_empty_500() {
        let mut mux = CachedMux::new(Arc::new(MemoryStorage::new()));
        mux.register("/hello/{name}", Duration::ZERO, Arc::new(FailingHandler));
        let router = mux.into_router();

        let response = router
            .oneshot(Request::get("/hello/world").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, "");
    }

    #[tokio::test]
    async fn redirect_response_carries_location() {
        struct Redirector;

        #[async_trait]
        impl Function<RouteRequest, CachedResponse> for Redirector {
            async fn call(&self, _r: RouteRequest) -> verified_cache::Result<CachedResponse> {
                Ok(CachedResponse::redirect("https://mirror.test/pool/x".to_string()))
            }
        }

        let mut mux = CachedMux::new(Arc::new(MemoryStorage::new()));
        mux.register("/r/{name}", Duration::ZERO, Arc::new(Redirector));
        let router = mux.into_router();

        let response = router
            .oneshot(Request::get("/r/x").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://mirror.test/pool/x"
        );
    }
}
