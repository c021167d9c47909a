use crate::http::make_boxed_error_response;
use http::header::{CONTENT_TYPE, HeaderValue};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// A fixed document served from the admin listener.
#[derive(Clone)]
struct StaticPage {
    content_type: HeaderValue,
    body: Bytes,
}

/// Serves `/health`, `/ready` and any static status pages registered at startup.
pub struct AdminService<F, E> {
    is_ready: F,
    pages: Arc<HashMap<String, StaticPage>>,
    _error: PhantomData<E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self {
            is_ready,
            pages: Arc::new(HashMap::new()),
            _error: PhantomData,
        }
    }

    /// Registers a page served verbatim at `path`.
    pub fn with_page(mut self, path: &str, content_type: &'static str, body: Bytes) -> Self {
        Arc::make_mut(&mut self.pages).insert(
            path.to_string(),
            StaticPage {
                content_type: HeaderValue::from_static(content_type),
                body,
            },
        );
        self
    }

    fn respond(&self, path: &str) -> Response<BoxBody<Bytes, Infallible>> {
        let ok_body = || Full::new(Bytes::from("ok\n")).boxed();

        match path {
            "/health" => Response::new(ok_body()),
            "/ready" => match (self.is_ready)() {
                true => Response::new(ok_body()),
                false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
            },
            other => match self.pages.get(other) {
                Some(page) => {
                    let mut response = Response::new(Full::new(page.body.clone()).boxed());
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, page.content_type.clone());
                    response
                }
                None => make_boxed_error_response(StatusCode::NOT_FOUND),
            },
        }
    }
}

impl<F, E> Service<Request<Incoming>> for AdminService<F, E>
where
    F: Fn() -> bool + Send + 'static,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let res = self.respond(req.uri().path());
        Box::pin(async move { Ok(res) })
    }
}
