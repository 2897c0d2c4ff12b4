// Default servlet
// Serves static files from the context's document roots

use super::relative_path;
use crate::error::ServletError;
use crate::http::{DispatcherType, Request, Response};
use crate::servlet::{Servlet, ServletConfig};
use async_trait::async_trait;
use hyper::header::{HeaderValue, ALLOW, CONTENT_LENGTH};
use hyper::{Method, StatusCode};
use std::io::ErrorKind;
use tracing::{debug, trace};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Static resource servlet, registered by the container under the name `default`
#[derive(Debug, Default)]
pub struct DefaultServlet;

#[async_trait]
impl Servlet for DefaultServlet {
    async fn init(&self, config: &ServletConfig) -> Result<(), ServletError> {
        debug!(servlet = %config.servlet_name(), "Default servlet initialized");
        Ok(())
    }

    async fn service(&self, req: &mut Request, resp: &mut Response) -> Result<(), ServletError> {
        // Error pages are served for whatever method triggered them
        let error_dispatch = req.dispatcher_type() == DispatcherType::Error;
        let head = req.method() == Method::HEAD;
        if !error_dispatch && !head && req.method() != Method::GET {
            resp.set_header(ALLOW, HeaderValue::from_static("GET, HEAD"));
            return resp.send_error(StatusCode::METHOD_NOT_ALLOWED, Some(req.method().as_str()));
        }

        let path = relative_path(req);
        let Some(context) = req.context().cloned() else {
            return resp.send_error(StatusCode::NOT_FOUND, Some(&path));
        };
        let Some(resources) = context.resources() else {
            return resp.send_error(StatusCode::NOT_FOUND, Some(&path));
        };

        let bytes = match resources.read_async(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(path = %path, "Static resource not found");
                // An include of a missing resource is the includer's failure
                if req.dispatcher_type() == DispatcherType::Include {
                    return Err(ServletError::Io(e));
                }
                return resp.send_error(StatusCode::NOT_FOUND, Some(&path));
            }
            Err(e) => return Err(ServletError::Io(e)),
        };

        let content_type = context
            .mime_type_for(&path)
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
        resp.set_content_type(&content_type);
        resp.set_header(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        if !head {
            resp.write(&bytes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::resources::Resources;
    use std::sync::Arc;

    fn context_with(dir: &tempfile::TempDir) -> Arc<Context> {
        let context = Context::new("/app");
        context.add_mime_mapping("css", "text/css");
        context.set_resources(Arc::new(Resources::new(Some(dir.path().to_path_buf()), Vec::new())));
        context
    }

    #[tokio::test]
    async fn test_serves_file_with_mime_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("site.css"), "body{}").unwrap();
        let context = context_with(&dir);

        let mut req = Request::get("/app/site.css");
        req.set_context(Some(context));
        req.set_servlet_path("/site.css", None);
        let mut resp = Response::new();
        DefaultServlet.service(&mut req, &mut resp).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.content_type(), Some("text/css"));
        assert_eq!(resp.body_str(), "body{}");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let context = context_with(&dir);

        let mut req = Request::get("/app/none.txt");
        req.set_context(Some(context));
        req.set_servlet_path("/none.txt", None);
        let mut resp = Response::new();
        DefaultServlet.service(&mut req, &mut resp).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(resp.is_error());
    }

    #[tokio::test]
    async fn test_post_is_not_allowed() {
        let mut req = Request::new(Method::POST, "/app/x");
        let mut resp = Response::new();
        DefaultServlet.service(&mut req, &mut resp).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.header("allow"), Some("GET, HEAD"));
    }
}
