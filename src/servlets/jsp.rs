// JSP servlet
// Placeholder for page compilation, which this container does not perform

use super::relative_path;
use crate::error::ServletError;
use crate::http::{Request, Response, JSP_FILE_ATTR};
use crate::servlet::Servlet;
use async_trait::async_trait;
use hyper::StatusCode;
use tracing::warn;

/// Registered by the container under the name `jsp`. Answers 501 for every page.
#[derive(Debug, Default)]
pub struct JspServlet;

#[async_trait]
impl Servlet for JspServlet {
    async fn service(&self, req: &mut Request, resp: &mut Response) -> Result<(), ServletError> {
        // Servlets declared with a JSP file name their page through this attribute
        let page = req
            .attribute(JSP_FILE_ATTR)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| relative_path(req));
        warn!(page = %page, "JSP requested but page compilation is not available");
        resp.send_error(
            StatusCode::NOT_IMPLEMENTED,
            Some(&format!("JSP page {} cannot be compiled", page)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_jsp_file_attribute_names_the_page() {
        let mut req = Request::get("/app/x");
        req.set_attribute(JSP_FILE_ATTR, serde_json::Value::String("/WEB-INF/a.jsp".into()));
        let mut resp = Response::new();
        JspServlet.service(&mut req, &mut resp).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(resp.message(), Some("JSP page /WEB-INF/a.jsp cannot be compiled"));
    }
}
