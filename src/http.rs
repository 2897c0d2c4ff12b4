// Container-side request and response
// Transport independent: the network adapter converts to and from hyper types

use crate::context::Context;
use crate::error::ServletError;
use crate::wrapper::Wrapper;
use bytes::{Bytes, BytesMut};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Request attribute names set during error dispatch
pub const ERROR_STATUS_CODE: &str = "jakarta.servlet.error.status_code";
pub const ERROR_MESSAGE: &str = "jakarta.servlet.error.message";
pub const ERROR_EXCEPTION_TYPE: &str = "jakarta.servlet.error.exception_type";
pub const ERROR_REQUEST_URI: &str = "jakarta.servlet.error.request_uri";
pub const ERROR_SERVLET_NAME: &str = "jakarta.servlet.error.servlet_name";

/// Request attribute names set during include dispatch
pub const INCLUDE_REQUEST_URI: &str = "jakarta.servlet.include.request_uri";
pub const INCLUDE_SERVLET_PATH: &str = "jakarta.servlet.include.servlet_path";
pub const INCLUDE_PATH_INFO: &str = "jakarta.servlet.include.path_info";
pub const INCLUDE_QUERY_STRING: &str = "jakarta.servlet.include.query_string";

/// JSP file a servlet was declared for, exposed to the JSP servlet
pub const JSP_FILE_ATTR: &str = "org.apache.catalina.jsp_file";

/// Name of the session tracking cookie
pub const SESSION_COOKIE_NAME: &str = "JSESSIONID";

/// How a request reached the current servlet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DispatcherType {
    Forward,
    Include,
    Request,
    Async,
    Error,
}

impl DispatcherType {
    fn bit(self) -> u8 {
        match self {
            DispatcherType::Forward => 1,
            DispatcherType::Include => 1 << 1,
            DispatcherType::Request => 1 << 2,
            DispatcherType::Async => 1 << 3,
            DispatcherType::Error => 1 << 4,
        }
    }
}

impl fmt::Display for DispatcherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatcherType::Forward => "FORWARD",
            DispatcherType::Include => "INCLUDE",
            DispatcherType::Request => "REQUEST",
            DispatcherType::Async => "ASYNC",
            DispatcherType::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Set of dispatcher types a filter mapping applies to. Empty means REQUEST only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DispatcherTypes(u8);

impl DispatcherTypes {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn of(types: &[DispatcherType]) -> Self {
        let mut set = Self::empty();
        for t in types {
            set.insert(*t);
        }
        set
    }

    pub fn insert(&mut self, t: DispatcherType) {
        self.0 |= t.bit();
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Does a mapping with this set apply to the given dispatch?
    pub fn matches(&self, t: DispatcherType) -> bool {
        if self.is_empty() {
            return t == DispatcherType::Request;
        }
        self.0 & t.bit() != 0
    }
}

/// Collapse repeated slashes and resolve `.` and `..` segments.
/// Returns `None` when `..` would climb above the root.
pub fn normalize_path(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    let mut normalized = String::with_capacity(path.len());
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    // A trailing slash is meaningful for welcome files
    if normalized.is_empty() || (path.ends_with('/') && !segments.is_empty()) {
        normalized.push('/');
    }
    Some(normalized)
}

/// An in-flight request as seen by valves, filters and servlets
pub struct Request {
    method: Method,
    request_uri: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    attributes: HashMap<String, serde_json::Value>,
    exception: Option<Arc<ServletError>>,
    dispatcher_type: DispatcherType,
    context_path: String,
    servlet_path: String,
    path_info: Option<String>,
    context: Option<Arc<Context>>,
    wrapper: Option<Arc<Wrapper>>,
    session_id: Option<String>,
}

impl Request {
    /// Build a request for `uri`, which may carry a query string
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (uri.to_string(), None),
        };
        Self {
            method,
            request_uri: if path.is_empty() { "/".to_string() } else { path },
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
            attributes: HashMap::new(),
            exception: None,
            dispatcher_type: DispatcherType::Request,
            context_path: String::new(),
            servlet_path: String::new(),
            path_info: None,
            context: None,
            wrapper: None,
            session_id: None,
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn request_uri(&self) -> &str {
        &self.request_uri
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn set_query(&mut self, query: Option<String>) {
        self.query = query;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Query-string parameter lookup (first value wins)
    pub fn parameter(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == name).then(|| v.replace('+', " "))
        })
    }

    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<serde_json::Value> {
        self.attributes.remove(name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &String> {
        self.attributes.keys()
    }

    /// Error recorded by the wrapper valve, consumed by the host valve
    pub fn exception(&self) -> Option<&Arc<ServletError>> {
        self.exception.as_ref()
    }

    pub fn set_exception(&mut self, error: Arc<ServletError>) {
        self.exception = Some(error);
    }

    pub fn take_exception(&mut self) -> Option<Arc<ServletError>> {
        self.exception.take()
    }

    pub fn dispatcher_type(&self) -> DispatcherType {
        self.dispatcher_type
    }

    pub fn set_dispatcher_type(&mut self, t: DispatcherType) {
        self.dispatcher_type = t;
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn set_context_path(&mut self, path: impl Into<String>) {
        self.context_path = path.into();
    }

    /// Path within the context (request URI minus the context path)
    pub fn context_relative_path(&self) -> &str {
        let rest = self
            .request_uri
            .strip_prefix(self.context_path.as_str())
            .unwrap_or(&self.request_uri);
        if rest.is_empty() {
            "/"
        } else {
            rest
        }
    }

    pub fn servlet_path(&self) -> &str {
        &self.servlet_path
    }

    pub fn path_info(&self) -> Option<&str> {
        self.path_info.as_deref()
    }

    pub fn set_servlet_path(&mut self, servlet_path: impl Into<String>, path_info: Option<String>) {
        self.servlet_path = servlet_path.into();
        self.path_info = path_info;
    }

    pub fn context(&self) -> Option<&Arc<Context>> {
        self.context.as_ref()
    }

    pub fn set_context(&mut self, context: Option<Arc<Context>>) {
        self.context = context;
    }

    pub fn wrapper(&self) -> Option<&Arc<Wrapper>> {
        self.wrapper.as_ref()
    }

    pub fn set_wrapper(&mut self, wrapper: Option<Arc<Wrapper>>) {
        self.wrapper = wrapper;
    }

    pub fn set_request_uri(&mut self, uri: impl Into<String>) {
        self.request_uri = uri.into();
    }

    /// Session id requested through the session cookie
    pub fn requested_session_id(&self) -> Option<String> {
        self.headers
            .get_all(hyper::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|c| c.trim().split_once('='))
            .find(|(k, _)| *k == SESSION_COOKIE_NAME)
            .map(|(_, v)| v.to_string())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn set_session_id(&mut self, id: Option<String>) {
        self.session_id = id;
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("request_uri", &self.request_uri)
            .field("dispatcher_type", &self.dispatcher_type)
            .field("servlet_path", &self.servlet_path)
            .field("path_info", &self.path_info)
            .finish()
    }
}

/// Response under construction. The body is buffered until the adapter sends it.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    message: Option<String>,
    headers: HeaderMap,
    body: BytesMut,
    committed: bool,
    error: bool,
    /// Set while an include is in progress; status and header changes are ignored
    included: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            message: None,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            committed: false,
            error: false,
            included: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        if self.included {
            return;
        }
        self.status = status;
    }

    /// Status reason recorded by `send_error`
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn set_message(&mut self, message: Option<String>) {
        self.message = message;
    }

    /// Flag the response as an error and record the status and message.
    ///
    /// The body is produced later by the error page dispatcher.
    pub fn send_error(
        &mut self,
        status: StatusCode,
        message: Option<&str>,
    ) -> Result<(), ServletError> {
        if self.committed {
            return Err(ServletError::service(
                "cannot send an error after the response has been committed",
            ));
        }
        if self.included {
            return Ok(());
        }
        self.status = status;
        self.message = message.map(str::to_string);
        self.error = true;
        self.body.clear();
        Ok(())
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn set_error(&mut self) {
        self.error = true;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        if self.included {
            return;
        }
        self.headers.insert(name, value);
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        if let Ok(value) = HeaderValue::from_str(content_type) {
            self.set_header(CONTENT_TYPE, value);
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    pub fn write(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write(s.as_bytes());
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Discard buffered content. Fails once committed.
    pub fn reset_buffer(&mut self) -> Result<(), ServletError> {
        if self.committed {
            return Err(ServletError::service(
                "cannot reset the buffer after the response has been committed",
            ));
        }
        self.body.clear();
        Ok(())
    }

    /// Commit the response: from here on, status and buffer can no longer be reset
    pub fn flush_buffer(&mut self) {
        self.committed = true;
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn is_included(&self) -> bool {
        self.included
    }

    pub fn set_included(&mut self, included: bool) {
        self.included = included;
    }

    /// Split into status, headers and body for the transport
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_types_default_to_request() {
        let empty = DispatcherTypes::empty();
        assert!(empty.matches(DispatcherType::Request));
        assert!(!empty.matches(DispatcherType::Forward));

        let set = DispatcherTypes::of(&[DispatcherType::Error, DispatcherType::Include]);
        assert!(set.matches(DispatcherType::Error));
        assert!(!set.matches(DispatcherType::Request));
    }

    #[test]
    fn test_send_error_after_commit_fails() {
        let mut response = Response::new();
        response.write_str("partial");
        response.flush_buffer();
        assert!(response.send_error(StatusCode::NOT_FOUND, None).is_err());
        assert!(response.reset_buffer().is_err());
    }

    #[test]
    fn test_send_error_clears_body() {
        let mut response = Response::new();
        response.write_str("discard me");
        response.send_error(StatusCode::INTERNAL_SERVER_ERROR, Some("boom")).unwrap();
        assert!(response.is_error());
        assert!(response.body().is_empty());
        assert_eq!(response.message(), Some("boom"));
    }

    #[test]
    fn test_request_parses_query_and_cookie() {
        let request = Request::get("/app/echo?msg=hello+world&x=1").with_header(
            hyper::header::COOKIE,
            HeaderValue::from_static("theme=dark; JSESSIONID=abc123"),
        );
        assert_eq!(request.request_uri(), "/app/echo");
        assert_eq!(request.parameter("msg").as_deref(), Some("hello world"));
        assert_eq!(request.requested_session_id().as_deref(), Some("abc123"));
    }

    #[test]
    fn test_context_relative_path() {
        let mut request = Request::get("/shop/cart");
        request.set_context_path("/shop");
        assert_eq!(request.context_relative_path(), "/cart");

        let mut root = Request::get("/shop");
        root.set_context_path("/shop");
        assert_eq!(root.context_relative_path(), "/");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/app//WEB-INF/x").as_deref(), Some("/app/WEB-INF/x"));
        assert_eq!(normalize_path("/app/./WEB-INF/x").as_deref(), Some("/app/WEB-INF/x"));
        assert_eq!(normalize_path("/app/a/../b").as_deref(), Some("/app/b"));
        assert_eq!(normalize_path("/app/docs/").as_deref(), Some("/app/docs/"));
        assert_eq!(normalize_path("/app/docs/.").as_deref(), Some("/app/docs"));
        assert_eq!(normalize_path("/").as_deref(), Some("/"));
        assert_eq!(normalize_path("//").as_deref(), Some("/"));
        assert_eq!(normalize_path("/caf\u{e9}/x").as_deref(), Some("/caf\u{e9}/x"));
        assert!(normalize_path("/../etc/passwd").is_none());
        assert!(normalize_path("/app/../../x").is_none());
    }
}
