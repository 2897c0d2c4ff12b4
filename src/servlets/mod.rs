// Container-provided components
// Servlets and filters resolved through the container loader rather than the application

mod default;
mod dumper;
mod jsp;

pub use default::DefaultServlet;
pub use dumper::RequestDumperFilter;
pub use jsp::JspServlet;

use crate::http::{DispatcherType, Request, INCLUDE_PATH_INFO, INCLUDE_SERVLET_PATH};

/// Context-relative path of the resource a container servlet should serve.
/// Included targets are described by the include attributes.
pub(crate) fn relative_path(req: &Request) -> String {
    let (servlet_path, path_info) = if req.dispatcher_type() == DispatcherType::Include {
        (
            req.attribute(INCLUDE_SERVLET_PATH)
                .and_then(|v| v.as_str())
                .unwrap_or(req.servlet_path())
                .to_string(),
            req.attribute(INCLUDE_PATH_INFO)
                .and_then(|v| v.as_str())
                .map(str::to_string),
        )
    } else {
        (req.servlet_path().to_string(), req.path_info().map(str::to_string))
    };

    let path = match path_info {
        Some(info) => format!("{}{}", servlet_path, info),
        None => servlet_path,
    };
    if path.is_empty() {
        "/".to_string()
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_relative_path_prefers_include_attributes() {
        let mut req = Request::get("/app/outer");
        req.set_servlet_path("/outer", None);
        assert_eq!(relative_path(&req), "/outer");

        req.set_dispatcher_type(DispatcherType::Include);
        req.set_attribute(INCLUDE_SERVLET_PATH, Value::String("/static".into()));
        req.set_attribute(INCLUDE_PATH_INFO, Value::String("/a.css".into()));
        assert_eq!(relative_path(&req), "/static/a.css");
    }

    #[test]
    fn test_root_context_request_maps_to_slash() {
        let req = Request::get("/");
        assert_eq!(relative_path(&req), "/");
    }
}
