// Context valve
// Selects the wrapper for a request and keeps private directories out of reach

use super::{send_error, Next, Valve, WrapperValve};
use crate::error::ServletError;
use crate::http::{normalize_path, Request, Response};
use crate::mapper::MappingData;
use async_trait::async_trait;
use hyper::StatusCode;
use tracing::trace;

/// Basic valve of every context pipeline
pub struct StandardContextValve;

/// Is `path` inside WEB-INF or META-INF?
fn is_protected(path: &str) -> bool {
    let bytes = path.as_bytes();
    ["/web-inf", "/meta-inf"].iter().any(|dir| {
        bytes
            .get(..dir.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(dir.as_bytes()))
            && matches!(bytes.get(dir.len()), None | Some(b'/'))
    })
}

#[async_trait]
impl Valve for StandardContextValve {
    async fn invoke(&self, req: &mut Request, resp: &mut Response, _next: Next<'_>) -> Result<(), ServletError> {
        let Some(context) = req.context().cloned() else {
            send_error(resp, StatusCode::INTERNAL_SERVER_ERROR, "no context to process this request");
            return Ok(());
        };

        let Some(path) = normalize_path(req.context_relative_path()) else {
            send_error(resp, StatusCode::BAD_REQUEST, req.context_relative_path().to_string());
            return Ok(());
        };
        if is_protected(&path) {
            send_error(resp, StatusCode::NOT_FOUND, path);
            return Ok(());
        }

        if context.is_paused() {
            send_error(resp, StatusCode::SERVICE_UNAVAILABLE, "application is being reloaded");
            return Ok(());
        }

        if req.wrapper().is_none() {
            let mut data = MappingData::default();
            context.map(&path, &mut data);
            let wrapper = data
                .wrapper_name
                .as_deref()
                .and_then(|name| context.find_child(name));
            match wrapper {
                Some(wrapper) => {
                    trace!(path = %path, servlet = %wrapper.name(), match_type = ?data.match_type, "Mapped request");
                    req.set_servlet_path(data.servlet_path.clone(), data.path_info.clone());
                    req.set_wrapper(Some(wrapper));
                }
                None => {
                    send_error(resp, StatusCode::NOT_FOUND, path);
                    return Ok(());
                }
            }
        }

        WrapperValve.invoke(req, resp, Next::end()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_directories() {
        assert!(is_protected("/WEB-INF/web.xml"));
        assert!(is_protected("/meta-inf"));
        assert!(is_protected("/Web-Inf/"));
        assert!(!is_protected("/web-information"));
        assert!(!is_protected("/app/WEB-INF"));
        assert!(!is_protected("/abcdef\u{e9}x"));
        assert!(!is_protected("/\u{e9}\u{e9}\u{e9}\u{e9}"));
    }
}
