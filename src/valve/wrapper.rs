// Wrapper valve
// Allocates the servlet, runs the filter chain and always releases what it took

use super::{exception, send_error, Next, Valve};
use crate::error::ServletError;
use crate::filter_chain::create_filter_chain;
use crate::http::{Request, Response, JSP_FILE_ATTR};
use crate::wrapper::{Wrapper, UNAVAILABLE_FOREVER};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper::header::{HeaderValue, RETRY_AFTER};
use hyper::StatusCode;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Leaf-most valve: invokes the servlet selected for the request
pub struct WrapperValve;

/// HTTP-date for `Retry-After`
pub(crate) fn http_date(when: DateTime<Utc>) -> String {
    when.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Answer for an unavailable servlet: 503 with `Retry-After` while a window is open,
/// 404 once it is gone for good
pub(crate) fn send_unavailable(wrapper: &Wrapper, resp: &mut Response) {
    let available = wrapper.available();
    if available == UNAVAILABLE_FOREVER {
        send_error(resp, StatusCode::NOT_FOUND, format!("servlet {} is not available", wrapper.name()));
        return;
    }
    if available > 0 {
        let when = i64::try_from(available)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now);
        if let Ok(value) = HeaderValue::from_str(&http_date(when)) {
            resp.set_header(RETRY_AFTER, value);
        }
    }
    send_error(
        resp,
        StatusCode::SERVICE_UNAVAILABLE,
        format!("servlet {} is currently unavailable", wrapper.name()),
    );
}

#[async_trait]
impl Valve for WrapperValve {
    async fn invoke(&self, req: &mut Request, resp: &mut Response, _next: Next<'_>) -> Result<(), ServletError> {
        let Some(wrapper) = req.wrapper().cloned() else {
            send_error(resp, StatusCode::NOT_FOUND, req.context_relative_path().to_string());
            return Ok(());
        };
        let Some(context) = req.context().cloned() else {
            send_error(resp, StatusCode::INTERNAL_SERVER_ERROR, "no context to process this request");
            return Ok(());
        };
        let started = Instant::now();
        let mut failed = false;

        let mut unavailable = false;
        if !context.is_available() {
            send_error(resp, StatusCode::SERVICE_UNAVAILABLE, "this application is not currently available");
            unavailable = true;
        }
        if !unavailable && wrapper.is_unavailable() {
            warn!(servlet = %wrapper.name(), "Servlet is currently unavailable");
            send_unavailable(&wrapper, resp);
            unavailable = true;
        }

        let mut servlet = None;
        if !unavailable {
            match wrapper.allocate().await {
                Ok(instance) => servlet = Some(instance),
                Err(e @ ServletError::Unavailable { .. }) => {
                    wrapper.unavailable(Some(&e));
                    send_unavailable(&wrapper, resp);
                }
                Err(e) => {
                    error!(servlet = %wrapper.name(), error = %e, "Allocate exception for servlet");
                    failed = true;
                    exception(req, resp, e);
                }
            }
        }

        if let Some(instance) = &servlet {
            if let Some(jsp_file) = wrapper.jsp_file() {
                req.set_attribute(JSP_FILE_ATTR, serde_json::Value::String(jsp_file));
            }

            let mut chain = create_filter_chain(&context, req, &wrapper, instance.clone());
            let result = chain.do_filter(req, resp).await;
            chain.release();

            match result {
                Ok(()) => {}
                Err(e) if e.is_client_abort() => {
                    debug!(servlet = %wrapper.name(), "Client aborted the request");
                    exception(req, resp, e);
                }
                Err(e @ ServletError::Unavailable { .. }) => {
                    warn!(servlet = %wrapper.name(), error = %e, "Servlet signalled unavailability");
                    wrapper.unavailable(Some(&e));
                    send_unavailable(&wrapper, resp);
                }
                Err(e) => {
                    error!(servlet = %wrapper.name(), error = %e, root_cause = %e.root_cause(), "Servlet service() failed");
                    failed = true;
                    exception(req, resp, e);
                }
            }
        }

        // Cleanup steps run independently of each other and of the outcome above
        if let Some(instance) = servlet {
            wrapper.deallocate(instance).await;
            if wrapper.is_permanently_unavailable() {
                if let Err(e) = wrapper.unload().await {
                    error!(servlet = %wrapper.name(), error = %e, "Servlet unload failed");
                    if !failed {
                        failed = true;
                        exception(req, resp, e);
                    }
                }
            }
        }

        wrapper.record_request(started.elapsed(), failed || resp.status().is_server_error());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_http_date_format() {
        let when = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(http_date(when), "Sat, 09 Mar 2024 07:05:01 GMT");
    }

    #[test]
    fn test_permanent_unavailability_is_not_found() {
        let wrapper = Wrapper::new("gone");
        wrapper.unavailable(None);
        let mut resp = Response::new();
        send_unavailable(&wrapper, &mut resp);
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(resp.header("retry-after").is_none());
    }

    #[test]
    fn test_temporary_unavailability_sets_retry_after() {
        let wrapper = Wrapper::new("busy");
        wrapper.unavailable(Some(&ServletError::unavailable_for("busy", 30)));
        let mut resp = Response::new();
        send_unavailable(&wrapper, &mut resp);
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(resp.header("retry-after").unwrap().ends_with("GMT"));
    }
}
