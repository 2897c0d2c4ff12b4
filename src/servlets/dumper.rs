// Request dumper filter
// Logs each request on the way in and its outcome on the way out

use crate::error::ServletError;
use crate::filter_chain::FilterChain;
use crate::http::{Request, Response};
use crate::servlet::{Filter, FilterConfig};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

#[derive(Debug, Default)]
pub struct RequestDumperFilter {
    name: RwLock<String>,
}

#[async_trait]
impl Filter for RequestDumperFilter {
    async fn init(&self, config: &FilterConfig) -> Result<(), ServletError> {
        *self.name.write() = config.filter_name().to_string();
        Ok(())
    }

    async fn do_filter(
        &self,
        req: &mut Request,
        resp: &mut Response,
        chain: &mut FilterChain,
    ) -> Result<(), ServletError> {
        let name = self.name.read().clone();
        let headers: Vec<String> = req
            .headers()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.to_str().unwrap_or("<binary>")))
            .collect();
        info!(
            filter = %name,
            method = %req.method(),
            uri = %req.request_uri(),
            query = req.query().unwrap_or(""),
            dispatch = %req.dispatcher_type(),
            remote = ?req.remote_addr(),
            headers = ?headers,
            "Request"
        );

        let result = chain.do_filter(req, resp).await;

        info!(
            filter = %name,
            uri = %req.request_uri(),
            status = resp.status().as_u16(),
            content_type = resp.content_type().unwrap_or(""),
            bytes = resp.body().len(),
            error = result.as_ref().err().map(|e| e.to_string()),
            "Response"
        );
        result
    }
}
