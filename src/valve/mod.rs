// Request processing pipelines
// Ordered valves ending in a basic valve, passed along through a continuation

mod context;
mod host;
mod wrapper;

pub use context::StandardContextValve;
pub use host::HostValve;
pub use wrapper::WrapperValve;
pub(crate) use wrapper::send_unavailable;

use crate::error::{LifecycleError, ServletError};
use crate::http::{Request, Response};
use async_trait::async_trait;
use hyper::StatusCode;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error};

/// One processing stage
#[async_trait]
pub trait Valve: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Process the request. Call `next.invoke` to hand it to the rest of the pipeline.
    async fn invoke(&self, req: &mut Request, resp: &mut Response, next: Next<'_>) -> Result<(), ServletError>;

    async fn start(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    async fn stop(&self) {}
}

/// Remainder of a pipeline after the current valve
pub struct Next<'a> {
    rest: &'a [Arc<dyn Valve>],
    basic: Option<&'a Arc<dyn Valve>>,
}

impl<'a> Next<'a> {
    /// Continuation for a valve invoked on its own; `invoke` does nothing
    pub fn end() -> Next<'static> {
        Next {
            rest: &[],
            basic: None,
        }
    }

    pub async fn invoke(self, req: &mut Request, resp: &mut Response) -> Result<(), ServletError> {
        match self.rest.split_first() {
            Some((valve, rest)) => {
                valve
                    .invoke(
                        req,
                        resp,
                        Next {
                            rest,
                            basic: self.basic,
                        },
                    )
                    .await
            }
            None => match self.basic {
                Some(basic) => basic.invoke(req, resp, Next::end()).await,
                None => Ok(()),
            },
        }
    }
}

/// Custom valves in insertion order followed by the basic valve
pub struct Pipeline {
    valves: RwLock<Arc<Vec<Arc<dyn Valve>>>>,
    basic: Arc<dyn Valve>,
}

impl Pipeline {
    pub fn new(basic: Arc<dyn Valve>) -> Self {
        Self {
            valves: RwLock::new(Arc::new(Vec::new())),
            basic,
        }
    }

    pub fn add_valve(&self, valve: Arc<dyn Valve>) {
        debug!(valve = valve.name(), "Adding valve");
        let mut valves = self.valves.write();
        let mut next = Vec::clone(&valves);
        next.push(valve);
        *valves = Arc::new(next);
    }

    pub fn valves(&self) -> Vec<Arc<dyn Valve>> {
        self.valves.read().as_ref().clone()
    }

    pub fn has_custom_valves(&self) -> bool {
        !self.valves.read().is_empty()
    }

    pub fn basic(&self) -> &Arc<dyn Valve> {
        &self.basic
    }

    pub async fn invoke(&self, req: &mut Request, resp: &mut Response) -> Result<(), ServletError> {
        let valves = self.valves.read().clone();
        Next {
            rest: &valves,
            basic: Some(&self.basic),
        }
        .invoke(req, resp)
        .await
    }

    pub async fn start(&self) -> Result<(), LifecycleError> {
        for valve in self.valves() {
            valve.start().await?;
        }
        self.basic.start().await
    }

    /// Stop every valve in reverse order
    pub async fn stop(&self) {
        self.basic.stop().await;
        for valve in self.valves().iter().rev() {
            valve.stop().await;
        }
    }
}

/// Record a processing failure on the request and flag the response as a 500
pub(crate) fn exception(req: &mut Request, resp: &mut Response, err: ServletError) {
    req.set_exception(Arc::new(err));
    resp.set_status(StatusCode::INTERNAL_SERVER_ERROR);
    resp.set_error();
}

/// `send_error` where a committed response is only worth a log line
pub(crate) fn send_error(resp: &mut Response, status: StatusCode, message: impl Into<String>) {
    let message = message.into();
    if let Err(e) = resp.send_error(status, Some(&message)) {
        error!(status = status.as_u16(), error = %e, "Cannot send error status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Tag(&'static str, Arc<Mutex<Vec<&'static str>>>, bool);

    #[async_trait]
    impl Valve for Tag {
        async fn invoke(&self, req: &mut Request, resp: &mut Response, next: Next<'_>) -> Result<(), ServletError> {
            self.1.lock().push(self.0);
            if self.2 {
                next.invoke(req, resp).await
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_valves_run_in_order_before_basic() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(Arc::new(Tag("basic", log.clone(), true)));
        pipeline.add_valve(Arc::new(Tag("first", log.clone(), true)));
        pipeline.add_valve(Arc::new(Tag("second", log.clone(), true)));

        let mut req = Request::get("/");
        let mut resp = Response::new();
        pipeline.invoke(&mut req, &mut resp).await.unwrap();
        assert_eq!(*log.lock(), vec!["first", "second", "basic"]);
    }

    #[tokio::test]
    async fn test_valve_can_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(Arc::new(Tag("basic", log.clone(), true)));
        pipeline.add_valve(Arc::new(Tag("gate", log.clone(), false)));
        assert!(pipeline.has_custom_valves());

        let mut req = Request::get("/");
        let mut resp = Response::new();
        pipeline.invoke(&mut req, &mut resp).await.unwrap();
        assert_eq!(*log.lock(), vec!["gate"]);
    }
}
