// Integration tests for context and wrapper lifecycles
// Startup rollback, allocation balance under failures and drain-before-unload

use async_trait::async_trait;
use hyper::StatusCode;
use pear_container::context::ServletSource;
use pear_container::descriptor::{ContextConfig, DescriptorSource};
use pear_container::listener::{EventListener, ServletContextListener};
use pear_container::{Context, Host, Request, Response, Servlet, ServletError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

/// Fails every other request
#[derive(Default)]
struct Flaky {
    calls: AtomicUsize,
    destroys: Arc<AtomicUsize>,
}

#[async_trait]
impl Servlet for Flaky {
    async fn service(&self, _req: &mut Request, resp: &mut Response) -> Result<(), ServletError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
            return Err(ServletError::service("flaked"));
        }
        resp.write_str("ok");
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ServletError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Refuses;

#[async_trait]
impl ServletContextListener for Refuses {
    async fn context_initialized(&self, _context: &Context) -> Result<(), ServletError> {
        Err(ServletError::service("database unreachable"))
    }
}

fn context_with(path: &str, servlet: Arc<Flaky>) -> Arc<Context> {
    let context = Context::new(path);
    context.add_lifecycle_listener(Arc::new(ContextConfig::new(DescriptorSource::None)));
    let registration = context
        .add_servlet("flaky", ServletSource::Instance(servlet))
        .unwrap();
    registration.add_mapping(&["/flaky"]).unwrap();
    context
}

#[tokio::test]
async fn test_allocation_balances_across_failures() {
    let host = Host::new("localhost");
    let context = context_with("/app", Arc::new(Flaky::default()));
    host.add_context(context.clone()).unwrap();
    assert_eq!(host.start_contexts().await, 0);

    let mut statuses = Vec::new();
    for _ in 0..4 {
        statuses.push(host.invoke(Request::get("/app/flaky")).await.status());
    }
    assert_eq!(
        statuses,
        vec![
            StatusCode::OK,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::OK,
            StatusCode::INTERNAL_SERVER_ERROR
        ]
    );

    let wrapper = context.find_child("flaky").unwrap();
    assert_eq!(wrapper.count_allocated(), 0);
    let stats = wrapper.stats();
    assert_eq!(stats.request_count, 4);
    assert_eq!(stats.error_count, 2);

    host.stop().await;
}

#[tokio::test]
async fn test_unload_waits_for_outstanding_allocations() {
    let destroys = Arc::new(AtomicUsize::new(0));
    let servlet = Arc::new(Flaky {
        calls: AtomicUsize::new(0),
        destroys: destroys.clone(),
    });
    let context = context_with("/app", servlet);
    assert_ok!(context.start().await);

    let wrapper = context.find_child("flaky").unwrap();
    let held = wrapper.allocate().await.unwrap();
    assert_eq!(wrapper.count_allocated(), 1);

    let unloading = wrapper.clone();
    let unload = tokio::spawn(async move { unloading.unload().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(wrapper.is_unloading());
    assert_eq!(destroys.load(Ordering::SeqCst), 0);
    assert!(wrapper.allocate().await.is_err());

    wrapper.deallocate(held).await;
    assert_ok!(unload.await.unwrap());
    assert_eq!(destroys.load(Ordering::SeqCst), 1);
    assert_eq!(wrapper.count_allocated(), 0);

    context.destroy().await.unwrap();
}

#[tokio::test]
async fn test_failed_startup_rolls_back() {
    let host = Host::new("localhost");
    let broken = context_with("/broken", Arc::new(Flaky::default()));
    broken
        .add_listener(EventListener::Context(Arc::new(Refuses)))
        .unwrap();
    let healthy = context_with("/healthy", Arc::new(Flaky::default()));
    host.add_context(broken.clone()).unwrap();
    host.add_context(healthy.clone()).unwrap();

    assert_eq!(host.start_contexts().await, 1);
    assert!(!broken.is_available());
    assert!(healthy.is_available());

    let resp = host.invoke(Request::get("/broken/flaky")).await;
    assert_ne!(resp.status(), StatusCode::OK);
    let resp = host.invoke(Request::get("/healthy/flaky")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    assert_ok!(broken.stop().await);
    host.stop().await;
}
