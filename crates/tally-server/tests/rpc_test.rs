//! gRPC service and origin interceptor tests

use std::sync::Arc;
use tally_proto::metrics_service_server::MetricsService;
use tally_proto::{
    GetMetricRequest, GetMetricsRequest, Metric, PingRequest, UpdateMetricRequest,
    UpdateMetricsRequest, REAL_IP_METADATA,
};
use tally_server::rpc::{MetricsServiceImpl, OriginInterceptor};
use tally_storage::{MemoryStore, MetricStore};
use tonic::metadata::MetadataValue;
use tonic::service::Interceptor;
use tonic::{Code, Request};

fn gauge(id: &str, value: f64) -> Metric {
    Metric {
        id: id.into(),
        r#type: "gauge".into(),
        value: Some(value),
        delta: None,
    }
}

fn counter(id: &str, delta: i64) -> Metric {
    Metric {
        id: id.into(),
        r#type: "counter".into(),
        value: None,
        delta: Some(delta),
    }
}

fn service() -> (MetricsServiceImpl, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (MetricsServiceImpl::new(store.clone()), store)
}

#[tokio::test]
async fn test_update_and_get_metric() {
    let (svc, store) = service();

    let response = svc
        .update_metric(Request::new(UpdateMetricRequest {
            metric: Some(gauge("Alloc", 42.5)),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.metric.unwrap().value, Some(42.5));
    assert_eq!(store.get_gauge("Alloc").await, Some(42.5));

    let found = svc
        .get_metric(Request::new(GetMetricRequest {
            id: "Alloc".into(),
            r#type: "gauge".into(),
        }))
        .await
        .unwrap()
        .into_inner()
        .metric
        .unwrap();
    assert_eq!(found.id, "Alloc");
    assert_eq!(found.value, Some(42.5));
}

#[tokio::test]
async fn test_counter_accumulates() {
    let (svc, _) = service();

    for _ in 0..2 {
        svc.update_metric(Request::new(UpdateMetricRequest {
            metric: Some(counter("PollCount", 5)),
        }))
        .await
        .unwrap();
    }

    let found = svc
        .get_metric(Request::new(GetMetricRequest {
            id: "PollCount".into(),
            r#type: "counter".into(),
        }))
        .await
        .unwrap()
        .into_inner()
        .metric
        .unwrap();
    assert_eq!(found.delta, Some(10));
}

#[tokio::test]
async fn test_update_rejections() {
    let (svc, _) = service();

    let status = svc
        .update_metric(Request::new(UpdateMetricRequest { metric: None }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let mut bad = gauge("Alloc", 1.0);
    bad.r#type = "histogram".into();
    let status = svc
        .update_metric(Request::new(UpdateMetricRequest { metric: Some(bad) }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_get_missing_metric() {
    let (svc, _) = service();

    let status = svc
        .get_metric(Request::new(GetMetricRequest {
            id: "nope".into(),
            r#type: "gauge".into(),
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
}

#[tokio::test]
async fn test_batch_is_all_or_nothing() {
    let (svc, store) = service();

    let mut broken = gauge("Broken", 0.0);
    broken.value = None;
    let status = svc
        .update_metrics(Request::new(UpdateMetricsRequest {
            metrics: vec![gauge("Alloc", 1.0), broken],
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(store.all().await.is_empty());

    let status = svc
        .update_metrics(Request::new(UpdateMetricsRequest { metrics: vec![] }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let response = svc
        .update_metrics(Request::new(UpdateMetricsRequest {
            metrics: vec![gauge("Alloc", 1.0), counter("PollCount", 2), counter("PollCount", 3)],
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(response.success);
    assert_eq!(store.get_counter("PollCount").await, Some(5));
}

#[tokio::test]
async fn test_get_metrics_lists_everything() {
    let (svc, store) = service();
    store.set_gauge("Alloc", 1.0).await.unwrap();
    store.set_counter("PollCount", 4).await.unwrap();

    let metrics = svc
        .get_metrics(Request::new(GetMetricsRequest {}))
        .await
        .unwrap()
        .into_inner()
        .metrics;
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0].r#type, "gauge");
    assert_eq!(metrics[1].delta, Some(4));
}

#[tokio::test]
async fn test_ping() {
    let (svc, _) = service();
    let response = svc.ping(Request::new(PingRequest {})).await.unwrap().into_inner();
    assert!(response.success);
}

fn request_from(ip: Option<&'static str>) -> Request<()> {
    let mut request = Request::new(());
    if let Some(ip) = ip {
        request
            .metadata_mut()
            .insert(REAL_IP_METADATA, MetadataValue::from_static(ip));
    }
    request
}

#[test]
fn test_interceptor_without_subnet_allows_all() {
    let mut interceptor = OriginInterceptor::new(None);
    assert!(interceptor.call(request_from(None)).is_ok());
}

#[test]
fn test_interceptor_checks_subnet() {
    let mut interceptor = OriginInterceptor::new(Some("10.0.0.0/8".parse().unwrap()));

    assert!(interceptor.call(request_from(Some("10.1.2.3"))).is_ok());

    let status = interceptor.call(request_from(Some("192.168.0.1"))).unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    let status = interceptor.call(request_from(None)).unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
}
