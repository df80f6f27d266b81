//! gRPC ingestion path over the same store

use ipnet::IpNet;
use std::net::SocketAddr;
use std::sync::Arc;
use tally_core::{validate_batch, Metric, MetricKind, MetricPayload, TallyError};
use tally_proto::metrics_service_server::{MetricsService, MetricsServiceServer};
use tally_proto::{
    GetMetricRequest, GetMetricResponse, GetMetricsRequest, GetMetricsResponse, PingRequest,
    PingResponse, UpdateMetricRequest, UpdateMetricResponse, UpdateMetricsRequest,
    UpdateMetricsResponse, REAL_IP_METADATA,
};
use tally_storage::MetricStore;
use tokio_util::sync::CancellationToken;
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::error::rpc_status;
use crate::pipeline::origin_is_trusted;

/// gRPC service implementation
pub struct MetricsServiceImpl {
    store: Arc<dyn MetricStore>,
}

impl MetricsServiceImpl {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }
}

fn store_status(err: tally_storage::StorageError) -> Status {
    Status::internal(format!("store failure: {}", err))
}

#[tonic::async_trait]
impl MetricsService for MetricsServiceImpl {
    async fn update_metric(
        &self,
        request: Request<UpdateMetricRequest>,
    ) -> std::result::Result<Response<UpdateMetricResponse>, Status> {
        let proto = request
            .into_inner()
            .metric
            .ok_or_else(|| Status::invalid_argument("metric required"))?;

        let metric = Metric::try_from(MetricPayload::from(proto)).map_err(|e| rpc_status(&e))?;
        self.store.apply(&metric).await.map_err(store_status)?;
        debug!("gRPC: updated {} {}", metric.kind(), metric.id);

        Ok(Response::new(UpdateMetricResponse {
            metric: Some(metric.into()),
        }))
    }

    async fn update_metrics(
        &self,
        request: Request<UpdateMetricsRequest>,
    ) -> std::result::Result<Response<UpdateMetricsResponse>, Status> {
        let payloads: Vec<MetricPayload> = request
            .into_inner()
            .metrics
            .into_iter()
            .map(MetricPayload::from)
            .collect();
        if payloads.is_empty() {
            return Err(Status::invalid_argument("empty batch"));
        }

        let metrics = validate_batch(payloads).map_err(|e| rpc_status(&e))?;
        for metric in &metrics {
            self.store.apply(metric).await.map_err(store_status)?;
        }
        debug!("gRPC: applied batch of {} metrics", metrics.len());

        Ok(Response::new(UpdateMetricsResponse { success: true }))
    }

    async fn get_metric(
        &self,
        request: Request<GetMetricRequest>,
    ) -> std::result::Result<Response<GetMetricResponse>, Status> {
        let req = request.into_inner();
        let lookup = MetricPayload {
            id: req.id,
            kind: req.r#type,
            ..Default::default()
        };
        let kind: MetricKind = lookup.identity().map_err(|e| rpc_status(&e))?;

        let value = self.store.get(kind, &lookup.id).await.ok_or_else(|| {
            rpc_status(&TallyError::NotFound(format!("{} {}", kind, lookup.id)))
        })?;

        Ok(Response::new(GetMetricResponse {
            metric: Some(
                Metric {
                    id: lookup.id,
                    value,
                }
                .into(),
            ),
        }))
    }

    async fn get_metrics(
        &self,
        _request: Request<GetMetricsRequest>,
    ) -> std::result::Result<Response<GetMetricsResponse>, Status> {
        let metrics = self.store.all().await.into_iter().map(Into::into).collect();
        Ok(Response::new(GetMetricsResponse { metrics }))
    }

    async fn ping(
        &self,
        _request: Request<PingRequest>,
    ) -> std::result::Result<Response<PingResponse>, Status> {
        let success = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("gRPC ping: store unreachable: {}", e);
                false
            }
        };
        Ok(Response::new(PingResponse { success }))
    }
}

/// Applies the trusted-subnet rule to the `x-real-ip` metadata entry
#[derive(Clone)]
pub struct OriginInterceptor {
    trusted: Option<IpNet>,
}

impl OriginInterceptor {
    pub fn new(trusted: Option<IpNet>) -> Self {
        Self { trusted }
    }
}

impl Interceptor for OriginInterceptor {
    fn call(&mut self, request: Request<()>) -> std::result::Result<Request<()>, Status> {
        let Some(net) = &self.trusted else {
            return Ok(request);
        };

        let real_ip = request
            .metadata()
            .get(REAL_IP_METADATA)
            .and_then(|v| v.to_str().ok());

        if origin_is_trusted(net, real_ip) {
            Ok(request)
        } else {
            Err(Status::permission_denied("origin not in trusted subnet"))
        }
    }
}

pub type MetricsServer = InterceptedService<MetricsServiceServer<MetricsServiceImpl>, OriginInterceptor>;

/// Service with the origin interceptor attached
pub fn service(store: Arc<dyn MetricStore>, trusted: Option<IpNet>) -> MetricsServer {
    MetricsServiceServer::with_interceptor(
        MetricsServiceImpl::new(store),
        OriginInterceptor::new(trusted),
    )
}

/// Serve until `cancel` fires
pub async fn serve(
    addr: SocketAddr,
    store: Arc<dyn MetricStore>,
    trusted: Option<IpNet>,
    cancel: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    info!("gRPC server listening on {}", addr);
    Server::builder()
        .add_service(service(store, trusted))
        .serve_with_shutdown(addr, cancel.cancelled_owned())
        .await
}
