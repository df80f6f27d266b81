//! Sampling, queueing and delivery
//!
//! ```text
//! sampler ──▶ bounded queue (capacity = rate limit) ──┬─▶ N HTTP workers, one job per request
//!                                                     └─▶ RPC batcher, one batch per report interval
//! ```
//!
//! Every task watches the same cancellation token. On cancel the sampler
//! stops enqueueing, the senders finish their in-flight request, and what
//! is left in the queue goes out as one final batch. The whole shutdown is
//! bounded by a grace period after which remaining work is abandoned.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tally_core::{fail_open, AgentConfig, Metric, MetricValue, Transport};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::{Collector, HostSampler};
use crate::reporter::Reporter;

/// One queued metric update
pub type Job = Metric;

/// Timing and sizing for a [`Dispatcher`]
#[derive(Debug, Clone)]
pub struct Settings {
    pub transport: Transport,
    /// Process sampling period
    pub poll_interval: Duration,
    /// Host sampling period, also the RPC batch window
    pub report_interval: Duration,
    /// Queue capacity and HTTP worker count
    pub rate_limit: usize,
    pub grace_period: Duration,
}

impl Settings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            transport: config.protocol,
            poll_interval: config.poll_interval(),
            report_interval: config.report_interval(),
            rate_limit: config.rate_limit.max(1),
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Running gauge/counter maps for the RPC transport
///
/// Gauges keep the last value seen, counter deltas for the same id add up.
#[derive(Debug, Default)]
pub struct Batch {
    gauges: BTreeMap<String, f64>,
    counters: BTreeMap<String, i64>,
}

impl Batch {
    pub fn add(&mut self, job: Job) {
        match job.value {
            MetricValue::Gauge(v) => {
                self.gauges.insert(job.id, v);
            }
            MetricValue::Counter(d) => {
                let total = self.counters.entry(job.id).or_insert(0);
                *total = total.wrapping_add(d);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    /// Empty the batch, gauges first
    pub fn take(&mut self) -> Vec<Metric> {
        let gauges = std::mem::take(&mut self.gauges)
            .into_iter()
            .map(|(id, v)| Metric::gauge(id, v));
        let counters = std::mem::take(&mut self.counters)
            .into_iter()
            .map(|(id, d)| Metric::counter(id, d));
        gauges.chain(counters).collect()
    }
}

pub struct Dispatcher {
    settings: Settings,
    reporter: Arc<dyn Reporter>,
}

impl Dispatcher {
    pub fn new(settings: Settings, reporter: Arc<dyn Reporter>) -> Self {
        Self { settings, reporter }
    }

    /// Run until `cancel` fires, then drain within the grace period
    pub async fn run(self, cancel: CancellationToken) {
        let Settings {
            transport,
            poll_interval,
            report_interval,
            rate_limit,
            grace_period,
        } = self.settings;

        let (tx, rx) = mpsc::channel::<Job>(rate_limit);
        let mut tasks = JoinSet::new();

        tasks.spawn(sample(tx, poll_interval, report_interval, cancel.clone()));

        match transport {
            Transport::Http => {
                let rx = Arc::new(Mutex::new(rx));
                for worker in 0..rate_limit {
                    tasks.spawn(send_jobs(
                        worker,
                        Arc::clone(&rx),
                        Arc::clone(&self.reporter),
                        cancel.clone(),
                    ));
                }
                tasks.spawn(flush_leftovers(
                    rx,
                    Arc::clone(&self.reporter),
                    cancel.clone(),
                ));
            }
            Transport::Grpc => {
                tasks.spawn(batch_jobs(
                    rx,
                    Arc::clone(&self.reporter),
                    report_interval,
                    cancel.clone(),
                ));
            }
        }
        info!(
            "Dispatcher started ({:?}, {} sender(s), poll {:?}, report {:?})",
            transport, rate_limit, poll_interval, report_interval
        );

        cancel.cancelled().await;
        info!("Draining agent tasks");

        let drained = tokio::time::timeout(grace_period, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!("Agent task failed: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Grace period of {:?} elapsed, abandoning {} task(s)",
                grace_period,
                tasks.len()
            );
            tasks.abort_all();
        }
    }
}

/// Enqueue with backpressure; false once cancelled or the queue is gone
async fn enqueue(tx: &mpsc::Sender<Job>, jobs: Vec<Job>, cancel: &CancellationToken) -> bool {
    for job in jobs {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            sent = tx.send(job) => {
                if sent.is_err() {
                    return false;
                }
            }
        }
    }
    true
}

/// Process stats every poll tick, host stats every report tick
async fn sample(
    tx: mpsc::Sender<Job>,
    poll_interval: Duration,
    report_interval: Duration,
    cancel: CancellationToken,
) {
    let mut collector = Collector::new();
    let mut host = HostSampler::new();

    let mut poll = tokio::time::interval(poll_interval);
    let mut report = tokio::time::interval(report_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    report.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let jobs = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = poll.tick() => collector.collect().into_metrics(),
            _ = report.tick() => host.sample().into_metrics(),
        };
        if !enqueue(&tx, jobs, &cancel).await {
            break;
        }
    }
    debug!("Sampler stopped after {} polls", collector.poll_count());
}

/// One HTTP worker: one job per request, failures dropped
async fn send_jobs(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else { break };

        fail_open(&format!("send {} {}", job.kind(), job.id), || reporter.send(&job)).await;
    }
    debug!("HTTP worker {} stopped", worker);
}

/// After cancellation, send whatever the workers left queued as one batch
async fn flush_leftovers(
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
) {
    cancel.cancelled().await;

    let mut leftovers = Vec::new();
    {
        let mut rx = rx.lock().await;
        while let Ok(job) = rx.try_recv() {
            leftovers.push(job);
        }
    }

    if !leftovers.is_empty() {
        info!("Flushing {} queued metrics", leftovers.len());
        fail_open("final batch", || reporter.send_batch(&leftovers)).await;
    }
}

/// RPC batcher: accumulate, flush every window and once more on shutdown
async fn batch_jobs(
    mut rx: mpsc::Receiver<Job>,
    reporter: Arc<dyn Reporter>,
    window: Duration,
    cancel: CancellationToken,
) {
    let mut batch = Batch::default();
    let mut ticker = tokio::time::interval(window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    let metrics = batch.take();
                    debug!("Sending batch of {}", metrics.len());
                    fail_open("send batch", || reporter.send_batch(&metrics)).await;
                }
            }
            job = rx.recv() => match job {
                Some(job) => batch.add(job),
                None => break,
            },
        }
    }

    while let Ok(job) = rx.try_recv() {
        batch.add(job);
    }
    if !batch.is_empty() {
        let metrics = batch.take();
        info!("Flushing final batch of {}", metrics.len());
        fail_open("final batch", || reporter.send_batch(&metrics)).await;
    }
}
