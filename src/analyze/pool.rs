// src/analyze/pool.rs
//! AI dispatch: a fixed set of workers fed through a bounded job queue.
//!
//! Each worker runs one call at a time, so at most `workers` calls are in
//! flight. A retryable failure goes back to the coordinator, which parks the
//! job on a timer and re-queues it when the backoff elapses; workers never
//! sleep on a backoff.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;

use super::client::DynCompletionClient;
use super::prompt::Prompt;
use super::response::{parse_response, Verdict};
use super::retry::RetryPolicy;
use crate::error::{AnalysisError, TransportError};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub call_timeout: Duration,
    /// Consecutive exhausted-retry failures that end the run.
    pub failure_budget: u32,
    pub policy: RetryPolicy,
}

#[derive(Debug)]
pub struct Job {
    pub entry_ref: usize,
    pub category: String,
    pub prompt: Prompt,
    attempt: u32,
}

impl Job {
    pub fn new(entry_ref: usize, category: String, prompt: Prompt) -> Self {
        Self {
            entry_ref,
            category,
            prompt,
            attempt: 0,
        }
    }

    fn finish(self, result: Result<Verdict, AnalysisError>) -> JobOutcome {
        JobOutcome {
            entry_ref: self.entry_ref,
            attempts: self.attempt,
            result,
        }
    }
}

/// Terminal state of one job.
#[derive(Debug)]
pub struct JobOutcome {
    pub entry_ref: usize,
    pub attempts: u32,
    pub result: Result<Verdict, AnalysisError>,
}

#[derive(Debug, Default)]
pub struct PoolReport {
    /// One per submitted job, in completion order.
    pub outcomes: Vec<JobOutcome>,
    /// Set when the AI service was judged unusable and the pool stopped early.
    pub aborted: Option<String>,
    /// Set when the shutdown flag stopped the pool.
    pub cancelled: bool,
}

enum Event {
    Done(JobOutcome),
    Retry(Job, Duration),
    Ready(Job),
}

/// Resolves to `true` once the flag is raised, `false` if the sender is gone.
async fn wait_true(rx: &mut watch::Receiver<bool>) -> bool {
    rx.wait_for(|v| *v).await.is_ok()
}

/// Run every job to a terminal outcome.
pub async fn run_pool(
    client: DynCompletionClient,
    cfg: PoolConfig,
    jobs: Vec<Job>,
    mut shutdown: watch::Receiver<bool>,
) -> PoolReport {
    let mut report = PoolReport::default();
    if jobs.is_empty() {
        return report;
    }

    let workers = cfg.workers.max(1);
    let mut outstanding = jobs.len();
    let mut pending: VecDeque<Job> = jobs.into();

    let (job_tx, job_rx) = mpsc::channel::<Job>(workers);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (ev_tx, mut ev_rx) = mpsc::channel::<Event>(workers * 4);
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut set = JoinSet::new();
    for id in 0..workers {
        set.spawn(worker(
            id,
            client.clone(),
            cfg.policy.clone(),
            cfg.call_timeout,
            job_rx.clone(),
            ev_tx.clone(),
            stop_rx.clone(),
        ));
    }

    let mut stopping = false;
    let mut shutdown_live = true;
    let mut consecutive_failures = 0u32;

    if *shutdown.borrow() {
        stopping = true;
        report.cancelled = true;
        stop_tx.send_replace(true);
    }

    while outstanding > 0 {
        if stopping {
            while let Some(job) = pending.pop_front() {
                outstanding -= 1;
                report.outcomes.push(job.finish(Err(AnalysisError::Cancelled)));
            }
            if outstanding == 0 {
                break;
            }
        }

        tokio::select! {
            permit = job_tx.reserve(), if !stopping && !pending.is_empty() => {
                if let (Ok(permit), Some(job)) = (permit, pending.pop_front()) {
                    permit.send(job);
                }
            }
            Some(ev) = ev_rx.recv() => match ev {
                Event::Done(outcome) => {
                    outstanding -= 1;
                    match &outcome.result {
                        Ok(_) | Err(AnalysisError::Validation(_)) => consecutive_failures = 0,
                        Err(AnalysisError::Transport { last, .. }) if last.is_fatal() => {
                            abort(&mut report, &stop_tx, &mut stopping, format!("{last}"));
                        }
                        Err(AnalysisError::Transport { last, .. }) => {
                            consecutive_failures += 1;
                            if consecutive_failures >= cfg.failure_budget.max(1) {
                                abort(
                                    &mut report,
                                    &stop_tx,
                                    &mut stopping,
                                    format!("{consecutive_failures} consecutive failures, last: {last}"),
                                );
                            }
                        }
                        Err(AnalysisError::Cancelled) => {}
                    }
                    report.outcomes.push(outcome);
                }
                Event::Retry(job, delay) => {
                    if stopping {
                        outstanding -= 1;
                        report.outcomes.push(job.finish(Err(AnalysisError::Cancelled)));
                    } else {
                        let tx = ev_tx.clone();
                        let mut stop = stop_rx.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = wait_true(&mut stop) => {}
                            }
                            let _ = tx.send(Event::Ready(job)).await;
                        });
                    }
                }
                Event::Ready(job) => {
                    if stopping {
                        outstanding -= 1;
                        report.outcomes.push(job.finish(Err(AnalysisError::Cancelled)));
                    } else {
                        pending.push_front(job);
                    }
                }
            },
            raised = wait_true(&mut shutdown), if shutdown_live && !stopping => {
                if raised {
                    tracing::info!(target: "analyze", outstanding, "shutdown: abandoning ai jobs");
                    stopping = true;
                    report.cancelled = true;
                    stop_tx.send_replace(true);
                } else {
                    shutdown_live = false;
                }
            }
            else => break,
        }
    }

    drop(job_tx);
    while let Some(res) = set.join_next().await {
        if let Err(e) = res {
            tracing::error!(target: "analyze", error = %e, "ai worker panicked");
        }
    }
    report
}

fn abort(report: &mut PoolReport, stop_tx: &watch::Sender<bool>, stopping: &mut bool, reason: String) {
    if report.aborted.is_none() {
        tracing::error!(target: "analyze", reason = %reason, "ai service unavailable, stopping dispatch");
        report.aborted = Some(reason);
    }
    *stopping = true;
    stop_tx.send_replace(true);
}

async fn call_once(
    client: &DynCompletionClient,
    prompt: &Prompt,
    call_timeout: Duration,
) -> Result<String, TransportError> {
    match tokio::time::timeout(call_timeout, client.complete(prompt)).await {
        Ok(r) => r,
        Err(_) => Err(TransportError::Timeout(call_timeout)),
    }
}

async fn worker(
    id: usize,
    client: DynCompletionClient,
    policy: RetryPolicy,
    call_timeout: Duration,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    events: mpsc::Sender<Event>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let next = { jobs.lock().await.recv().await };
        let Some(mut job) = next else { break };

        if *stop.borrow() {
            if events
                .send(Event::Done(job.finish(Err(AnalysisError::Cancelled))))
                .await
                .is_err()
            {
                break;
            }
            continue;
        }

        job.attempt += 1;
        counter!("analyze_attempts_total").increment(1);
        let res = tokio::select! {
            r = call_once(&client, &job.prompt, call_timeout) => Some(r),
            _ = wait_true(&mut stop) => None,
        };

        let event = match res {
            None => Event::Done(job.finish(Err(AnalysisError::Cancelled))),
            Some(Ok(text)) => {
                let verdict = parse_response(&text).map_err(AnalysisError::from);
                Event::Done(job.finish(verdict))
            }
            Some(Err(e)) if policy.should_retry(job.attempt, &e) => {
                let delay = policy.delay_for(job.attempt, &e);
                tracing::warn!(
                    target: "analyze",
                    worker = id,
                    category = %job.category,
                    entry_ref = job.entry_ref,
                    attempt = job.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "ai call failed, will retry"
                );
                Event::Retry(job, delay)
            }
            Some(Err(e)) => {
                let attempts = job.attempt;
                Event::Done(job.finish(Err(AnalysisError::Transport { attempts, last: e })))
            }
        };

        if events.send(event).await.is_err() {
            break;
        }
    }
}
