use crate::queue::PriorityQueue;
use crate::work_queue::{QueueError, QueueMessage, QueueRegistry, WorkQueue};
use harvest_protocol::QueueKind;
use rand::Rng;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Router-wide knobs, ported from `ConfigConstants.MAX_ACTIVE_THREADS` /
/// `MAX_MS_WORKTIME` / `DEBUG_DELAY`.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub max_active_threads: usize,
    pub worktime_cap: Option<Duration>,
    pub debug_delay: bool,
    pub max_depth: Option<u32>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            max_active_threads: 8,
            worktime_cap: None,
            debug_delay: false,
            max_depth: None,
        }
    }
}

/// Dispatcher + bounded worker pool + duplicate tracker, ported from
/// `MessageRouter`. No singleton: one instance is built in `main` and shared
/// via `Arc` with every producer (source adapters, pipeline stages).
pub struct Router {
    queue: Arc<PriorityQueue<QueueMessage>>,
    registry: Mutex<QueueRegistry>,
    semaphore: Arc<Semaphore>,
    seen: Mutex<HashSet<String>>,
    started_at: Instant,
    config: RouterConfig,
}

impl Router {
    /// Built with an empty registry: queue implementations typically need a
    /// handle back to the router they are registered into (to emit
    /// follow-on messages), so registration happens in a second step via
    /// [`Self::register`] after the `Arc<Router>` already exists.
    pub fn new(registry: QueueRegistry, config: RouterConfig) -> Arc<Self> {
        Arc::new(Router {
            queue: Arc::new(PriorityQueue::new(config.max_depth)),
            registry: Mutex::new(registry),
            semaphore: Arc::new(Semaphore::new(config.max_active_threads)),
            seen: Mutex::new(HashSet::new()),
            started_at: Instant::now(),
            config,
        })
    }

    /// Register (or replace) the processor for a destination queue.
    pub fn register(&self, kind: QueueKind, queue: Arc<dyn WorkQueue>) {
        self.registry.lock().unwrap().insert(kind, queue);
    }

    /// The dispatcher loop: pulls from the priority queue forever. System
    /// messages run inline (bypassing the worker pool); process messages
    /// are spawned against the bounded semaphore. Intended to be spawned as
    /// its own task and run for the life of the process.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.queue.dequeue() {
                Some((_, msg)) => {
                    if msg.header().system_message {
                        Self::dispatch_one(&self, msg).await;
                    } else {
                        let router = Arc::clone(&self);
                        let semaphore = Arc::clone(&router.semaphore);
                        tokio::spawn(async move {
                            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                            Self::dispatch_one(&router, msg).await;
                        });
                    }
                }
                None => tokio::time::sleep(Duration::from_millis(200)).await,
            }
        }
    }

    async fn dispatch_one(router: &Arc<Self>, msg: QueueMessage) {
        let processor = router.registry.lock().unwrap().get(&msg.destination()).cloned();
        let Some(processor) = processor else {
            tracing::warn!(destination = ?msg.destination(), "no queue registered for destination");
            return;
        };
        Self::process(router, processor, msg).await;
    }

    /// The shared retry driver every `WorkQueue` runs under, per spec.md
    /// §4.E: `Timeout` requeues via `send_later` without consuming retry
    /// budget; any other error logs, sleeps, and consumes one retry, with a
    /// CRITICAL log when the budget is exhausted.
    async fn process(router: &Arc<Self>, processor: Arc<dyn WorkQueue>, mut msg: QueueMessage) {
        let mut retries = processor.max_buffer_retries();
        loop {
            match processor.on_message(msg.clone()).await {
                Ok(()) => break,
                Err(QueueError::Timeout) => {
                    let priority = msg.header().priority;
                    router.requeue_after_timeout(msg, priority);
                    break;
                }
                Err(QueueError::Other(reason)) => {
                    tracing::error!(
                        message_type = %msg.header().message_type,
                        message_id = %msg.header().message_id,
                        reason,
                        "work queue failure"
                    );
                    msg.prepare_for_retry();
                    tokio::time::sleep(Duration::from_secs(processor.retry_time_sec())).await;
                    retries = retries.saturating_sub(1);
                    if retries == 0 {
                        tracing::error!(
                            message_type = %msg.header().message_type,
                            message_id = %msg.header().message_id,
                            "CRITICAL: retries exhausted, aborting message"
                        );
                        break;
                    }
                }
            }
        }
    }

    /// Enqueue `msg`, applying the worktime cap, debug delay, delayed-start
    /// sleep, depth increment, and duplicate-tracker checks of spec.md §4.D,
    /// in that order.
    pub async fn send(&self, msg: QueueMessage, priority: i64, delay_min: f64, delay_max: f64) {
        self.send_inner(msg, priority, delay_min, delay_max, true).await;
    }

    /// Schedules [`Self::send`] on a fresh task so the delay it may sleep
    /// through never blocks the caller — ported from `send_later_in`'s
    /// dedicated thread.
    pub fn send_later(self: &Arc<Self>, mut msg: QueueMessage, priority: i64, delay_min: f64, delay_max: f64) {
        msg.header_mut().delayed = true;
        let router = Arc::clone(self);
        tokio::spawn(async move {
            router.send_inner(msg, priority, delay_min, delay_max, true).await;
        });
    }

    /// Re-enqueues a message that already passed the duplicate check on its
    /// original send and is now merely being retried after a page-load
    /// `Timeout`, per spec.md §4.E / §7 ("recovered by re-enqueue via
    /// `send_later`, does not decrement retry count"). Skips the duplicate
    /// tracker: this is the same logical work item, not a fresh expansion
    /// competing for a slot, so re-checking it against its own earlier
    /// `message_id` would always find a match and silently swallow every
    /// retry.
    pub fn requeue_after_timeout(self: &Arc<Self>, mut msg: QueueMessage, priority: i64) {
        msg.header_mut().delayed = true;
        let router = Arc::clone(self);
        tokio::spawn(async move {
            router.send_inner(msg, priority, 0.0, 0.0, false).await;
        });
    }

    async fn send_inner(
        &self,
        mut msg: QueueMessage,
        priority: i64,
        delay_min: f64,
        delay_max: f64,
        check_duplicate: bool,
    ) {
        if let Some(cap) = self.config.worktime_cap {
            if self.started_at.elapsed() > cap && msg.destination() == QueueKind::Scraper {
                tracing::warn!(
                    message_id = %msg.header().message_id,
                    "scraping worktime cap reached, dropping message"
                );
                return;
            }
        }

        if self.config.debug_delay {
            tracing::debug!("debug delay enabled, sleeping 10s before sending message");
            tokio::time::sleep(Duration::from_secs(10)).await;
        }

        if msg.header().delayed {
            let wait = if delay_max > delay_min {
                rand::thread_rng().gen_range(delay_min..delay_max)
            } else {
                delay_min
            };
            tokio::time::sleep(Duration::from_secs_f64(wait.max(0.0))).await;
        }

        msg.header_mut().depth += 1;

        if check_duplicate && !msg.header().system_message {
            let key = msg.dedup_key();
            let mut seen = self.seen.lock().unwrap();
            if seen.contains(&key) {
                tracing::info!(message_id = %msg.header().message_id, "duplicate message detected, dropping");
                return;
            }
            seen.insert(key);
        }

        msg.header_mut().priority = priority;
        self.queue.enqueue(msg.header().clone(), msg);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Pops the next message in priority order. Exposed crate-wide for
    /// tests that need to inspect queued messages directly rather than
    /// through a `WorkQueue` dispatch.
    pub(crate) fn dequeue(&self) -> Option<(harvest_protocol::MessageHeader, QueueMessage)> {
        self.queue.dequeue()
    }
}
