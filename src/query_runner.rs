// ==============================================================================
// query_runner.rs - Query Runners and Executor
// ==============================================================================
// Description: Runs backend query runners on a bounded blocking pool and
//              streams their decoded results to one consuming thread
// Author: Matt Barham
// Created: 2025-11-21
// Modified: 2025-11-29
// Version: 1.0.0
// ==============================================================================
// Results are interleaved in completion order. Within a runner the backend
// order is kept; across runners no order is guaranteed.
//
// QueryResult is a blocking iterator for synchronous callers. Closing it (or
// dropping it) cancels every runner and waits for them to release their
// files and connections.
// ==============================================================================

use std::time::Instant;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::storage::StorageError;

/// Results buffered between runners and the consumer
pub const RESULT_QUEUE_CAPACITY: usize = 256;

/// A unit of backend work producing decoded records
pub trait QueryRunner<T>: Send {
    /// Name used in log messages
    fn name(&self) -> &str;

    /// Produce records into `sink` until done or `sink` reports closed
    fn run(&mut self, sink: &RunnerSink<T>) -> Result<(), StorageError>;
}

/// Output side handed to a running runner
pub struct RunnerSink<T> {
    sender: mpsc::Sender<T>,
    token: CancellationToken,
}

impl<T> RunnerSink<T> {
    /// Send one record; `false` once the query is closed
    pub fn send(&self, item: T) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.sender.blocking_send(item).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.sender.is_closed()
    }
}

/// Bounded worker pool shared by all queries of one dataset
pub struct QueryExecutor {
    runtime: Runtime,
    workers: usize,
}

impl QueryExecutor {
    pub fn new(workers: usize) -> Result<Self, std::io::Error> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name("variant-store-runner")
            .enable_all()
            .build()?;
        Ok(Self { runtime, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start every runner and return the merged stream of their output
    pub fn execute<T: Send + 'static>(&self, runners: Vec<Box<dyn QueryRunner<T>>>) -> QueryResult<T> {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(RESULT_QUEUE_CAPACITY);
        let token = CancellationToken::new();
        info!("Query {} started with {} runners", id, runners.len());

        let handles = runners
            .into_iter()
            .map(|mut runner| {
                let sink = RunnerSink { sender: sender.clone(), token: token.clone() };
                self.runtime.spawn_blocking(move || {
                    if sink.is_closed() {
                        debug!("Runner {} skipped, query closed", runner.name());
                        return;
                    }
                    debug!("Runner {} started", runner.name());
                    match runner.run(&sink) {
                        Ok(()) if sink.is_closed() => debug!("Runner {} closed early", runner.name()),
                        Ok(()) => debug!("Runner {} done", runner.name()),
                        Err(StorageError::NoConnectionAvailable(message)) => {
                            warn!("Runner {} gave up waiting for a connection: {}", runner.name(), message)
                        }
                        Err(e) => error!("Runner {} failed: {}", runner.name(), e),
                    }
                })
            })
            .collect();

        QueryResult {
            id,
            receiver,
            token,
            handles,
            handle: self.runtime.handle().clone(),
            started: Instant::now(),
            received: 0,
            closed: false,
        }
    }
}

/// Blocking iterator over the records of all runners of one query
pub struct QueryResult<T> {
    id: Uuid,
    receiver: mpsc::Receiver<T>,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    handle: Handle,
    started: Instant,
    received: usize,
    closed: bool,
}

impl<T> QueryResult<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Cancel outstanding runners and wait for them to finish
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.token.cancel();
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}

        for handle in self.handles.drain(..) {
            if let Err(e) = self.handle.block_on(handle) {
                error!("Query {} runner panicked: {}", self.id, e);
            }
        }
        info!(
            "Query {} closed after {} records in {:.3}s",
            self.id,
            self.received,
            self.started.elapsed().as_secs_f64()
        );
    }
}

impl<T> Iterator for QueryResult<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.closed {
            return None;
        }
        // every sender lives in a runner; the channel ends when all are done
        match self.receiver.blocking_recv() {
            Some(item) => {
                self.received += 1;
                Some(item)
            }
            None => {
                self.close();
                None
            }
        }
    }
}

impl<T> Drop for QueryResult<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRunner {
        name: String,
        values: Vec<u32>,
        fail_after: Option<usize>,
        finished: Arc<AtomicUsize>,
    }

    impl CountingRunner {
        fn new(name: &str, values: Vec<u32>, finished: &Arc<AtomicUsize>) -> Box<dyn QueryRunner<u32>> {
            Box::new(Self { name: name.to_string(), values, fail_after: None, finished: finished.clone() })
        }
    }

    impl QueryRunner<u32> for CountingRunner {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(&mut self, sink: &RunnerSink<u32>) -> Result<(), StorageError> {
            for (index, value) in self.values.iter().enumerate() {
                if self.fail_after == Some(index) {
                    self.finished.fetch_add(1, Ordering::SeqCst);
                    return Err(StorageError::InvalidData("broken record".to_string()));
                }
                if !sink.send(*value) {
                    break;
                }
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct EndlessRunner {
        stopped: Arc<AtomicBool>,
    }

    impl QueryRunner<u32> for EndlessRunner {
        fn name(&self) -> &str {
            "endless"
        }

        fn run(&mut self, sink: &RunnerSink<u32>) -> Result<(), StorageError> {
            let mut value = 0;
            while sink.send(value) {
                value += 1;
            }
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_merges_all_runners() {
        let executor = QueryExecutor::new(2).unwrap();
        let finished = Arc::new(AtomicUsize::new(0));
        let runners = vec![
            CountingRunner::new("a", vec![1, 2, 3], &finished),
            CountingRunner::new("b", vec![10, 20], &finished),
            CountingRunner::new("c", vec![], &finished),
        ];
        let values: BTreeSet<u32> = executor.execute(runners).collect();
        assert_eq!(values, BTreeSet::from([1, 2, 3, 10, 20]));
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_failing_runner_does_not_stop_others() {
        let executor = QueryExecutor::new(4).unwrap();
        let finished = Arc::new(AtomicUsize::new(0));
        let failing = Box::new(CountingRunner {
            name: "failing".to_string(),
            values: vec![100, 200, 300],
            fail_after: Some(1),
            finished: finished.clone(),
        });
        let runners: Vec<Box<dyn QueryRunner<u32>>> = vec![failing, CountingRunner::new("ok", vec![1, 2], &finished)];
        let values: BTreeSet<u32> = executor.execute(runners).collect();
        // the failing runner yields what it produced before the error
        assert_eq!(values, BTreeSet::from([1, 2, 100]));
    }

    #[test]
    fn test_close_stops_endless_runner() {
        let executor = QueryExecutor::new(1).unwrap();
        let stopped = Arc::new(AtomicBool::new(false));
        let runners: Vec<Box<dyn QueryRunner<u32>>> = vec![Box::new(EndlessRunner { stopped: stopped.clone() })];
        let mut result = executor.execute(runners);
        let first: Vec<u32> = result.by_ref().take(5).collect();
        assert_eq!(first, vec![0, 1, 2, 3, 4]);

        result.close();
        assert!(result.is_closed());
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(result.next(), None);
    }

    #[test]
    fn test_drop_releases_runners() {
        let executor = QueryExecutor::new(1).unwrap();
        let stopped = Arc::new(AtomicBool::new(false));
        {
            let runners: Vec<Box<dyn QueryRunner<u32>>> = vec![Box::new(EndlessRunner { stopped: stopped.clone() })];
            let mut result = executor.execute(runners);
            assert_eq!(result.next(), Some(0));
        }
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_queued_runners_skip_after_close() {
        // one worker: the second runner is still queued when the query closes
        let executor = QueryExecutor::new(1).unwrap();
        let stopped = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicUsize::new(0));
        let runners: Vec<Box<dyn QueryRunner<u32>>> = vec![
            Box::new(EndlessRunner { stopped: stopped.clone() }),
            CountingRunner::new("queued", vec![1], &finished),
        ];
        let mut result = executor.execute(runners);
        assert_eq!(result.next(), Some(0));
        result.close();
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
