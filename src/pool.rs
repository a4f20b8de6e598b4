use crate::error::{AnalysisError, Result};
use log::debug;

/// Fixed-size worker pool for independent per-run tasks.
///
/// Every task sends `(key, result)` over a completion channel; results arrive in
/// completion order, so callers must aggregate by key, never by position.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// `workers = None` uses one thread per available core.
    pub fn new(workers: Option<usize>) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("nbody-worker-{}", i));
        if let Some(n) = workers {
            if n == 0 {
                return Err(AnalysisError::InvalidInput("worker count must be greater than 0".to_string()));
            }
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| AnalysisError::InvalidInput(format!("failed to build worker pool: {}", e)))?;
        debug!("Worker pool started with {} threads", pool.current_num_threads());
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `task` once per input on the pool and calls `on_complete` on the
    /// calling thread as each result arrives.
    ///
    /// Must not be called from inside this pool's own workers.
    pub fn execute<K, T, R, F, O>(&self, tasks: Vec<(K, T)>, task: F, mut on_complete: O) -> Vec<(K, R)>
    where
        K: Send,
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
        O: FnMut(&K, &R),
    {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut completed = Vec::with_capacity(tasks.len());
        let task = &task;

        self.pool.in_place_scope(|scope| {
            for (key, input) in tasks {
                let sender = sender.clone();
                scope.spawn(move |_| {
                    let result = task(input);
                    // The receiver lives until every sender is dropped
                    let _ = sender.send((key, result));
                });
            }
            drop(sender);

            for (key, result) in receiver.iter() {
                on_complete(&key, &result);
                completed.push((key, result));
            }
        });

        completed
    }

    pub fn run_all<K, T, R, F>(&self, tasks: Vec<(K, T)>, task: F) -> Vec<(K, R)>
    where
        K: Send,
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        self.execute(tasks, task, |_, _| {})
    }
}
