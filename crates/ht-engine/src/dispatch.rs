//! Job dispatch.
//!
//! [`SerialDispatcher`] runs a batch on the caller's runner. [`WorkerPool`]
//! spreads it over worker threads that each own a runner built inside the
//! thread; the driver and the workers only talk through channels: one task
//! channel per worker and a shared completion channel.
//!
//! Both dispatchers take jobs from the end of the batch and fail fast: the
//! first failing job stops the hand-out, in-flight jobs are drained and the
//! failure is returned.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use ht_types::{internal_error, DispatchError, HtError, HtResult, Job};
use tracing::{debug, info, warn};

use crate::runner::JobRunner;

const DRIVER_CONTEXT: &str = "driver";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Leave pool workers waiting for the next batch instead of terminating them.
    pub keep_workers_alive: bool,
    /// Let the driver thread run a share of the jobs itself.
    pub server_participates: bool,
}

/// Blocks until every job of the batch ran exactly once.
pub trait Dispatcher {
    fn dispatch(&mut self, jobs: Vec<Job>, runner: &mut dyn JobRunner, options: DispatchOptions) -> HtResult<()>;

    fn name(&self) -> &str;
}

fn job_failed(job: &Job, context: &str, message: String) -> DispatchError {
    DispatchError::JobFailed {
        dataset_id: job.dataset_id.clone(),
        run_index: job.run_index,
        context: context.to_string(),
        message,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Run one job, turning errors and panics into a message.
fn run_guarded<R: JobRunner + ?Sized>(runner: &mut R, job: &Job) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| runner.execute(job))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload)),
    }
}

// ---- Serial dispatch ----

/// Runs every job on the driver thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialDispatcher;

impl Dispatcher for SerialDispatcher {
    fn dispatch(&mut self, mut jobs: Vec<Job>, runner: &mut dyn JobRunner, _options: DispatchOptions) -> HtResult<()> {
        while let Some(job) = jobs.pop() {
            run_guarded(runner, &job).map_err(|message| job_failed(&job, DRIVER_CONTEXT, message))?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "serial"
    }
}

// ---- Worker pool ----

enum Task {
    Run(Job),
    Terminate,
}

struct Completion {
    worker: usize,
    dataset_id: String,
    run_index: u32,
    result: Result<(), String>,
}

/// Fixed pool of worker threads fed over channels.
pub struct WorkerPool {
    task_txs: Vec<Sender<Task>>,
    done_rx: Receiver<Completion>,
    handles: Vec<JoinHandle<()>>,
    released: bool,
}

impl WorkerPool {
    /// Start `n_workers` threads. Worker `i` builds its runner with
    /// `factory(i)` inside its own thread; a runner that cannot be built,
    /// including one whose factory panics, fails every job sent to that worker.
    pub fn spawn<F, R>(n_workers: usize, factory: F) -> HtResult<Self>
    where
        F: Fn(usize) -> HtResult<R> + Send + Sync + 'static,
        R: JobRunner + 'static,
    {
        if n_workers == 0 {
            return Err(DispatchError::EmptyPool.into());
        }

        let factory = Arc::new(factory);
        let (done_tx, done_rx) = unbounded();
        let mut task_txs = Vec::with_capacity(n_workers);
        let mut handles = Vec::with_capacity(n_workers);

        for worker in 0..n_workers {
            let (task_tx, task_rx) = unbounded();
            let done_tx = done_tx.clone();
            let factory = Arc::clone(&factory);
            let handle = thread::Builder::new()
                .name(format!("ht-worker-{}", worker + 1))
                .spawn(move || {
                    let runner = match panic::catch_unwind(AssertUnwindSafe(|| factory(worker))) {
                        Ok(Ok(runner)) => Ok(runner),
                        Ok(Err(e)) => Err(format!("runner construction failed: {e}")),
                        Err(payload) => Err(format!("runner construction {}", panic_message(payload))),
                    };
                    worker_loop(worker, runner, task_rx, done_tx);
                })?;
            task_txs.push(task_tx);
            handles.push(handle);
        }

        info!("Started worker pool with {} workers", n_workers);
        Ok(Self {
            task_txs,
            done_rx,
            handles,
            released: false,
        })
    }

    pub fn n_workers(&self) -> usize {
        self.task_txs.len()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Send the terminate token to every worker and join the threads.
    pub fn release(&mut self) -> HtResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        for tx in &self.task_txs {
            // A worker that already exited has nothing left to stop.
            let _ = tx.send(Task::Terminate);
        }
        let mut panicked = 0;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(internal_error!("{panicked} worker threads panicked outside a job"));
        }

        info!("Released {} workers", self.task_txs.len());
        Ok(())
    }

    fn send(&self, worker: usize, job: Job) -> Result<(), DispatchError> {
        debug!(worker = worker + 1, job = %job.label(), "sending job");
        self.task_txs[worker]
            .send(Task::Run(job))
            .map_err(|_| DispatchError::WorkerUnreachable { worker: worker + 1 })
    }

    fn recv(&self, in_flight: usize) -> Result<Completion, DispatchError> {
        self.done_rx
            .recv()
            .map_err(|_| DispatchError::Disconnected { in_flight })
    }
}

fn worker_loop<R: JobRunner>(
    worker: usize,
    mut runner: Result<R, String>,
    tasks: Receiver<Task>,
    done: Sender<Completion>,
) {
    while let Ok(task) = tasks.recv() {
        let job = match task {
            Task::Run(job) => job,
            Task::Terminate => break,
        };

        let result = match runner.as_mut() {
            Ok(runner) => run_guarded(runner, &job),
            Err(message) => Err(message.clone()),
        };
        if let Err(message) = &result {
            warn!(worker = worker + 1, job = %job.label(), "job failed: {}", message);
        }

        let completion = Completion {
            worker,
            dataset_id: job.dataset_id,
            run_index: job.run_index,
            result,
        };
        if done.send(completion).is_err() {
            break;
        }
    }
    debug!(worker = worker + 1, "worker exiting");
}

impl Dispatcher for WorkerPool {
    fn dispatch(&mut self, mut jobs: Vec<Job>, runner: &mut dyn JobRunner, options: DispatchOptions) -> HtResult<()> {
        if self.released {
            return Err(DispatchError::PoolReleased.into());
        }

        let n_proc = self.n_workers() + 1;
        let mut in_flight = 0usize;
        let mut failure: Option<DispatchError> = None;

        // One job per worker to start with.
        for worker in 0..self.n_workers() {
            let Some(job) = jobs.pop() else { break };
            match self.send(worker, job) {
                Ok(()) => in_flight += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if options.server_participates && failure.is_none() {
            if let Some(job) = jobs.pop() {
                if let Err(message) = run_guarded(runner, &job) {
                    failure = Some(job_failed(&job, DRIVER_CONTEXT, message));
                }
            }
        }

        let mut n_sent = 0usize;
        while failure.is_none() {
            let Some(job) = jobs.pop() else { break };

            if options.server_participates && n_sent % n_proc == n_proc - 1 {
                n_sent += 1;
                if let Err(message) = run_guarded(runner, &job) {
                    failure = Some(job_failed(&job, DRIVER_CONTEXT, message));
                }
                continue;
            }

            let completion = self.recv(in_flight)?;
            in_flight -= 1;
            if let Err(message) = completion.result {
                failure = Some(DispatchError::JobFailed {
                    dataset_id: completion.dataset_id,
                    run_index: completion.run_index,
                    context: format!("worker-{}", completion.worker + 1),
                    message,
                });
                break;
            }

            match self.send(completion.worker, job) {
                Ok(()) => {
                    in_flight += 1;
                    n_sent += 1;
                }
                Err(e) => failure = Some(e),
            }
        }

        while in_flight > 0 {
            let completion = self.recv(in_flight)?;
            in_flight -= 1;
            if let Err(message) = completion.result {
                if failure.is_none() {
                    failure = Some(DispatchError::JobFailed {
                        dataset_id: completion.dataset_id,
                        run_index: completion.run_index,
                        context: format!("worker-{}", completion.worker + 1),
                        message,
                    });
                }
            }
        }

        if !options.keep_workers_alive {
            self.release()?;
        }

        match failure {
            Some(e) => Err(HtError::from(e)),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "pool"
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Worker pool shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ht_types::{ParameterSet, ParameterValue};
    use std::collections::HashMap;

    /// Dataset, run and serialized parameter vector of an executed job.
    type Record = (String, u32, String);

    /// Reports every executed job over a channel.
    struct RecordingRunner {
        tx: Sender<Record>,
        fail_on: Option<(String, u32)>,
        panic_on: Option<(String, u32)>,
    }

    impl RecordingRunner {
        fn new(tx: Sender<Record>) -> Self {
            Self {
                tx,
                fail_on: None,
                panic_on: None,
            }
        }
    }

    impl JobRunner for RecordingRunner {
        fn execute(&mut self, job: &Job) -> HtResult<()> {
            let key = (job.dataset_id.clone(), job.run_index);
            if self.panic_on.as_ref() == Some(&key) {
                panic!("boom on {}", job.label());
            }
            if self.fail_on.as_ref() == Some(&key) {
                return Err(internal_error!("cannot evaluate {}", job.label()));
            }
            self.tx
                .send(record(job))
                .map_err(|e| internal_error!("{e}"))
        }
    }

    fn record(job: &Job) -> Record {
        let params = serde_json::to_string(&job.parameters).unwrap_or_default();
        (job.dataset_id.clone(), job.run_index, params)
    }

    /// Two parameter vectors, each crossed with every dataset and run.
    fn batch(datasets: &[&str], n_run: u32) -> Vec<Job> {
        let names: Vec<String> = datasets.iter().map(|s| s.to_string()).collect();
        [0.25, 0.75]
            .iter()
            .flat_map(|x| {
                let mut params = ParameterSet::new();
                params.insert("mdl_x".into(), ParameterValue::Float(*x));
                Job::batch(&params, &names, n_run)
            })
            .collect()
    }

    fn counts(rx: &Receiver<Record>) -> HashMap<Record, usize> {
        let mut counts = HashMap::new();
        for key in rx.try_iter() {
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }

    fn merged(a: HashMap<Record, usize>, b: HashMap<Record, usize>) -> HashMap<Record, usize> {
        let mut all = a;
        for (key, n) in b {
            *all.entry(key).or_insert(0) += n;
        }
        all
    }

    fn expected(jobs: &[Job]) -> HashMap<Record, usize> {
        jobs.iter().map(|job| (record(job), 1)).collect()
    }

    fn pool(n_workers: usize, tx: &Sender<Record>) -> WorkerPool {
        let tx = tx.clone();
        WorkerPool::spawn(n_workers, move |_| Ok(RecordingRunner::new(tx.clone()))).unwrap()
    }

    #[test]
    fn serial_runs_every_job_once() {
        let (tx, rx) = unbounded();
        let jobs = batch(&["ace", "ptsd"], 3);
        let mut runner = RecordingRunner::new(tx);

        SerialDispatcher
            .dispatch(jobs.clone(), &mut runner, DispatchOptions::default())
            .unwrap();
        let order: Vec<Record> = rx.try_iter().collect();
        assert_eq!(order.first(), jobs.last().map(record).as_ref());
        assert_eq!(order.len(), jobs.len());
        assert_eq!(merged(HashMap::new(), order.into_iter().map(|r| (r, 1)).collect()), expected(&jobs));
    }

    #[test]
    fn pool_matches_serial_multiset() {
        for server_participates in [false, true] {
            let (tx, rx) = unbounded();
            let (local_tx, local_rx) = unbounded();
            let jobs = batch(&["ace", "ptsd", "wilson"], 4);
            let mut pool = pool(3, &tx);
            let mut local = RecordingRunner::new(local_tx);

            let options = DispatchOptions {
                keep_workers_alive: true,
                server_participates,
            };
            pool.dispatch(jobs.clone(), &mut local, options).unwrap();
            assert_eq!(merged(counts(&rx), counts(&local_rx)), expected(&jobs));

            // Workers stay usable across batches.
            pool.dispatch(jobs.clone(), &mut local, options).unwrap();
            assert_eq!(merged(counts(&rx), counts(&local_rx)), expected(&jobs));
            pool.release().unwrap();
        }
    }

    #[test]
    fn driver_runs_its_share_when_participating() {
        // 12 jobs over 3 workers: after the fan-out of 3 the driver runs one
        // job, then every 4th of the remaining 8 hand-outs.
        let jobs = batch(&["ace", "ptsd", "wilson"], 2);
        assert_eq!(jobs.len(), 12);

        for (server_participates, local_jobs) in [(true, 3), (false, 0)] {
            let (tx, rx) = unbounded();
            let (local_tx, local_rx) = unbounded();
            let mut pool = pool(3, &tx);
            let mut local = RecordingRunner::new(local_tx);

            let options = DispatchOptions {
                keep_workers_alive: false,
                server_participates,
            };
            pool.dispatch(jobs.clone(), &mut local, options).unwrap();

            let by_driver = counts(&local_rx);
            let by_workers = counts(&rx);
            assert_eq!(by_driver.values().sum::<usize>(), local_jobs);
            assert_eq!(by_workers.values().sum::<usize>(), 12 - local_jobs);
            assert_eq!(merged(by_workers, by_driver), expected(&jobs));
        }
    }

    #[test]
    fn small_batches_do_not_block() {
        let (tx, rx) = unbounded();
        let jobs = batch(&["ace"], 2);
        let mut pool = pool(5, &tx);
        let mut local = RecordingRunner::new(tx.clone());

        pool.dispatch(jobs.clone(), &mut local, DispatchOptions::default())
            .unwrap();
        assert_eq!(counts(&rx), expected(&jobs));
        assert!(pool.is_released());
    }

    #[test]
    fn empty_batch_releases_workers() {
        let (tx, _rx) = unbounded();
        let mut pool = pool(2, &tx);
        let mut local = RecordingRunner::new(tx.clone());

        pool.dispatch(Vec::new(), &mut local, DispatchOptions::default())
            .unwrap();
        assert!(pool.is_released());

        let err = pool
            .dispatch(batch(&["ace"], 1), &mut local, DispatchOptions::default())
            .unwrap_err();
        assert!(matches!(err, HtError::Dispatch(DispatchError::PoolReleased)));
    }

    #[test]
    fn worker_failure_aborts_batch() {
        let (tx, _rx) = unbounded();
        let worker_tx = tx.clone();
        let mut pool = WorkerPool::spawn(2, move |_| {
            let mut runner = RecordingRunner::new(worker_tx.clone());
            runner.fail_on = Some(("ace".to_string(), 1));
            Ok(runner)
        })
        .unwrap();
        let mut local = RecordingRunner::new(tx);

        let err = pool
            .dispatch(batch(&["ace"], 4), &mut local, DispatchOptions::default())
            .unwrap_err();
        match err {
            HtError::Dispatch(DispatchError::JobFailed {
                dataset_id,
                run_index,
                message,
                ..
            }) => {
                assert_eq!(dataset_id, "ace");
                assert_eq!(run_index, 1);
                assert!(message.contains("cannot evaluate"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(pool.is_released());
    }

    #[test]
    fn worker_panic_is_reported() {
        let (tx, _rx) = unbounded();
        let worker_tx = tx.clone();
        let mut pool = WorkerPool::spawn(1, move |_| {
            let mut runner = RecordingRunner::new(worker_tx.clone());
            runner.panic_on = Some(("ace".to_string(), 0));
            Ok(runner)
        })
        .unwrap();
        let mut local = RecordingRunner::new(tx);

        let err = pool
            .dispatch(batch(&["ace"], 1), &mut local, DispatchOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("boom on ace/run 0"));
    }

    #[test]
    fn serial_failure_names_the_driver() {
        let (tx, _rx) = unbounded();
        let mut runner = RecordingRunner::new(tx);
        runner.fail_on = Some(("ace".to_string(), 0));

        let err = SerialDispatcher
            .dispatch(batch(&["ace"], 2), &mut runner, DispatchOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("driver"));
    }

    #[test]
    fn failed_factory_fails_jobs() {
        let mut pool =
            WorkerPool::spawn(1, |_| -> HtResult<RecordingRunner> { Err(internal_error!("no data dir")) }).unwrap();
        let (tx, _rx) = unbounded();
        let mut local = RecordingRunner::new(tx);

        let err = pool
            .dispatch(batch(&["ace"], 1), &mut local, DispatchOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("no data dir"));

        let empty = WorkerPool::spawn(0, |_| -> HtResult<RecordingRunner> { Err(internal_error!("unused")) });
        assert!(matches!(empty, Err(HtError::Dispatch(DispatchError::EmptyPool))));
    }

    #[test]
    fn panicking_factory_fails_jobs_instead_of_hanging() {
        let (tx, _rx) = unbounded();
        let worker_tx = tx.clone();
        let mut pool = WorkerPool::spawn(2, move |worker| {
            if worker == 0 {
                panic!("cannot open dataset directory");
            }
            Ok(RecordingRunner::new(worker_tx.clone()))
        })
        .unwrap();
        let mut local = RecordingRunner::new(tx);

        let err = pool
            .dispatch(batch(&["ace"], 3), &mut local, DispatchOptions::default())
            .unwrap_err();
        match err {
            HtError::Dispatch(DispatchError::JobFailed { context, message, .. }) => {
                assert_eq!(context, "worker-1");
                assert!(message.contains("cannot open dataset directory"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(pool.is_released());
    }
}
