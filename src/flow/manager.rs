//! Owns a pipeline for the duration of one run.

use anyhow::{Result, anyhow};
use log::{error, info, warn};
use serde::Serialize;
use std::{
    sync::{
        Arc, Condvar, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::filter::SlidingWindowMeanFilter;
use crate::flow::FlowError;
use crate::flow::graph::{FlowContext, NodeId, Value};
use crate::flow::pipeline::Pipeline;

const FPS_WINDOW: usize = 30;

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowStatus {
    pub running: bool,
    pub ticks: u64,
    pub fps: f64,
    pub last_error: Option<String>,
    pub nodes: usize,
}

struct RunState {
    status: FlowStatus,
    fps: SlidingWindowMeanFilter<f64>,
    produced: Vec<bool>,
    finished: bool,
}

struct Shared {
    state: Mutex<RunState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn begin(&self, nodes: usize) {
        let mut st = self.lock();
        st.status = FlowStatus {
            running: true,
            nodes,
            ..FlowStatus::default()
        };
        st.fps.reset();
        st.produced = vec![false; nodes];
        st.finished = false;
    }

    fn record_tick(&self, pipeline: &Pipeline, dt: Duration) {
        let mut st = self.lock();
        st.status.ticks += 1;
        let secs = dt.as_secs_f64();
        if secs > 0.0 {
            st.fps.push(1.0 / secs);
            st.status.fps = st.fps.get();
        }
        for id in pipeline.graph.ids() {
            if pipeline.graph.has_output(id) {
                if let Some(flag) = st.produced.get_mut(id.index()) {
                    *flag = true;
                }
            }
        }
        drop(st);
        self.changed.notify_all();
    }

    fn finish(&self, result: &Result<()>) {
        let mut st = self.lock();
        st.status.running = false;
        st.finished = true;
        if let Err(e) = result {
            st.status.last_error = Some(format!("{e:#}"));
        }
        drop(st);
        self.changed.notify_all();
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<Result<()>>,
}

pub struct FlowManager {
    running: Arc<AtomicBool>,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl Default for FlowManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowManager {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            shared: Arc::new(Shared {
                state: Mutex::new(RunState {
                    status: FlowStatus::default(),
                    fps: SlidingWindowMeanFilter::new(FPS_WINDOW),
                    produced: Vec::new(),
                    finished: false,
                }),
                changed: Condvar::new(),
            }),
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> FlowStatus {
        self.shared.lock().status.clone()
    }

    /// Runs the pipeline on a worker thread until stopped or until it fails.
    pub fn start(&mut self, pipeline: Pipeline, ctx: FlowContext) -> Result<()> {
        if self.is_running() {
            return Err(FlowError::AlreadyRunning.into());
        }
        if let Some(old) = self.worker.take() {
            // previous run ended on its own
            if let Ok(Err(e)) = old.done.try_recv() {
                warn!("previous flow run failed: {e:#}");
            }
            let _ = old.handle.join();
        }

        self.shared.begin(pipeline.graph.len());
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let shared = self.shared.clone();
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("handctl-flow".into())
            .spawn(move || {
                let mut pipeline = pipeline;
                let mut ctx = ctx;
                let res = run_loop(&mut pipeline, &mut ctx, &running, &shared);
                let _ = tx.send(res);
            });
        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                let res = Err(anyhow!("failed to spawn flow thread: {e}"));
                self.shared.finish(&res);
                return res;
            }
        };
        self.worker = Some(Worker { handle, done: rx });
        info!("flow: started");
        Ok(())
    }

    /// Same loop on the calling thread; returns when the source ends, a node
    /// fails, or [`stop_handle`](Self::stop_handle) is cleared.
    pub fn run_blocking(&mut self, mut pipeline: Pipeline, mut ctx: FlowContext) -> Result<()> {
        if self.is_running() {
            return Err(FlowError::AlreadyRunning.into());
        }
        self.shared.begin(pipeline.graph.len());
        self.running.store(true, Ordering::SeqCst);
        run_loop(&mut pipeline, &mut ctx, &self.running, &self.shared)
    }

    /// Clearing this flag asks the running loop to stop after the current tick.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Stops the worker and returns the run's result.
    pub fn stop(&mut self, timeout: Duration) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Err(FlowError::NotRunning.into());
        };
        self.running.store(false, Ordering::SeqCst);
        match worker.done.recv_timeout(timeout) {
            Ok(res) => {
                let _ = worker.handle.join();
                info!("flow: stopped");
                res
            }
            Err(RecvTimeoutError::Timeout) => {
                self.worker = Some(worker);
                Err(FlowError::StopTimeout(timeout.as_millis() as u64).into())
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
                let res = Err(anyhow!("flow worker panicked"));
                self.shared.finish(&res);
                res
            }
        }
    }

    /// Blocks until `node` has produced a value in the current run.
    pub fn wait_for_output(&self, node: NodeId, timeout: Duration) -> Result<(), FlowError> {
        let st = self.shared.lock();
        let (st, _) = self
            .shared
            .changed
            .wait_timeout_while(st, timeout, |s| {
                !s.produced.get(node.index()).copied().unwrap_or(false) && !s.finished
            })
            .unwrap_or_else(|p| p.into_inner());
        if st.produced.get(node.index()).copied().unwrap_or(false) {
            Ok(())
        } else if st.finished {
            Err(FlowError::NotRunning)
        } else {
            Err(FlowError::OutputTimeout(node, timeout.as_millis() as u64))
        }
    }
}

impl Drop for FlowManager {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn run_loop(
    pipeline: &mut Pipeline,
    ctx: &mut FlowContext,
    running: &AtomicBool,
    shared: &Shared,
) -> Result<()> {
    let mut result = pipeline
        .graph
        .init(ctx)
        .and_then(|_| tick_loop(pipeline, ctx, running, shared));
    pipeline.graph.clean_effect(ctx);
    ctx.cursor.release();
    running.store(false, Ordering::SeqCst);

    if let Err(e) = &result {
        if e.downcast_ref::<FlowError>() == Some(&FlowError::SourceEnded) {
            info!("flow: source ended");
            result = Ok(());
        } else {
            error!("flow stopped: {e:#}");
        }
    }
    shared.finish(&result);
    result
}

fn tick_loop(
    pipeline: &mut Pipeline,
    ctx: &mut FlowContext,
    running: &AtomicBool,
    shared: &Shared,
) -> Result<()> {
    let start = pipeline.start();
    let mut last = Instant::now();
    while running.load(Ordering::SeqCst) {
        ctx.begin_tick();
        pipeline.graph.run(start, Value::Tick, ctx)?;
        let now = Instant::now();
        shared.record_tick(pipeline, now - last);
        last = now;
    }
    Ok(())
}
