//! Job graph layer on top of `choir`.
//!
//! Long-running work is expressed as [`Job`] state machines that the
//! scheduler steps until they report [`JobStatus::Done`]. Jobs and plain
//! callbacks are composed into [`JobBatch`]es, which chain and merge the
//! way stages of a frame graph do.

use parking_lot::Mutex;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, strum::AsRefStr)]
pub enum JobPriority {
    CoreRenderStageResources,
    CreateRenderMesh,
    LoadMeshData,
    CloneMeshData,
    FileChangeDetection,
    DeallocateResources,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
    /// Step again right away.
    Continue,
    /// Yield to the scheduler and get stepped again later.
    TryRequeue,
    /// Park until the [`Signal`] obtained from the context is raised.
    AwaitExternalSignal,
    Done,
}

pub trait Job: Send + 'static {
    fn step(&mut self, context: &JobContext) -> JobStatus;
}

impl<F: FnMut(&JobContext) -> JobStatus + Send + 'static> Job for F {
    fn step(&mut self, context: &JobContext) -> JobStatus {
        self(context)
    }
}

const RUNNING: u8 = 0;
const PARKED: u8 = 1;
const SIGNALED: u8 = 2;

struct Driver {
    name: String,
    priority: JobPriority,
    choir: Arc<choir::Choir>,
    job: Mutex<Box<dyn Job>>,
    state: AtomicU8,
    finish: Arc<Gate>,
}

impl Driver {
    fn spawn(self: &Arc<Self>) -> choir::IdleTask {
        let driver = Arc::clone(self);
        self.choir.spawn(self.name.clone()).init(move |_| driver.execute())
    }

    fn execute(self: Arc<Self>) {
        profiling::scope!("Job step");
        let context = JobContext { driver: &self };
        let mut job = self.job.lock();
        loop {
            match job.step(&context) {
                JobStatus::Continue => {}
                JobStatus::TryRequeue => {
                    drop(job);
                    std::thread::yield_now();
                    let _ = self.spawn().run();
                    return;
                }
                JobStatus::AwaitExternalSignal => {
                    match self
                        .state
                        .compare_exchange(RUNNING, PARKED, Ordering::AcqRel, Ordering::Acquire)
                    {
                        Ok(_) => return,
                        // the signal arrived while we were still stepping
                        Err(_) => self.state.store(RUNNING, Ordering::Release),
                    }
                }
                JobStatus::Done => {
                    log::debug!("Job '{}' is done", self.name);
                    drop(job);
                    self.finish.open();
                    return;
                }
            }
        }
    }

    fn raise(self: &Arc<Self>) {
        loop {
            match self
                .state
                .compare_exchange(PARKED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    let _ = self.spawn().run();
                    return;
                }
                Err(SIGNALED) => return,
                Err(_) => {
                    if self
                        .state
                        .compare_exchange(RUNNING, SIGNALED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
            }
        }
    }
}

pub struct JobContext<'a> {
    driver: &'a Arc<Driver>,
}

impl JobContext<'_> {
    pub fn name(&self) -> &str {
        &self.driver.name
    }

    pub fn priority(&self) -> JobPriority {
        self.driver.priority
    }

    /// Handle to wake this job up after it returns [`JobStatus::AwaitExternalSignal`].
    ///
    /// A signal raised before the job parks is remembered, so the next
    /// await returns immediately. Do not store the signal inside the job
    /// itself, hand it to whoever completes the external work.
    pub fn signal(&self) -> Signal {
        Signal(Arc::clone(self.driver))
    }
}

#[derive(Clone)]
pub struct Signal(Arc<Driver>);

impl Signal {
    pub fn raise(&self) {
        self.0.raise()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Signal({})", self.0.name)
    }
}

#[derive(Default)]
struct GateState {
    idle: Option<choir::IdleTask>,
    running: Option<choir::RunningTask>,
}

/// Stage that subsequent work can depend on, released with [`Gate::open`].
pub struct Gate {
    name: String,
    state: Mutex<GateState>,
}

impl Gate {
    fn closed(choir: &Arc<choir::Choir>, name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(GateState {
                idle: Some(choir.spawn(name.to_string()).init_dummy()),
                running: None,
            }),
        })
    }

    fn opened(name: &str, task: choir::RunningTask) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(GateState {
                idle: None,
                running: Some(task),
            }),
        })
    }

    /// Returns `false` if the gate was already open.
    pub fn open(&self) -> bool {
        let mut state = self.state.lock();
        match state.idle.take() {
            Some(task) => {
                state.running = Some(task.run());
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().idle.is_none()
    }

    fn precede(&self, task: &mut choir::IdleTask) {
        let state = self.state.lock();
        if let Some(ref idle) = state.idle {
            task.depend_on(idle);
        } else if let Some(ref running) = state.running {
            task.depend_on(running);
        }
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Gate({}, open: {})", self.name, self.is_open())
    }
}

struct Stages {
    choir: Arc<choir::Choir>,
    start: choir::IdleTask,
    finish: Arc<Gate>,
}

/// A group of jobs between a start stage and a finish stage.
///
/// Nothing in the batch runs until it is queued. The default batch is
/// empty and queueing it is a no-op.
#[derive(Default)]
#[must_use]
pub struct JobBatch {
    stages: Option<Stages>,
}

impl fmt::Debug for JobBatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.stages {
            Some(ref stages) => write!(f, "JobBatch({:?})", stages.finish),
            None => write!(f, "JobBatch(empty)"),
        }
    }
}

impl JobBatch {
    pub fn is_empty(&self) -> bool {
        self.stages.is_none()
    }

    /// Queue `next` as the new finished stage: it starts once `self` has finished.
    pub fn then(self, next: JobBatch) -> JobBatch {
        let stages = match (self.stages, next.stages) {
            (None, stages) | (stages, None) => stages,
            (Some(first), Some(mut second)) => {
                first.finish.precede(&mut second.start);
                let _ = second.start.run();
                Some(Stages {
                    choir: first.choir,
                    start: first.start,
                    finish: second.finish,
                })
            }
        };
        JobBatch { stages }
    }

    /// Run both batches side by side, between a shared start and finish.
    pub fn merge(self, other: JobBatch) -> JobBatch {
        let stages = match (self.stages, other.stages) {
            (None, stages) | (stages, None) => stages,
            (Some(mut a), Some(mut b)) => {
                let start = a.choir.spawn("merged start").init_dummy();
                a.start.depend_on(&start);
                b.start.depend_on(&start);
                let _ = a.start.run();
                let _ = b.start.run();
                let mut join = a.choir.spawn("merged finish").init_dummy();
                a.finish.precede(&mut join);
                b.finish.precede(&mut join);
                Some(Stages {
                    finish: Gate::opened("merged finish", join.run()),
                    choir: a.choir,
                    start,
                })
            }
        };
        JobBatch { stages }
    }

    /// Release the batch. The returned task finishes with the batch.
    pub fn queue(self) -> Option<choir::RunningTask> {
        let stages = self.stages?;
        let mut done = stages.choir.spawn("batch finished").init_dummy();
        stages.finish.precede(&mut done);
        let _ = stages.start.run();
        Some(done.run())
    }

    /// Queue the batch and block until it has finished.
    pub fn wait(self) {
        if let Some(task) = self.queue() {
            let _ = task.join();
        }
    }
}

/// Entry point for building job batches.
#[derive(Clone)]
pub struct Scheduler {
    choir: Arc<choir::Choir>,
}

impl Scheduler {
    pub fn new(choir: &Arc<choir::Choir>) -> Self {
        Self {
            choir: Arc::clone(choir),
        }
    }

    pub fn choir(&self) -> &Arc<choir::Choir> {
        &self.choir
    }

    /// Wrap a state-machine job into a batch. The batch finishes when the
    /// job reports [`JobStatus::Done`].
    pub fn job(&self, name: &str, priority: JobPriority, job: impl Job) -> JobBatch {
        log::trace!("Creating job '{}' with {} priority", name, priority.as_ref());
        let finish = Gate::closed(&self.choir, name);
        let driver = Arc::new(Driver {
            name: name.to_string(),
            priority,
            choir: Arc::clone(&self.choir),
            job: Mutex::new(Box::new(job)),
            state: AtomicU8::new(RUNNING),
            finish: Arc::clone(&finish),
        });
        let start = self.choir.spawn("job start").init_dummy();
        let mut first = driver.spawn();
        first.depend_on(&start);
        let _ = first.run();
        JobBatch {
            stages: Some(Stages {
                choir: Arc::clone(&self.choir),
                start,
                finish,
            }),
        }
    }

    /// One-shot callback batch.
    pub fn callback(
        &self,
        name: &str,
        priority: JobPriority,
        fun: impl FnOnce() + Send + 'static,
    ) -> JobBatch {
        log::trace!("Creating callback '{}' with {} priority", name, priority.as_ref());
        let start = self.choir.spawn("callback start").init_dummy();
        let mut task = self.choir.spawn(name.to_string()).init(move |_| fun());
        task.depend_on(&start);
        JobBatch {
            stages: Some(Stages {
                choir: Arc::clone(&self.choir),
                start,
                finish: Gate::opened(name, task.run()),
            }),
        }
    }

    /// A closed gate, used as an intermediate stage opened from the outside.
    pub fn gate(&self, name: &str) -> Arc<Gate> {
        Gate::closed(&self.choir, name)
    }

    /// Batch that finishes once it was started and `gate` is open.
    pub fn after(&self, gate: &Gate) -> JobBatch {
        let start = self.choir.spawn("stage start").init_dummy();
        let mut join = self.choir.spawn(gate.name.clone()).init_dummy();
        join.depend_on(&start);
        gate.precede(&mut join);
        JobBatch {
            stages: Some(Stages {
                choir: Arc::clone(&self.choir),
                start,
                finish: Gate::opened(&gate.name, join.run()),
            }),
        }
    }
}
