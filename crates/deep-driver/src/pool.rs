//! 工作线程池
//!
//! 固定数量的工作线程从有界队列中取任务执行。任务是自包含的 `FnOnce`，
//! 结果以 [`TaskEvent`] 的形式发布；任务中的 panic 被捕获并转换为失败事件。

use crate::error::{SchedulerError, TaskFailure};
use crate::events::EventBus;
use crate::thread::{JOIN_TIMEOUT, JoinTimeout};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, error, trace, warn};

/// 任务返回值
pub type TaskResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// 任务完成事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Completed { task_id: String },
    Failed(TaskFailure),
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Completed { task_id } => task_id,
            Self::Failed(failure) => &failure.task_id,
        }
    }
}

/// 默认池大小：可用并行度减一，至少为 1
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// 工作线程池
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
    queue_capacity: usize,
    active: Arc<AtomicUsize>,
    events: Arc<EventBus<TaskEvent>>,
}

impl WorkerPool {
    /// 创建线程池
    ///
    /// # 参数
    /// - `size`: 工作线程数（0 按 1 处理）
    /// - `queue_capacity`: 待执行任务队列容量
    pub fn new(size: usize, queue_capacity: usize) -> Result<Self, SchedulerError> {
        let size = size.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);
        let active = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let rx: Receiver<Job> = rx.clone();
            let active = active.clone();
            let handle = std::thread::Builder::new()
                .name(format!("deep-worker-{}", index))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                        active.fetch_sub(1, Ordering::AcqRel);
                    }
                    trace!("Worker {} exiting", index);
                })
                .map_err(|e| SchedulerError::Spawn(e.to_string()))?;
            workers.push(handle);
        }

        debug!("Worker pool started with {} thread(s)", size);
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            size,
            queue_capacity,
            active,
            events: Arc::new(EventBus::new(queue_capacity)),
        })
    }

    /// 按默认大小创建
    pub fn with_default_size() -> Result<Self, SchedulerError> {
        Self::new(default_pool_size(), 1024)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// 已提交但尚未完成的任务数
    pub fn pending_jobs(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn events(&self) -> &Arc<EventBus<TaskEvent>> {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// 提交裸任务（不发布结果事件，panic 仅记录日志）
    ///
    /// # 错误
    /// - `SchedulerError::PoolClosed`: 线程池已关闭
    /// - `SchedulerError::QueueFull`: 待执行队列已满
    pub fn execute<F>(&self, job: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let guarded = move || {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                error!("Pool job panicked: {}", panic_message(panic.as_ref()));
            }
        };
        self.enqueue(Box::new(guarded))
    }

    /// 提交带 ID 的任务，结果发布为 [`TaskEvent`]
    pub fn submit<F>(&self, task_id: impl Into<String>, task: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let task_id = task_id.into();
        let events = self.events.clone();
        let job = move || {
            let event = match catch_unwind(AssertUnwindSafe(task)) {
                Ok(Ok(())) => TaskEvent::Completed { task_id },
                Ok(Err(e)) => {
                    warn!("Task {} failed: {}", task_id, e);
                    TaskEvent::Failed(TaskFailure {
                        task_id,
                        cause: e.to_string(),
                    })
                },
                Err(panic) => {
                    let cause = format!("panicked: {}", panic_message(panic.as_ref()));
                    error!("Task {} {}", task_id, cause);
                    TaskEvent::Failed(TaskFailure { task_id, cause })
                },
            };
            events.publish(event);
        };
        self.enqueue(Box::new(job))
    }

    fn enqueue(&self, job: Job) -> Result<(), SchedulerError> {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(SchedulerError::PoolClosed);
        };
        self.active.fetch_add(1, Ordering::AcqRel);
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.active.fetch_sub(1, Ordering::AcqRel);
                warn!("Worker pool queue is full ({} pending), job rejected", self.queue_capacity);
                Err(SchedulerError::QueueFull {
                    capacity: self.queue_capacity,
                })
            },
            Err(TrySendError::Disconnected(_)) => {
                self.active.fetch_sub(1, Ordering::AcqRel);
                Err(SchedulerError::PoolClosed)
            },
        }
    }

    /// 关闭线程池：不再接受新任务，已排队任务执行完毕后工作线程退出（幂等）
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_none() {
            return;
        }
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(_e) = handle.join_timeout(JOIN_TIMEOUT) {
                error!(
                    "Worker thread panicked or failed to drain within {:?}",
                    JOIN_TIMEOUT
                );
            }
        }
        debug!("Worker pool shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
