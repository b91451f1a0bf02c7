//! 任务调度器
//!
//! 单个定时线程维护所有定时任务，到期时把任务提交到 [`WorkerPool`] 执行。
//!
//! - 周期任务：按 `task_id` 登记，重复添加会在同一把锁内替换旧条目，
//!   不存在新旧两个定时器同时生效的窗口
//! - 延迟任务：自动生成唯一 ID，触发一次后移除
//!
//! 移除周期任务时，已提交到线程池的那一次执行仍可能完成。

use crate::error::SchedulerError;
use crate::pool::{TaskResult, WorkerPool};
use crate::thread::{JOIN_TIMEOUT, JoinTimeout};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

type PeriodicFn = Arc<dyn Fn() -> TaskResult + Send + Sync>;
type OnceFn = Box<dyn FnOnce() -> TaskResult + Send>;

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Periodic,
    OneShot,
}

enum TaskBody {
    Periodic { interval: Duration, func: PeriodicFn },
    OneShot(Option<OnceFn>),
}

struct Entry {
    next_due: Instant,
    body: TaskBody,
}

impl Entry {
    fn kind(&self) -> TaskKind {
        match self.body {
            TaskBody::Periodic { .. } => TaskKind::Periodic,
            TaskBody::OneShot(_) => TaskKind::OneShot,
        }
    }
}

/// 一次到期的执行
enum Firing {
    Periodic(String, PeriodicFn),
    OneShot(String, OnceFn),
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// 定时线程正在提交到期任务（已出锁）
    firing: bool,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    /// 条目变化、关闭请求
    wakeup: Condvar,
    /// 一轮提交结束
    idle: Condvar,
}

/// 任务调度器
///
/// # Example
///
/// ```
/// use deep_driver::{TaskScheduler, WorkerPool};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let pool = Arc::new(WorkerPool::new(1, 16).unwrap());
/// let scheduler = TaskScheduler::new(pool).unwrap();
///
/// scheduler.add_periodic("heartbeat", Duration::from_secs(1), None, || Ok(()));
/// let id = scheduler.add_delayed(Duration::from_millis(10), || Ok(()));
/// assert!(id.starts_with("delayed-"));
///
/// scheduler.stop_all();
/// assert!(scheduler.task_ids().is_empty());
/// ```
pub struct TaskScheduler {
    shared: Arc<Shared>,
    pool: Arc<WorkerPool>,
    next_delayed_id: AtomicU64,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// 创建调度器并启动定时线程
    pub fn new(pool: Arc<WorkerPool>) -> Result<Self, SchedulerError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            wakeup: Condvar::new(),
            idle: Condvar::new(),
        });

        let timer_shared = shared.clone();
        let timer_pool = pool.clone();
        let timer = std::thread::Builder::new()
            .name("deep-scheduler".to_string())
            .spawn(move || timer_loop(timer_shared, timer_pool))
            .map_err(|e| SchedulerError::Spawn(e.to_string()))?;

        Ok(Self {
            shared,
            pool,
            next_delayed_id: AtomicU64::new(1),
            timer: Mutex::new(Some(timer)),
        })
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// 添加（或替换）周期任务
    ///
    /// # 参数
    /// - `initial_delay`: 首次执行前的延迟，`None` 表示立即执行
    pub fn add_periodic<F>(&self, task_id: impl Into<String>, interval: Duration, initial_delay: Option<Duration>, func: F)
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        let task_id = task_id.into();
        let entry = Entry {
            next_due: Instant::now() + initial_delay.unwrap_or(Duration::ZERO),
            body: TaskBody::Periodic {
                interval: interval.max(Duration::from_millis(1)),
                func: Arc::new(func),
            },
        };

        let mut state = self.shared.state.lock();
        if state.entries.insert(task_id.clone(), entry).is_some() {
            debug!("Periodic task {} replaced", task_id);
        } else {
            debug!("Periodic task {} added (every {:?})", task_id, interval);
        }
        drop(state);
        self.shared.wakeup.notify_all();
    }

    /// `add_periodic` 的别名
    pub fn update_periodic<F>(&self, task_id: impl Into<String>, interval: Duration, initial_delay: Option<Duration>, func: F)
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        self.add_periodic(task_id, interval, initial_delay, func);
    }

    /// 添加延迟任务，返回生成的任务 ID
    pub fn add_delayed<F>(&self, delay: Duration, func: F) -> String
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let task_id = format!(
            "delayed-{}",
            self.next_delayed_id.fetch_add(1, Ordering::Relaxed)
        );
        let entry = Entry {
            next_due: Instant::now() + delay,
            body: TaskBody::OneShot(Some(Box::new(func))),
        };

        self.shared.state.lock().entries.insert(task_id.clone(), entry);
        self.shared.wakeup.notify_all();
        trace!("Delayed task {} scheduled in {:?}", task_id, delay);
        task_id
    }

    /// 移除任务；未知 ID 记录警告后忽略
    pub fn remove(&self, task_id: &str) -> bool {
        let removed = self.shared.state.lock().entries.remove(task_id).is_some();
        if removed {
            debug!("Task {} removed", task_id);
            self.shared.wakeup.notify_all();
        } else {
            warn!("Remove requested for unknown task {}", task_id);
        }
        removed
    }

    /// 清空所有任务，并等待正在进行的提交结束
    ///
    /// 返回后不会再有新的执行被提交；已提交到线程池的执行可能仍在运行。
    pub fn stop_all(&self) {
        let mut state = self.shared.state.lock();
        let count = state.entries.len();
        state.entries.clear();
        self.shared.wakeup.notify_all();
        while state.firing {
            self.shared.idle.wait(&mut state);
        }
        drop(state);
        debug!("Scheduler stopped {} task(s)", count);
    }

    pub fn is_scheduled(&self, task_id: &str) -> bool {
        self.shared.state.lock().entries.contains_key(task_id)
    }

    pub fn task_kind(&self, task_id: &str) -> Option<TaskKind> {
        self.shared.state.lock().entries.get(task_id).map(Entry::kind)
    }

    /// 当前登记的任务 ID（升序）
    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.state.lock().entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 停止所有任务并结束定时线程（幂等）
    pub fn shutdown(&self) {
        self.stop_all();
        self.shared.state.lock().shutdown = true;
        self.shared.wakeup.notify_all();

        if let Some(handle) = self.timer.lock().take()
            && let Err(_e) = handle.join_timeout(JOIN_TIMEOUT)
        {
            error!(
                "Scheduler thread panicked or failed to shut down within {:?}",
                JOIN_TIMEOUT
            );
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(shared: Arc<Shared>, pool: Arc<WorkerPool>) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }

        let now = Instant::now();
        let next_due = state.entries.values().map(|e| e.next_due).min();
        match next_due {
            None => {
                shared.wakeup.wait(&mut state);
                continue;
            },
            Some(due) if due > now => {
                shared.wakeup.wait_until(&mut state, due);
                continue;
            },
            Some(_) => {},
        }

        let firings = collect_due(&mut state, now);
        state.firing = true;
        drop(state);

        for firing in firings {
            let result = match firing {
                Firing::Periodic(task_id, func) => {
                    let id = task_id.clone();
                    pool.submit(task_id, move || func()).map_err(|e| (id, e))
                },
                Firing::OneShot(task_id, func) => {
                    let id = task_id.clone();
                    pool.submit(task_id, func).map_err(|e| (id, e))
                },
            };
            if let Err((task_id, e)) = result {
                warn!("Failed to submit task {}: {}", task_id, e);
            }
        }

        state = shared.state.lock();
        state.firing = false;
        shared.idle.notify_all();
    }
    trace!("Scheduler thread exiting");
}

/// 取出所有到期执行，并推进周期任务的下次到期时间
fn collect_due(state: &mut State, now: Instant) -> Vec<Firing> {
    let mut firings = Vec::new();
    let mut finished = Vec::new();

    for (task_id, entry) in state.entries.iter_mut() {
        if entry.next_due > now {
            continue;
        }
        match &mut entry.body {
            TaskBody::Periodic { interval, func } => {
                entry.next_due += *interval;
                // 落后超过一个周期时不补发
                if entry.next_due <= now {
                    entry.next_due = now + *interval;
                }
                firings.push(Firing::Periodic(task_id.clone(), func.clone()));
            },
            TaskBody::OneShot(func) => {
                if let Some(func) = func.take() {
                    firings.push(Firing::OneShot(task_id.clone(), func));
                }
                finished.push(task_id.clone());
            },
        }
    }

    for task_id in finished {
        state.entries.remove(&task_id);
    }
    firings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::TaskEvent;
    use std::sync::atomic::AtomicUsize;

    fn scheduler() -> TaskScheduler {
        TaskScheduler::new(Arc::new(WorkerPool::new(2, 64).unwrap())).unwrap()
    }

    #[test]
    fn test_periodic_runs_immediately_and_repeats() {
        let scheduler = scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        scheduler.add_periodic("tick", Duration::from_millis(10), None, move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        std::thread::sleep(Duration::from_millis(120));
        scheduler.stop_all();
        assert!(counter.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_initial_delay() {
        let scheduler = scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        scheduler.add_periodic("late", Duration::from_secs(10), Some(Duration::from_millis(300)), move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_scheduled("late"));
    }

    #[test]
    fn test_replacing_periodic_keeps_single_timer() {
        let scheduler = scheduler();
        let old_runs = Arc::new(AtomicUsize::new(0));
        let new_runs = Arc::new(AtomicUsize::new(0));

        let o = old_runs.clone();
        scheduler.add_periodic("poll", Duration::from_millis(10), Some(Duration::from_secs(5)), move || {
            o.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let n = new_runs.clone();
        scheduler.add_periodic("poll", Duration::from_millis(10), None, move || {
            n.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(scheduler.task_ids(), vec!["poll".to_string()]);
        assert_eq!(scheduler.task_kind("poll"), Some(TaskKind::Periodic));
        std::thread::sleep(Duration::from_millis(80));
        scheduler.stop_all();

        assert_eq!(old_runs.load(Ordering::SeqCst), 0);
        assert!(new_runs.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_delayed_fires_once_and_is_removed() {
        let scheduler = scheduler();
        let events = scheduler.pool().subscribe();

        let id = scheduler.add_delayed(Duration::from_millis(10), || Ok(()));
        let other = scheduler.add_delayed(Duration::from_secs(60), || Ok(()));
        assert_ne!(id, other);

        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, TaskEvent::Completed { task_id: id.clone() });
        assert!(!scheduler.is_scheduled(&id));
        assert!(scheduler.is_scheduled(&other));
    }

    #[test]
    fn test_failed_task_reported() {
        let scheduler = scheduler();
        let events = scheduler.pool().subscribe();
        let id = scheduler.add_delayed(Duration::ZERO, || Err("disk full".into()));

        match events.recv_timeout(Duration::from_secs(2)).unwrap() {
            TaskEvent::Failed(failure) => {
                assert_eq!(failure.task_id, id);
                assert_eq!(failure.cause, "disk full");
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let scheduler = scheduler();
        scheduler.add_periodic("x", Duration::from_secs(1), Some(Duration::from_secs(1)), || Ok(()));
        assert!(scheduler.remove("x"));
        assert!(!scheduler.remove("x"));
        assert!(!scheduler.remove("never"));
    }

    #[test]
    fn test_stop_all_prevents_further_runs() {
        let scheduler = scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        scheduler.add_periodic("tick", Duration::from_millis(5), None, move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        std::thread::sleep(Duration::from_millis(30));

        scheduler.stop_all();
        // 让已提交的执行跑完
        std::thread::sleep(Duration::from_millis(30));
        let after_stop = counter.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
        assert!(scheduler.task_ids().is_empty());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let scheduler = scheduler();
        scheduler.shutdown();
        scheduler.shutdown();
    }
}
