//! 线程辅助

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};

/// 关闭时等待工作线程退出的默认上限
pub(crate) const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // 由看门狗线程 join，调用方只等待 channel
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 可中断睡眠：按小步长睡眠，`is_running` 变为 false 时提前返回
///
/// 返回值表示是否睡满了整个时长。
pub(crate) fn sleep_while_running(duration: Duration, is_running: &AtomicBool) -> bool {
    const STEP: Duration = Duration::from_millis(10);
    let deadline = Instant::now() + duration;
    loop {
        if !is_running.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        spin_sleep::sleep((deadline - now).min(STEP));
    }
}
