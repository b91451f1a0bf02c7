//! 事件总线
//!
//! 每个处理阶段（传输、信号桥、调度器）各自持有一个强类型的 [`EventBus`]，
//! 订阅者通过有界 crossbeam 通道接收事件。
//!
//! - **有界队列**: 每个订阅者的容量固定，防止慢消费者导致 OOM
//! - **非阻塞**: 发布使用 `try_send`，队列满时丢弃事件、计数并限频告警
//! - **自动清理**: 接收端被 drop 后，对应的发送端在下次发布时移除
//!
//! # 使用示例
//!
//! ```rust
//! use deep_driver::events::EventBus;
//!
//! let bus = EventBus::new(16);
//! let rx = bus.subscribe();
//!
//! bus.publish("connected".to_string());
//! assert_eq!(rx.try_recv().unwrap(), "connected");
//! assert_eq!(bus.dropped_events(), 0);
//! ```

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

/// 同一订阅者连续丢弃时，每隔多少个事件再告警一次
pub const DROP_WARN_INTERVAL: u64 = 100;

struct Subscriber<T> {
    id: u64,
    tx: Sender<T>,
    /// 该订阅者累计丢弃的事件数
    dropped: AtomicU64,
}

/// 强类型事件总线
///
/// 总线是有损的：只用于状态通知类事件，必须送达的请求走专门的队列。
pub struct EventBus<T> {
    subscribers: RwLock<Vec<Subscriber<T>>>,
    next_id: AtomicU64,
    capacity: usize,
    /// 因队列满而丢弃的事件数
    dropped: Arc<AtomicU64>,
    /// 成功投递的事件数（按订阅者计）
    delivered: AtomicU64,
}

impl<T: Clone + Send> EventBus<T> {
    /// 创建总线，`capacity` 为每个订阅者的队列容量（最小为 1）
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            capacity: capacity.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
            delivered: AtomicU64::new(0),
        }
    }

    /// 订阅事件
    ///
    /// 只会收到订阅之后发布的事件。
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = bounded(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push(Subscriber {
            id,
            tx,
            dropped: AtomicU64::new(0),
        });
        rx
    }

    /// 发布事件（非阻塞）
    ///
    /// 订阅者队列满时丢弃该事件：第一次丢弃以及此后每 [`DROP_WARN_INTERVAL`]
    /// 次丢弃记录一条 warn 日志。
    pub fn publish(&self, event: T) {
        let mut dead: Vec<u64> = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for sub in subscribers.iter() {
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                    },
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        let count = sub.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if count == 1 || count % DROP_WARN_INTERVAL == 0 {
                            warn!(
                                "EventBus subscriber #{} queue full (capacity {}), {} event(s) dropped so far",
                                sub.id, self.capacity, count
                            );
                        }
                    },
                    Err(TrySendError::Disconnected(_)) => {
                        dead.push(sub.id);
                    },
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write();
            subscribers.retain(|sub| !dead.contains(&sub.id));
            trace!("EventBus removed {} disconnected subscriber(s)", dead.len());
        }
    }

    /// 丢弃事件计数器（可跨线程持有）
    pub fn dropped_counter(&self) -> &Arc<AtomicU64> {
        &self.dropped
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn delivered_events(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl<T: Clone + Send> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(1024)
    }
}
