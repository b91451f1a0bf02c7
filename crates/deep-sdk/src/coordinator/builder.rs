//! 协调器 Builder

use super::dispatcher::Dispatcher;
use super::{Coordinator, Shared};
use crate::error::SdkError;
use deep_can::{LinkOpener, SerialPortOpener};
use deep_client::{DeviceLogicManager, ParserRegistry};
use deep_driver::{EventBus, SerialTransport, SignalBridge, TaskScheduler, TransportConfig, WorkerPool, default_pool_size};
use deep_tools::AppConfig;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::time::Duration;
use tracing::info;

/// 周期巡检任务 ID
pub const HEALTH_CHECK_TASK: &str = "health-check";

/// 协调器 Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use deep_sdk::{AppConfig, CoordinatorBuilder};
/// use std::time::Duration;
///
/// let config = AppConfig::load("deepwin.toml").unwrap();
/// let coordinator = CoordinatorBuilder::from_config(&config)
///     .health_check(Duration::from_secs(5))
///     .build()
///     .unwrap();
/// ```
pub struct CoordinatorBuilder {
    opener: Option<Arc<dyn LinkOpener>>,
    transport_config: TransportConfig,
    pool_size: usize,
    queue_capacity: usize,
    event_capacity: usize,
    health_check: Option<Duration>,
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            opener: None,
            transport_config: TransportConfig::default(),
            pool_size: default_pool_size(),
            queue_capacity: 256,
            event_capacity: 1024,
            health_check: None,
        }
    }

    /// 从应用配置读取 `[serial]` 段（缺失或非法时使用默认值）
    pub fn from_config(config: &AppConfig) -> Self {
        let transport_config: TransportConfig = config.get_or("serial", TransportConfig::default());
        let event_capacity = transport_config.event_capacity;
        Self::new()
            .transport_config(transport_config)
            .event_capacity(event_capacity)
    }

    /// 替换串口打开器（默认 `SerialPortOpener`；测试中使用 mock）
    pub fn opener(mut self, opener: Arc<dyn LinkOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    /// 工作线程数（0 按 1 处理）
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// 各事件总线的订阅者队列容量
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// 启用周期异常巡检
    pub fn health_check(mut self, interval: Duration) -> Self {
        self.health_check = Some(interval);
        self
    }

    /// 创建所有组件并启动分发线程
    pub fn build(self) -> Result<Coordinator, SdkError> {
        let opener = self
            .opener
            .unwrap_or_else(|| Arc::new(SerialPortOpener) as Arc<dyn LinkOpener>);
        let pool = Arc::new(WorkerPool::new(self.pool_size, self.queue_capacity)?);
        let scheduler = TaskScheduler::new(pool.clone())?;

        let shared = Arc::new(Shared {
            transport: SerialTransport::new(opener, self.transport_config),
            bridge: SignalBridge::new(self.event_capacity),
            parsers: ParserRegistry::default(),
            manager: Arc::new(DeviceLogicManager::new(self.event_capacity)),
            events: EventBus::new(self.event_capacity),
            routes: RwLock::new(HashMap::new()),
        });

        let is_running = Arc::new(AtomicBool::new(true));
        let dispatcher = Dispatcher::new(shared.clone(), &pool, is_running.clone());
        let handle = std::thread::Builder::new()
            .name("deep-coordinator".to_string())
            .spawn(move || dispatcher.run())
            .map_err(|source| SdkError::Spawn {
                name: "dispatcher",
                source,
            })?;

        if let Some(interval) = self.health_check {
            let manager = shared.manager.clone();
            scheduler.add_periodic(HEALTH_CHECK_TASK, interval, Some(interval), move || {
                manager.check_all();
                Ok(())
            });
        }

        info!("Coordinator started ({} worker(s))", pool.size());
        Ok(Coordinator {
            shared,
            pool,
            scheduler,
            is_running,
            shut_down: AtomicBool::new(false),
            dispatcher: Mutex::new(Some(handle)),
            next_task_id: AtomicU64::new(1),
        })
    }
}
