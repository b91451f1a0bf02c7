//! 信号桥
//!
//! 按通道管理 DBC 信号数据库，把帧解码为信号映射，或把信号编码为载荷。
//!
//! 两种工作模式：
//! - **桥接模式**（bustype `"serial_can_bridge"`）：帧来自串口传输层，
//!   由调用方通过 [`SignalBridge::ingest`] 同步送入
//! - **适配器模式**（`"socketcan"` 等）：信号桥自行打开 [`CanAdapter`]，
//!   由轮询线程定期读取并发布 [`BridgeEvent::Signals`]
//!
//! 数据库表使用 `ArcSwap` 快照：读路径无锁，重新加载时整体替换。

use crate::error::BridgeError;
use crate::events::EventBus;
use crate::thread::{JOIN_TIMEOUT, JoinTimeout, sleep_while_running};
use arc_swap::ArcSwap;
use crossbeam_channel::Receiver;
use deep_can::{CanAdapter, LinkError};
use deep_protocol::{DbcError, DeepFrame, SignalDatabase, SignalMap};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 串口桥接模式的 bustype
pub const BUSTYPE_SERIAL_BRIDGE: &str = "serial_can_bridge";

/// 单轮轮询最多读取的帧数
const MAX_FRAMES_PER_POLL: usize = 64;

/// 通道配置
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub dbc_path: PathBuf,
    /// `"serial_can_bridge"`、`"socketcan"` 等
    pub bustype: String,
    /// 适配器模式下的接口名（缺省时使用通道名）
    pub interface: Option<String>,
    pub poll_interval: Duration,
}

impl ChannelConfig {
    /// 桥接模式配置
    pub fn serial_bridge(dbc_path: impl Into<PathBuf>) -> Self {
        Self {
            dbc_path: dbc_path.into(),
            bustype: BUSTYPE_SERIAL_BRIDGE.to_string(),
            interface: None,
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn is_bridge_mode(&self) -> bool {
        self.bustype == BUSTYPE_SERIAL_BRIDGE
    }
}

/// 信号桥事件
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// 一帧解码完成
    Signals {
        channel: String,
        message_id: u32,
        signals: SignalMap,
    },
    /// 解码或适配器错误（未知报文 ID 不会产生此事件）
    Error { channel: String, message: String },
}

struct Poller {
    adapter: Arc<Mutex<Box<dyn CanAdapter>>>,
    is_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

type DatabaseMap = HashMap<String, Arc<SignalDatabase>>;

/// 信号桥
pub struct SignalBridge {
    databases: Arc<ArcSwap<DatabaseMap>>,
    pollers: Mutex<HashMap<String, Poller>>,
    events: Arc<EventBus<BridgeEvent>>,
}

impl SignalBridge {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            databases: Arc::new(ArcSwap::from_pointee(HashMap::new())),
            pollers: Mutex::new(HashMap::new()),
            events: Arc::new(EventBus::new(event_capacity)),
        }
    }

    pub fn events(&self) -> &Arc<EventBus<BridgeEvent>> {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// 加载（或重新加载）通道的 DBC
    ///
    /// # 错误
    /// - `BridgeError::Load`: 文件缺失或格式错误；原有数据库保持不变
    pub fn load_database(&self, channel: &str, dbc_path: impl AsRef<Path>) -> Result<(), BridgeError> {
        let path = dbc_path.as_ref();
        let db = SignalDatabase::from_file(path).map_err(|source| BridgeError::Load {
            channel: channel.to_string(),
            source,
        })?;

        info!(
            "Loaded DBC {} for channel {} ({} messages)",
            path.display(),
            channel,
            db.len()
        );
        self.install_database(channel, db);
        Ok(())
    }

    /// 直接安装已解析的数据库
    pub fn install_database(&self, channel: &str, db: SignalDatabase) {
        let db = Arc::new(db);
        self.databases.rcu(|current| {
            let mut next = DatabaseMap::clone(current);
            next.insert(channel.to_string(), db.clone());
            next
        });
    }

    /// 通道当前的数据库快照
    pub fn database(&self, channel: &str) -> Option<Arc<SignalDatabase>> {
        self.databases.load().get(channel).cloned()
    }

    /// 连接通道
    ///
    /// 桥接模式只加载 DBC；适配器模式还会打开适配器并启动轮询线程。
    pub fn connect(&self, channel: &str, config: &ChannelConfig) -> Result<(), BridgeError> {
        self.load_database(channel, &config.dbc_path)?;
        if config.is_bridge_mode() {
            info!("Channel {} ready in serial bridge mode", channel);
            return Ok(());
        }

        let adapter = match open_adapter(channel, config) {
            Ok(adapter) => adapter,
            Err(e) => {
                self.remove_database(channel);
                return Err(e);
            },
        };
        self.start_polling(channel, adapter, config.poll_interval)
    }

    /// 以给定适配器连接通道（数据库需已加载）
    pub fn connect_with_adapter(
        &self,
        channel: &str,
        adapter: Box<dyn CanAdapter>,
        poll_interval: Duration,
    ) -> Result<(), BridgeError> {
        if self.database(channel).is_none() {
            return Err(BridgeError::NotReady {
                channel: channel.to_string(),
            });
        }
        self.start_polling(channel, adapter, poll_interval)
    }

    fn start_polling(
        &self,
        channel: &str,
        adapter: Box<dyn CanAdapter>,
        poll_interval: Duration,
    ) -> Result<(), BridgeError> {
        self.stop_polling(channel);

        let adapter = Arc::new(Mutex::new(adapter));
        let is_running = Arc::new(AtomicBool::new(true));
        let ctx = PollLoop {
            channel: channel.to_string(),
            adapter: adapter.clone(),
            databases: self.databases.clone(),
            events: self.events.clone(),
            is_running: is_running.clone(),
            poll_interval,
        };

        let thread = std::thread::Builder::new()
            .name(format!("deep-bridge-{}", channel))
            .spawn(move || ctx.run())
            .map_err(|e| BridgeError::Adapter {
                channel: channel.to_string(),
                message: format!("failed to spawn poll thread: {}", e),
            })?;

        self.pollers.lock().insert(
            channel.to_string(),
            Poller {
                adapter,
                is_running,
                thread: Some(thread),
            },
        );
        info!("Channel {} polling every {:?}", channel, poll_interval);
        Ok(())
    }

    fn stop_polling(&self, channel: &str) -> bool {
        let Some(mut poller) = self.pollers.lock().remove(channel) else {
            return false;
        };
        poller.is_running.store(false, Ordering::Release);
        if let Some(handle) = poller.thread.take()
            && let Err(_e) = handle.join_timeout(JOIN_TIMEOUT)
        {
            error!(
                "Poll thread for {} panicked or failed to shut down within {:?}",
                channel, JOIN_TIMEOUT
            );
        }
        true
    }

    fn remove_database(&self, channel: &str) -> bool {
        let mut removed = false;
        self.databases.rcu(|current| {
            let mut next = DatabaseMap::clone(current);
            removed = next.remove(channel).is_some();
            next
        });
        removed
    }

    /// 断开通道：停止轮询并卸载数据库
    pub fn disconnect(&self, channel: &str) {
        let polled = self.stop_polling(channel);
        let loaded = self.remove_database(channel);
        if polled || loaded {
            info!("Channel {} disconnected", channel);
        } else {
            debug!("Disconnect requested for unknown channel {}", channel);
        }
    }

    pub fn disconnect_all(&self) {
        let mut channels: Vec<String> = self.databases.load().keys().cloned().collect();
        channels.extend(self.pollers.lock().keys().cloned());
        channels.sort();
        channels.dedup();
        for channel in channels {
            self.disconnect(&channel);
        }
    }

    /// 通道是否可用：数据库已加载，适配器模式下轮询线程仍在运行
    pub fn is_ready(&self, channel: &str) -> bool {
        if self.database(channel).is_none() {
            return false;
        }
        match self.pollers.lock().get(channel) {
            Some(poller) => poller.is_running.load(Ordering::Acquire),
            None => true,
        }
    }

    /// 是否为适配器模式通道
    pub fn is_polled(&self, channel: &str) -> bool {
        self.pollers.lock().contains_key(channel)
    }

    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.databases.load().keys().cloned().collect();
        channels.sort();
        channels
    }

    /// 解码帧
    ///
    /// # 错误
    /// - `BridgeError::NotReady`: 通道没有数据库
    /// - `BridgeError::UnknownMessageId`: 报文 ID 未定义
    /// - `BridgeError::Decode`: 载荷不足等
    pub fn decode(&self, channel: &str, frame: &DeepFrame) -> Result<SignalMap, BridgeError> {
        let db = self.database(channel).ok_or_else(|| BridgeError::NotReady {
            channel: channel.to_string(),
        })?;
        decode_with(&db, channel, frame)
    }

    /// 编码信号为载荷（长度为报文声明长度）
    pub fn encode(
        &self,
        channel: &str,
        message_id: u32,
        signals: &SignalMap,
    ) -> Result<Vec<u8>, BridgeError> {
        let db = self.database(channel).ok_or_else(|| BridgeError::NotReady {
            channel: channel.to_string(),
        })?;
        db.encode(message_id, signals).map_err(|source| match source {
            DbcError::UnknownMessageId(id) => BridgeError::UnknownMessageId {
                channel: channel.to_string(),
                message_id: id,
            },
            source => BridgeError::Encode {
                channel: channel.to_string(),
                source,
            },
        })
    }

    /// 桥接模式入口：解码一帧
    ///
    /// 未知 ID 以 debug 级别记录并返回 `None`；其他解码错误发布
    /// [`BridgeEvent::Error`] 后返回 `None`。
    pub fn ingest(&self, frame: &DeepFrame) -> Option<SignalMap> {
        let channel = frame.channel();
        match self.decode(channel, frame) {
            Ok(signals) => {
                trace!(
                    "[{}] 0x{:X} decoded {} signal(s)",
                    channel,
                    frame.arbitration_id(),
                    signals.len()
                );
                Some(signals)
            },
            Err(e) => {
                report_decode_error(&self.events, channel, e);
                None
            },
        }
    }

    /// 适配器模式下发送帧
    pub fn transmit(&self, frame: &DeepFrame) -> Result<(), BridgeError> {
        let channel = frame.channel();
        let adapter = self
            .pollers
            .lock()
            .get(channel)
            .map(|p| p.adapter.clone())
            .ok_or_else(|| BridgeError::NotReady {
                channel: channel.to_string(),
            })?;
        let result = adapter.lock().send(frame);
        result.map_err(|e| BridgeError::Adapter {
            channel: channel.to_string(),
            message: e.to_string(),
        })
    }
}

impl Default for SignalBridge {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        let channels: Vec<String> = self.pollers.lock().keys().cloned().collect();
        for channel in channels {
            self.stop_polling(&channel);
        }
    }
}

fn decode_with(db: &SignalDatabase, channel: &str, frame: &DeepFrame) -> Result<SignalMap, BridgeError> {
    db.decode_frame(frame).map_err(|source| match source {
        DbcError::UnknownMessageId(id) => BridgeError::UnknownMessageId {
            channel: channel.to_string(),
            message_id: id,
        },
        source => BridgeError::Decode {
            channel: channel.to_string(),
            source,
        },
    })
}

fn report_decode_error(events: &EventBus<BridgeEvent>, channel: &str, err: BridgeError) {
    match err {
        BridgeError::UnknownMessageId { message_id, .. } => {
            debug!("[{}] skipping unknown message id 0x{:X}", channel, message_id);
        },
        err => {
            warn!("[{}] {}", channel, err);
            events.publish(BridgeEvent::Error {
                channel: channel.to_string(),
                message: err.to_string(),
            });
        },
    }
}

#[cfg(target_os = "linux")]
fn open_adapter(channel: &str, config: &ChannelConfig) -> Result<Box<dyn CanAdapter>, BridgeError> {
    match config.bustype.as_str() {
        "socketcan" => {
            let interface = config.interface.as_deref().unwrap_or(channel);
            deep_can::SocketCanAdapter::new(interface)
                .map(|a| Box::new(a) as Box<dyn CanAdapter>)
                .map_err(|e| BridgeError::Adapter {
                    channel: channel.to_string(),
                    message: e.to_string(),
                })
        },
        other => Err(BridgeError::Adapter {
            channel: channel.to_string(),
            message: format!("unsupported bustype '{}'", other),
        }),
    }
}

#[cfg(not(target_os = "linux"))]
fn open_adapter(channel: &str, config: &ChannelConfig) -> Result<Box<dyn CanAdapter>, BridgeError> {
    Err(BridgeError::Adapter {
        channel: channel.to_string(),
        message: format!("unsupported bustype '{}'", config.bustype),
    })
}

/// 适配器轮询线程上下文
struct PollLoop {
    channel: String,
    adapter: Arc<Mutex<Box<dyn CanAdapter>>>,
    databases: Arc<ArcSwap<DatabaseMap>>,
    events: Arc<EventBus<BridgeEvent>>,
    is_running: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl PollLoop {
    fn run(self) {
        while self.is_running.load(Ordering::Acquire) {
            let (frames, failure) = self.drain();

            if !frames.is_empty() {
                match self.databases.load().get(&self.channel).cloned() {
                    Some(db) => {
                        for frame in &frames {
                            match decode_with(&db, &self.channel, frame) {
                                Ok(signals) => self.events.publish(BridgeEvent::Signals {
                                    channel: self.channel.clone(),
                                    message_id: frame.arbitration_id(),
                                    signals,
                                }),
                                Err(e) => report_decode_error(&self.events, &self.channel, e),
                            }
                        }
                    },
                    None => debug!("[{}] dropping {} frame(s): no database", self.channel, frames.len()),
                }
            }

            if let Some(e) = failure {
                warn!("[{}] adapter receive failed: {}", self.channel, e);
                self.events.publish(BridgeEvent::Error {
                    channel: self.channel.clone(),
                    message: format!("adapter receive failed: {}", e),
                });
                if e.is_fatal() {
                    error!("[{}] adapter failure is fatal, stopping poll loop", self.channel);
                    self.is_running.store(false, Ordering::Release);
                    break;
                }
            }

            sleep_while_running(self.poll_interval, &self.is_running);
        }
        trace!("Poll loop for {} exited", self.channel);
    }

    /// 读出当前可用的全部帧（单轮有上限）
    fn drain(&self) -> (SmallVec<[DeepFrame; 8]>, Option<LinkError>) {
        let mut frames = SmallVec::new();
        let mut adapter = self.adapter.lock();
        while frames.len() < MAX_FRAMES_PER_POLL {
            match adapter.try_receive() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(e) => return (frames, Some(e)),
            }
        }
        (frames, None)
    }
}
