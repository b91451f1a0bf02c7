//! 协调器
//!
//! 把传输层、信号桥、协议解析器、设备逻辑管理器、线程池和调度器组装在一起：
//!
//! ```text
//! SerialTransport ─Line─► codec ─► SignalBridge::ingest ─┐
//!                                 └► decode_telemetry ────┼─► ParserRegistry ─► DeviceLogicManager ─► DeviceEvent
//! SignalBridge（适配器轮询）─Signals──────────────────────┘
//!
//! 控制请求 ─► DeviceLogicManager::execute ─► CommandRequest ─► WorkerPool
//!                                                               └─► ParserRegistry::generate_output ─► SerialTransport::send
//! ```
//!
//! 所有事件由一个分发线程按接收顺序处理，对外统一发布为 [`CoordinatorEvent`]。

mod builder;
mod dispatcher;

pub use builder::CoordinatorBuilder;

use crate::error::SdkError;
use crossbeam_channel::Receiver;
use deep_client::{
    AbstractCommand, CommandRequest, DeviceFamily, DeviceLogicManager, DeviceSnapshot, ParserRegistry,
};
use deep_driver::{
    BUSTYPE_SERIAL_BRIDGE, ChannelConfig, EventBus, SerialTransport, SignalBridge, TaskScheduler, WorkerPool,
};
use deep_can::CanAdapter;
use deep_protocol::{DeepFrame, ProtocolError, SignalMap, codec};
use deep_tools::DeviceSettings;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 协调器对外事件
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    /// 状态栏消息
    AppStatus(String),
    DeviceStatusUpdated(DeviceSnapshot),
    DeviceError { device_id: String, message: String },
    ImageProcessingStarted { path: PathBuf },
    ImageProcessingFinished { path: PathBuf, summary: String },
    ImageProcessingError { path: PathBuf, message: String },
    TaskCompleted { task_id: String },
    TaskFailed { task_id: String, cause: String },
}

/// 设备连接配置
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub device_id: String,
    /// 显式设备族；`None` 时按设备 ID 前缀推断
    pub family: Option<DeviceFamily>,
    /// 串口名；适配器模式下为 CAN 接口名
    pub port: String,
    pub baud_rate: u32,
    pub bustype: String,
    /// DBC 文件；没有时该设备不经过信号桥（如 DeepMotor 遥测）
    pub dbc_path: Option<PathBuf>,
    pub poll_interval: Duration,
}

impl DeviceConfig {
    /// 串口设备
    pub fn serial(device_id: impl Into<String>, port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            device_id: device_id.into(),
            family: None,
            port: port.into(),
            baud_rate,
            bustype: BUSTYPE_SERIAL_BRIDGE.to_string(),
            dbc_path: None,
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn with_family(mut self, family: DeviceFamily) -> Self {
        self.family = Some(family);
        self
    }

    pub fn with_dbc(mut self, dbc_path: impl Into<PathBuf>) -> Self {
        self.dbc_path = Some(dbc_path.into());
        self
    }

    pub fn with_bustype(mut self, bustype: impl Into<String>) -> Self {
        self.bustype = bustype.into();
        self
    }

    /// 从 `[device_settings]` 生成配置
    ///
    /// DeepArm 使用配置中的串口、波特率、bustype 和 DBC；DeepMotor 只有串口和波特率。
    pub fn from_settings(device_id: impl Into<String>, family: DeviceFamily, settings: &DeviceSettings) -> Self {
        let config = match family {
            DeviceFamily::Arm => Self::serial(device_id, &settings.deeparm_serial_port, settings.deeparm_baud_rate)
                .with_bustype(&settings.deeparm_can_bustype)
                .with_dbc(&settings.deeparm_dbc_path),
            DeviceFamily::Motor => {
                Self::serial(device_id, &settings.deepmotor_serial_port, settings.deepmotor_baud_rate)
            },
        };
        config.with_family(family)
    }

    /// 是否由信号桥自行打开 CAN 适配器（不使用串口）
    pub fn is_adapter_mode(&self) -> bool {
        self.dbc_path.is_some() && self.bustype != BUSTYPE_SERIAL_BRIDGE
    }

    fn channel_config(&self, dbc_path: &Path) -> ChannelConfig {
        ChannelConfig {
            dbc_path: dbc_path.to_path_buf(),
            bustype: self.bustype.clone(),
            interface: Some(self.port.clone()),
            poll_interval: self.poll_interval,
        }
    }
}

/// 设备的数据通路
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route {
    /// 串口行协议（可选经过信号桥）
    Serial { port: String },
    /// 信号桥直接驱动的 CAN 适配器
    Adapter,
}

/// 分发线程与线程池任务共享的组件
pub(crate) struct Shared {
    pub transport: SerialTransport,
    pub bridge: SignalBridge,
    pub parsers: ParserRegistry,
    pub manager: Arc<DeviceLogicManager>,
    pub events: EventBus<CoordinatorEvent>,
    routes: RwLock<HashMap<String, Route>>,
}

impl Shared {
    pub fn status(&self, message: impl Into<String>) {
        self.events.publish(CoordinatorEvent::AppStatus(message.into()));
    }

    pub fn device_error(&self, device_id: &str, message: impl Into<String>) {
        self.events.publish(CoordinatorEvent::DeviceError {
            device_id: device_id.to_string(),
            message: message.into(),
        });
    }

    pub fn route(&self, device_id: &str) -> Option<Route> {
        self.routes.read().get(device_id).cloned()
    }

    /// 端口对应的设备 ID
    pub fn device_on_port(&self, port: &str) -> Option<String> {
        self.routes
            .read()
            .iter()
            .find(|(_, route)| matches!(route, Route::Serial { port: p } if p == port))
            .map(|(device_id, _)| device_id.clone())
    }

    /// 编码命令请求并写出
    pub fn send_request(&self, request: &CommandRequest) -> Result<usize, SdkError> {
        let bytes = self
            .parsers
            .generate_output(request.family, &request.command, &request.args)?;
        self.write(&request.device_id, &bytes)
    }

    /// 按设备通路写出已编码的字节
    pub fn write(&self, device_id: &str, bytes: &[u8]) -> Result<usize, SdkError> {
        match self.route(device_id) {
            Some(Route::Serial { port }) => Ok(self.transport.send(&port, bytes)?),
            Some(Route::Adapter) => {
                let line = String::from_utf8_lossy(bytes);
                let frame = codec::decode(device_id, &line).map_err(ProtocolError::from)?;
                self.bridge.transmit(&frame)?;
                Ok(bytes.len())
            },
            None => Err(SdkError::NotConnected {
                device_id: device_id.to_string(),
            }),
        }
    }
}

/// 协调器
///
/// # Example
///
/// ```no_run
/// use deep_sdk::{CoordinatorBuilder, CoordinatorEvent, DeviceConfig, DeviceFamily};
///
/// let coordinator = CoordinatorBuilder::new().build().unwrap();
/// let events = coordinator.subscribe();
///
/// coordinator
///     .connect_device(DeviceConfig::serial("DeepMotor01", "/dev/ttyUSB0", 115_200))
///     .unwrap();
/// coordinator.handle_device_control_request("DeepMotor01", "set_rpm(1500)").unwrap();
///
/// while let Ok(event) = events.recv() {
///     if let CoordinatorEvent::DeviceStatusUpdated(snapshot) = event {
///         println!("{:?}", snapshot);
///     }
/// }
/// ```
pub struct Coordinator {
    shared: Arc<Shared>,
    pool: Arc<WorkerPool>,
    scheduler: TaskScheduler,
    is_running: Arc<AtomicBool>,
    shut_down: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    next_task_id: AtomicU64,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    pub fn subscribe(&self) -> Receiver<CoordinatorEvent> {
        self.shared.events.subscribe()
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn devices(&self) -> &Arc<DeviceLogicManager> {
        &self.shared.manager
    }

    pub fn parsers(&self) -> &ParserRegistry {
        &self.shared.parsers
    }

    pub fn transport(&self) -> &SerialTransport {
        &self.shared.transport
    }

    pub fn bridge(&self) -> &SignalBridge {
        &self.shared.bridge
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.shared.route(device_id).is_some()
    }

    fn ensure_running(&self) -> Result<(), SdkError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(SdkError::ShutDown);
        }
        Ok(())
    }

    fn next_task_id(&self, kind: &str) -> String {
        format!("{}-{}", kind, self.next_task_id.fetch_add(1, Ordering::Relaxed))
    }

    /// 连接设备
    ///
    /// 1. 确定设备族并注册设备实例
    /// 2. 有 DBC 时连接信号桥通道（通道名即设备 ID）
    /// 3. 串口模式下打开串口；失败时回滚第 2 步
    ///
    /// # 错误
    /// - `SdkError::AlreadyConnected`: 设备已连接
    /// - `SdkError::Manager`: 无法确定设备族
    /// - `SdkError::Bridge` / `SdkError::Transport`: DBC 加载或端口打开失败
    pub fn connect_device(&self, config: DeviceConfig) -> Result<(), SdkError> {
        self.ensure_running()?;
        let device_id = config.device_id.clone();
        self.prepare_device(&config)?;

        if let Some(dbc_path) = &config.dbc_path {
            self.shared
                .bridge
                .connect(&device_id, &config.channel_config(dbc_path))?;
        }

        if config.is_adapter_mode() {
            self.shared.routes.write().insert(device_id.clone(), Route::Adapter);
        } else {
            // 先登记通路，读线程收到的第一行就能找到设备
            self.shared.routes.write().insert(
                device_id.clone(),
                Route::Serial {
                    port: config.port.clone(),
                },
            );
            if let Err(e) = self.shared.transport.open(&config.port, config.baud_rate) {
                self.shared.routes.write().remove(&device_id);
                self.shared.bridge.disconnect(&device_id);
                self.shared.device_error(&device_id, e.to_string());
                return Err(e.into());
            }
        }

        info!("Device '{}' connected via {}", device_id, config.port);
        self.shared
            .status(format!("Device {} connected on {}", device_id, config.port));
        Ok(())
    }

    /// 以给定 CAN 适配器连接设备（DBC 必需）
    pub fn connect_device_with_adapter(
        &self,
        config: DeviceConfig,
        adapter: Box<dyn CanAdapter>,
    ) -> Result<(), SdkError> {
        self.ensure_running()?;
        let device_id = config.device_id.clone();
        let dbc_path = config.dbc_path.clone().ok_or_else(|| SdkError::NotConnected {
            device_id: device_id.clone(),
        })?;
        self.prepare_device(&config)?;

        self.shared.bridge.load_database(&device_id, &dbc_path)?;
        if let Err(e) = self
            .shared
            .bridge
            .connect_with_adapter(&device_id, adapter, config.poll_interval)
        {
            self.shared.bridge.disconnect(&device_id);
            return Err(e.into());
        }

        self.shared.routes.write().insert(device_id.clone(), Route::Adapter);
        info!("Device '{}' connected via CAN adapter", device_id);
        self.shared.status(format!("Device {} connected via CAN adapter", device_id));
        Ok(())
    }

    fn prepare_device(&self, config: &DeviceConfig) -> Result<(), SdkError> {
        let device_id = &config.device_id;
        if self.is_connected(device_id) {
            return Err(SdkError::AlreadyConnected {
                device_id: device_id.clone(),
            });
        }

        let family = match config.family.or_else(|| DeviceFamily::from_device_id(device_id)) {
            Some(family) => family,
            None => self.shared.parsers.resolve(device_id)?,
        };
        self.shared.manager.register(device_id, family)?;
        self.shared.parsers.bind(device_id, family);
        Ok(())
    }

    /// 断开设备：关闭串口或停止通道轮询，并卸载 DBC
    ///
    /// 返回设备之前是否处于连接状态。设备实例及其状态保留。
    pub fn disconnect_device(&self, device_id: &str) -> bool {
        let Some(route) = self.shared.routes.write().remove(device_id) else {
            warn!("Disconnect requested for unknown device '{}'", device_id);
            return false;
        };

        if let Route::Serial { port } = &route {
            self.shared.transport.close(port);
        }
        self.shared.bridge.disconnect(device_id);
        info!("Device '{}' disconnected", device_id);
        self.shared.status(format!("Device {} disconnected", device_id));
        true
    }

    /// 处理设备控制请求（文本形式 `name(arg, ...)`）
    ///
    /// 命令被设备逻辑接受后直接提交到线程池编码并发送；
    /// 本地命令（如 `get_status`）直接发布当前状态。
    ///
    /// # 错误
    /// - `SdkError::Scheduler`: 线程池队列已满或已关闭，命令未发送
    pub fn handle_device_control_request(
        &self,
        device_id: &str,
        command: &str,
    ) -> Result<Option<CommandRequest>, SdkError> {
        self.ensure_running()?;
        let command = AbstractCommand::parse(device_id, command);
        info!("Control request for '{}': {}", device_id, command.name);
        self.shared
            .status(format!("Sending command {} to device {}...", command.name, device_id));

        match self.shared.manager.execute(&command) {
            Ok(Some(request)) => {
                self.submit_command(request.clone())?;
                Ok(Some(request))
            },
            Ok(None) => {
                if let Some(snapshot) = self.shared.manager.snapshot(device_id) {
                    self.shared
                        .events
                        .publish(CoordinatorEvent::DeviceStatusUpdated(snapshot));
                }
                Ok(None)
            },
            Err(e) => {
                self.shared
                    .status(format!("Command {} failed: {}", command.name, e));
                self.shared.device_error(device_id, e.to_string());
                Err(e.into())
            },
        }
    }

    /// 命令请求直接提交到线程池：编码 → 发送 → 状态消息
    ///
    /// 结果以 `TaskCompleted` / `TaskFailed`（ID 为 `command-<设备>-<n>`）发布。
    fn submit_command(&self, request: CommandRequest) -> Result<(), SdkError> {
        let task_id = self.next_task_id(&format!("command-{}", request.device_id));
        let device_id = request.device_id.clone();
        let shared = self.shared.clone();

        let submitted = self.pool.submit(task_id, move || match shared.send_request(&request) {
            Ok(written) => {
                shared.status(format!(
                    "Command {} sent to {} ({} bytes)",
                    request.command, request.device_id, written
                ));
                Ok(())
            },
            Err(e) => {
                shared.status(format!("Command {} failed: {}", request.command, e));
                shared.device_error(&request.device_id, e.to_string());
                Err(e.into())
            },
        });

        if let Err(e) = submitted {
            warn!("Command for {} not submitted: {}", device_id, e);
            self.shared.device_error(&device_id, e.to_string());
            return Err(e.into());
        }
        Ok(())
    }

    /// 回放轨迹：按各点的时间偏移依次发送
    ///
    /// 返回线程池任务 ID；任务结果以 `TaskCompleted` / `TaskFailed` 发布。
    pub fn play_trajectory(&self, device_id: &str, name: &str) -> Result<String, SdkError> {
        self.ensure_running()?;
        let offsets: Vec<Duration> = self
            .shared
            .manager
            .trajectory(device_id, name)
            .map(|t| t.points.iter().map(|p| Duration::from_millis(p.offset_ms)).collect())
            .unwrap_or_default();
        let requests = self.shared.manager.play_trajectory(device_id, name)?;

        let task_id = self.next_task_id("playback");
        let shared = self.shared.clone();
        let device = device_id.to_string();
        let trajectory = name.to_string();
        self.pool.submit(task_id.clone(), move || {
            let start = Instant::now();
            for (request, offset) in requests.iter().zip(offsets) {
                let elapsed = start.elapsed();
                if offset > elapsed {
                    spin_sleep::sleep(offset - elapsed);
                }
                if let Err(e) = shared.send_request(request) {
                    shared.device_error(&device, format!("playback of '{}' aborted: {}", trajectory, e));
                    return Err(e.into());
                }
            }
            shared.status(format!("Trajectory {} finished on {}", trajectory, device));
            Ok(())
        })?;
        Ok(task_id)
    }

    /// 图像处理请求：在线程池中检查文件并生成摘要
    ///
    /// 立即发布 `ImageProcessingStarted`，完成后发布 `ImageProcessingFinished` 或 `ImageProcessingError`。
    pub fn handle_process_image_request(&self, path: impl AsRef<Path>) -> Result<String, SdkError> {
        self.ensure_running()?;
        let path = path.as_ref().to_path_buf();
        info!("Image processing requested: {}", path.display());
        self.shared
            .status(format!("Processing image {}...", path.display()));
        self.shared
            .events
            .publish(CoordinatorEvent::ImageProcessingStarted { path: path.clone() });

        let task_id = self.next_task_id("image");
        let shared = self.shared.clone();
        self.pool.submit(task_id.clone(), move || match summarize_image(&path) {
            Ok(summary) => {
                shared.status(format!("Image processed: {}", summary));
                shared
                    .events
                    .publish(CoordinatorEvent::ImageProcessingFinished { path, summary });
                Ok(())
            },
            Err(e) => {
                let message = e.to_string();
                error!("Image processing failed for {}: {}", path.display(), message);
                shared
                    .events
                    .publish(CoordinatorEvent::ImageProcessingError { path, message });
                Err(e.into())
            },
        })?;
        Ok(task_id)
    }

    /// 按 DBC 编码信号并发送到设备
    pub fn send_signals(&self, channel: &str, message_id: u32, signals: &SignalMap) -> Result<(), SdkError> {
        self.ensure_running()?;
        let payload = self.shared.bridge.encode(channel, message_id, signals)?;
        let frame = DeepFrame::new(channel, message_id, &payload)?;

        match self.shared.route(channel) {
            Some(Route::Serial { port }) => {
                let line = codec::encode_frame(&frame);
                self.shared.transport.send(&port, line.as_bytes())?;
            },
            Some(Route::Adapter) => self.shared.bridge.transmit(&frame)?,
            None => {
                return Err(SdkError::NotConnected {
                    device_id: channel.to_string(),
                });
            },
        }
        debug!("Sent {} signal(s) as 0x{:X} on {}", signals.len(), message_id, channel);
        Ok(())
    }

    /// 关闭（幂等）
    ///
    /// 顺序：停止调度 → 关闭所有串口 → 排空线程池 → 断开信号桥 → 停止分发线程
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Coordinator shutting down");

        self.scheduler.stop_all();
        self.scheduler.shutdown();
        self.shared.transport.close_all();
        self.shared.routes.write().clear();
        self.pool.shutdown();
        self.shared.bridge.disconnect_all();

        self.is_running.store(false, Ordering::Release);
        if let Some(handle) = self.dispatcher.lock().take()
            && handle.join().is_err()
        {
            error!("Coordinator dispatcher panicked");
        }
        info!("Coordinator stopped");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 读取文件头识别图像格式并生成摘要
fn summarize_image(path: &Path) -> std::io::Result<String> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a file", path.display()),
        ));
    }

    let mut header = [0u8; 8];
    let read = std::fs::File::open(path)?.read(&mut header)?;
    let format = match &header[..read] {
        [0x89, b'P', b'N', b'G', ..] => "png",
        [0xFF, 0xD8, 0xFF, ..] => "jpeg",
        [b'G', b'I', b'F', b'8', ..] => "gif",
        [b'B', b'M', ..] => "bmp",
        _ => "unknown",
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(format!("{}: {} bytes ({})", name, metadata.len(), format))
}
