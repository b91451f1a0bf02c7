//! 分发线程
//!
//! 单线程按接收顺序消费传输层、信号桥、设备管理器和线程池的事件。
//! 分发线程本身不做阻塞 I/O。命令请求由协调器直接提交到线程池，
//! 这里收到的 `CommandRequested` 只是通知。

use super::{CoordinatorEvent, Shared};
use crossbeam_channel::{Receiver, select};
use deep_client::{DeviceEvent, Severity};
use deep_driver::{BridgeEvent, TaskEvent, TransportEvent, WorkerPool};
use deep_protocol::{SignalMap, codec};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// 空闲时检查退出标志的间隔
const IDLE_POLL: Duration = Duration::from_millis(50);

pub(super) struct Dispatcher {
    shared: Arc<Shared>,
    is_running: Arc<AtomicBool>,
    transport_rx: Receiver<TransportEvent>,
    bridge_rx: Receiver<BridgeEvent>,
    device_rx: Receiver<DeviceEvent>,
    task_rx: Receiver<TaskEvent>,
}

impl Dispatcher {
    /// 在启动线程之前订阅所有事件源
    pub fn new(shared: Arc<Shared>, pool: &WorkerPool, is_running: Arc<AtomicBool>) -> Self {
        Self {
            transport_rx: shared.transport.subscribe(),
            bridge_rx: shared.bridge.subscribe(),
            device_rx: shared.manager.subscribe(),
            task_rx: pool.subscribe(),
            shared,
            is_running,
        }
    }

    pub fn run(self) {
        info!("Coordinator dispatcher started");
        while self.is_running.load(Ordering::Acquire) {
            select! {
                recv(self.transport_rx) -> event => {
                    if let Ok(event) = event {
                        self.on_transport(event);
                    }
                },
                recv(self.bridge_rx) -> event => {
                    if let Ok(event) = event {
                        self.on_bridge(event);
                    }
                },
                recv(self.device_rx) -> event => {
                    if let Ok(event) = event {
                        self.on_device(event);
                    }
                },
                recv(self.task_rx) -> event => {
                    if let Ok(event) = event {
                        self.on_task(event);
                    }
                },
                default(IDLE_POLL) => {},
            }
        }

        // 关闭过程中产生的最后一批事件
        for event in self.transport_rx.try_iter() {
            self.on_transport(event);
        }
        for event in self.task_rx.try_iter() {
            self.on_task(event);
        }
        info!("Coordinator dispatcher stopped");
    }

    fn on_transport(&self, event: TransportEvent) {
        match event {
            TransportEvent::Line { port, line } => self.on_line(&port, &line),
            TransportEvent::Connected { port } => self.shared.status(format!("Connected to {}", port)),
            TransportEvent::Disconnected { port } => self.shared.status(format!("Disconnected from {}", port)),
            TransportEvent::ReconnectAttempt { port, attempt, max } => {
                self.shared
                    .status(format!("Reconnecting {} ({}/{})...", port, attempt, max));
            },
            TransportEvent::Error { port, message } => {
                self.shared.status(format!("Connection error on {}: {}", port, message));
                let device_id = self.shared.device_on_port(&port).unwrap_or(port);
                self.shared.device_error(&device_id, message);
            },
        }
    }

    /// 一行数据：AT 帧经信号桥解码，其他行按遥测解析
    fn on_line(&self, port: &str, line: &str) {
        let Some(device_id) = self.shared.device_on_port(port) else {
            debug!("Line from unrouted port {} skipped", port);
            return;
        };

        let signals = if codec::is_frame_line(line) {
            let frame = match codec::decode(&device_id, line) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("[{}] discarding line: {}", device_id, e);
                    return;
                },
            };
            if self.shared.bridge.database(&device_id).is_none() {
                debug!(
                    "[{}] no DBC loaded, frame 0x{:X} skipped",
                    device_id,
                    frame.arbitration_id()
                );
                return;
            }
            match self.shared.bridge.ingest(&frame) {
                Some(signals) => signals,
                None => return,
            }
        } else {
            match codec::decode_telemetry(line) {
                Ok(signals) => signals,
                Err(e) => {
                    debug!("[{}] discarding line: {}", device_id, e);
                    return;
                },
            }
        };

        self.route_signals(&device_id, &signals);
    }

    fn route_signals(&self, device_id: &str, signals: &SignalMap) {
        let record = match self.shared.parsers.parse_input(device_id, signals) {
            Ok(record) => record,
            Err(e) => {
                warn!("[{}] {}", device_id, e);
                self.shared.device_error(device_id, e.to_string());
                return;
            },
        };
        if record.is_empty() {
            debug!("[{}] no known fields in {} signal(s)", device_id, signals.len());
            return;
        }

        trace!("[{}] routing {} field(s)", device_id, record.len());
        if let Err(e) = self.shared.manager.route_semantic(device_id, &record) {
            self.shared.device_error(device_id, e.to_string());
        }
    }

    fn on_bridge(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Signals {
                channel,
                message_id,
                signals,
            } => {
                trace!("[{}] signals from 0x{:X}", channel, message_id);
                self.route_signals(&channel, &signals);
            },
            BridgeEvent::Error { channel, message } => self.shared.device_error(&channel, message),
        }
    }

    fn on_device(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::StateUpdated(snapshot) => {
                self.shared
                    .events
                    .publish(CoordinatorEvent::DeviceStatusUpdated(snapshot));
            },
            DeviceEvent::Anomaly(anomaly) => {
                let level = match anomaly.severity {
                    Severity::Warning => "warning",
                    Severity::Error => "error",
                };
                self.shared
                    .device_error(&anomaly.device_id, format!("{}: {}", level, anomaly.message));
            },
            DeviceEvent::CommandRequested(request) => {
                trace!("Command {} requested for {}", request.command, request.device_id);
            },
            DeviceEvent::TeachingStarted { device_id } => {
                self.shared.status(format!("Teaching started on {}", device_id));
            },
            DeviceEvent::TeachingStopped { device_id, name, points } => {
                self.shared.status(format!(
                    "Teaching stopped on {}: trajectory {} ({} points)",
                    device_id, name, points
                ));
            },
            DeviceEvent::PlaybackStarted { device_id, name, points } => {
                self.shared.status(format!(
                    "Playing trajectory {} on {} ({} points)",
                    name, device_id, points
                ));
            },
        }
    }

    fn on_task(&self, event: TaskEvent) {
        let event = match event {
            TaskEvent::Completed { task_id } => CoordinatorEvent::TaskCompleted { task_id },
            TaskEvent::Failed(failure) => CoordinatorEvent::TaskFailed {
                task_id: failure.task_id,
                cause: failure.cause,
            },
        };
        self.shared.events.publish(event);
    }
}
