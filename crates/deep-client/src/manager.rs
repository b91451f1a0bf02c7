//! 设备逻辑管理器
//!
//! 按设备 ID 维护 [`DeviceLogic`] 实例：
//! - 注册表本身由 `RwLock` 保护，只在创建/删除设备时写锁
//! - 每台设备一把 `Mutex`，不同设备的更新互不阻塞
//!
//! 状态更新、异常、命令请求都以 [`DeviceEvent`] 发布，上层订阅后决定如何编码和发送。

use crate::command::{AbstractCommand, CommandRequest};
use crate::device::{Anomaly, DeviceLogic, DeviceSnapshot, DeviceStatus, Severity, create_device};
use crate::error::ManagerError;
use crate::family::DeviceFamily;
use crate::parser::arm::MOVE_JOINT_ANGLES;
use crate::record::SemanticRecord;
use crate::teaching::TeachingStore;
use crate::value::Value;
use crossbeam_channel::Receiver;
use deep_driver::EventBus;
use deep_tools::Trajectory;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type DeviceHandle = Arc<Mutex<Box<dyn DeviceLogic>>>;

/// 设备事件
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    StateUpdated(DeviceSnapshot),
    Anomaly(Anomaly),
    CommandRequested(CommandRequest),
    TeachingStarted { device_id: String },
    TeachingStopped { device_id: String, name: String, points: usize },
    PlaybackStarted { device_id: String, name: String, points: usize },
}

/// 设备逻辑管理器
///
/// # Example
///
/// ```
/// use deep_client::{DeviceEvent, DeviceLogicManager, DeviceStatus, SemanticRecord, DeviceFamily};
///
/// let manager = DeviceLogicManager::default();
/// let events = manager.subscribe();
///
/// let record = SemanticRecord::new("DeepMotor01", DeviceFamily::Motor).with("motor_temperature", 95);
/// let snapshot = manager.route_semantic("DeepMotor01", &record).unwrap();
/// assert_eq!(snapshot.status(), DeviceStatus::Warning);
///
/// assert!(matches!(events.try_recv().unwrap(), DeviceEvent::StateUpdated(_)));
/// assert!(matches!(events.try_recv().unwrap(), DeviceEvent::Anomaly(_)));
/// ```
pub struct DeviceLogicManager {
    devices: RwLock<HashMap<String, DeviceHandle>>,
    teaching: Mutex<TeachingStore>,
    events: Arc<EventBus<DeviceEvent>>,
}

impl Default for DeviceLogicManager {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl DeviceLogicManager {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            teaching: Mutex::new(TeachingStore::default()),
            events: Arc::new(EventBus::new(event_capacity)),
        }
    }

    pub fn events(&self) -> &Arc<EventBus<DeviceEvent>> {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// 以明确的设备族注册设备（已注册且族相同时为空操作）
    pub fn register(&self, device_id: &str, family: DeviceFamily) -> Result<(), ManagerError> {
        let handle = self.resolve(device_id, Some(family))?;
        let registered = handle.lock().family();
        if registered != family {
            return Err(ManagerError::FamilyMismatch {
                device_id: device_id.to_string(),
                registered,
                requested: family,
            });
        }
        Ok(())
    }

    /// 查找或创建设备实例
    ///
    /// 设备族取 `hint`，否则按 ID 前缀推断；都无法确定时不创建任何条目。
    fn resolve(&self, device_id: &str, hint: Option<DeviceFamily>) -> Result<DeviceHandle, ManagerError> {
        if let Some(handle) = self.devices.read().get(device_id) {
            return Ok(handle.clone());
        }

        let Some(family) = hint.or_else(|| DeviceFamily::from_device_id(device_id)) else {
            error!("Unknown device type for '{}'", device_id);
            return Err(ManagerError::UnknownDeviceType(device_id.to_string()));
        };

        let mut devices = self.devices.write();
        let handle = devices.entry(device_id.to_string()).or_insert_with(|| {
            info!("Created {} logic instance '{}'", family, device_id);
            Arc::new(Mutex::new(create_device(device_id, family)))
        });
        Ok(handle.clone())
    }

    fn existing(&self, device_id: &str) -> Option<DeviceHandle> {
        self.devices.read().get(device_id).cloned()
    }

    /// 把语义记录交给目标设备：更新、检查异常、发布事件
    pub fn route_semantic(&self, device_id: &str, record: &SemanticRecord) -> Result<DeviceSnapshot, ManagerError> {
        let handle = self.resolve(device_id, Some(record.device_type))?;

        let (snapshot, anomalies) = {
            let mut device = handle.lock();
            device.update_from_semantic(record);
            let anomalies = device.check_anomaly();

            // 示教期间：记录关节角度，并保持 Teaching 状态
            if let Some(angles) = device.joint_angles() {
                let mut teaching = self.teaching.lock();
                if teaching.record(device_id, angles) && device.status() == DeviceStatus::Connected {
                    device.set_status(DeviceStatus::Teaching);
                }
            }
            (device.snapshot(), anomalies)
        };

        debug!("Device '{}' updated: {:?}", device_id, snapshot.status());
        self.events.publish(DeviceEvent::StateUpdated(snapshot.clone()));
        self.publish_anomalies(anomalies);
        Ok(snapshot)
    }

    fn publish_anomalies(&self, anomalies: Vec<Anomaly>) {
        for anomaly in anomalies {
            match anomaly.severity {
                Severity::Warning => warn!("Device '{}': {}", anomaly.device_id, anomaly.message),
                Severity::Error => error!("Device '{}': {}", anomaly.device_id, anomaly.message),
            }
            self.events.publish(DeviceEvent::Anomaly(anomaly));
        }
    }

    /// 执行抽象命令
    ///
    /// 设备生成命令请求时发布 `CommandRequested` 并返回该请求；
    /// 本地命令（如 `get_status`）返回 `None`。
    ///
    /// # 错误
    /// - `ManagerError::UnknownDeviceType`: 无法识别设备族，不创建条目
    /// - `ManagerError::Command`: 命令不支持或参数错误
    pub fn send_command(
        &self,
        device_id: &str,
        command_name: &str,
        args: &[Value],
    ) -> Result<Option<CommandRequest>, ManagerError> {
        let handle = self.resolve(device_id, None)?;
        let result = handle.lock().execute_abstract_command(command_name, args);

        match result {
            Ok(Some(request)) => {
                self.events.publish(DeviceEvent::CommandRequested(request.clone()));
                Ok(Some(request))
            },
            Ok(None) => Ok(None),
            Err(e) => {
                warn!("Command '{}' rejected: {}", command_name, e);
                Err(e.into())
            },
        }
    }

    /// 执行已解析的抽象命令
    pub fn execute(&self, command: &AbstractCommand) -> Result<Option<CommandRequest>, ManagerError> {
        self.send_command(&command.device_id, &command.name, &command.args)
    }

    /// 开始示教（仅机械臂）
    pub fn start_teaching(&self, device_id: &str) -> Result<(), ManagerError> {
        let handle = self.resolve(device_id, None)?;
        let snapshot = {
            let mut device = handle.lock();
            if device.joint_angles().is_none() {
                return Err(ManagerError::trajectory(device_id, "teaching requires a device with joints"));
            }
            self.teaching.lock().start(device_id);
            device.set_status(DeviceStatus::Teaching);
            device.snapshot()
        };

        info!("Teaching started for '{}'", device_id);
        self.events.publish(DeviceEvent::TeachingStarted {
            device_id: device_id.to_string(),
        });
        self.events.publish(DeviceEvent::StateUpdated(snapshot));
        Ok(())
    }

    /// 停止示教并以 `name` 保存轨迹
    pub fn stop_teaching(&self, device_id: &str, name: &str) -> Result<Trajectory, ManagerError> {
        let handle = self
            .existing(device_id)
            .ok_or_else(|| ManagerError::trajectory(device_id, "device not registered"))?;

        let (trajectory, snapshot) = {
            let mut device = handle.lock();
            let trajectory = self
                .teaching
                .lock()
                .stop(device_id, name)
                .ok_or_else(|| ManagerError::trajectory(device_id, "teaching is not active"))?;
            let status = if device.state().is_online {
                DeviceStatus::Connected
            } else {
                DeviceStatus::Disconnected
            };
            device.set_status(status);
            (trajectory, device.snapshot())
        };

        info!(
            "Teaching stopped for '{}': trajectory '{}' with {} point(s)",
            device_id,
            name,
            trajectory.len()
        );
        self.events.publish(DeviceEvent::TeachingStopped {
            device_id: device_id.to_string(),
            name: name.to_string(),
            points: trajectory.len(),
        });
        self.events.publish(DeviceEvent::StateUpdated(snapshot));
        Ok(trajectory)
    }

    /// 回放轨迹：每个点生成一条 `move_joint_angles` 请求
    ///
    /// 请求按轨迹顺序返回，由调用方按点的时间偏移依次发送；不逐条发布 `CommandRequested`。
    pub fn play_trajectory(&self, device_id: &str, name: &str) -> Result<Vec<CommandRequest>, ManagerError> {
        let trajectory = self
            .trajectory(device_id, name)
            .ok_or_else(|| ManagerError::trajectory(device_id, format!("trajectory '{name}' not found")))?;
        let handle = self.resolve(device_id, None)?;

        let (requests, snapshot) = {
            let mut device = handle.lock();
            let mut requests = Vec::with_capacity(trajectory.len());
            for point in &trajectory.points {
                let args: Vec<Value> = point.joint_angles.iter().map(|a| Value::Float(*a)).collect();
                if let Some(request) = device.execute_abstract_command(MOVE_JOINT_ANGLES, &args)? {
                    requests.push(request);
                }
            }
            if !requests.is_empty() {
                device.set_status(DeviceStatus::Playing);
            }
            (requests, device.snapshot())
        };

        info!("Playing trajectory '{}' on '{}' ({} point(s))", name, device_id, requests.len());
        self.events.publish(DeviceEvent::PlaybackStarted {
            device_id: device_id.to_string(),
            name: name.to_string(),
            points: requests.len(),
        });
        self.events.publish(DeviceEvent::StateUpdated(snapshot));
        Ok(requests)
    }

    pub fn is_teaching(&self, device_id: &str) -> bool {
        self.teaching.lock().is_recording(device_id)
    }

    pub fn trajectory_names(&self, device_id: &str) -> Vec<String> {
        self.teaching.lock().names(device_id)
    }

    pub fn trajectory(&self, device_id: &str, name: &str) -> Option<Trajectory> {
        self.teaching.lock().get(device_id, name).cloned()
    }

    /// 导入轨迹（同名覆盖）
    pub fn add_trajectory(&self, trajectory: Trajectory) {
        self.teaching.lock().insert(trajectory);
    }

    /// 保存轨迹到 JSON 文件
    pub fn save_trajectory(&self, device_id: &str, name: &str, path: impl AsRef<Path>) -> Result<(), ManagerError> {
        let trajectory = self
            .trajectory(device_id, name)
            .ok_or_else(|| ManagerError::trajectory(device_id, format!("trajectory '{name}' not found")))?;
        trajectory
            .save(path)
            .map_err(|e| ManagerError::trajectory(device_id, format!("{e:#}")))
    }

    /// 从 JSON 文件加载轨迹并导入
    pub fn load_trajectory(&self, path: impl AsRef<Path>) -> Result<Trajectory, ManagerError> {
        let path = path.as_ref();
        let trajectory = Trajectory::load(path)
            .map_err(|e| ManagerError::trajectory(&path.display().to_string(), format!("{e:#}")))?;
        self.add_trajectory(trajectory.clone());
        Ok(trajectory)
    }

    pub fn snapshot(&self, device_id: &str) -> Option<DeviceSnapshot> {
        self.existing(device_id).map(|handle| handle.lock().snapshot())
    }

    pub fn family(&self, device_id: &str) -> Option<DeviceFamily> {
        self.existing(device_id).map(|handle| handle.lock().family())
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.read().contains_key(device_id)
    }

    /// 已注册设备 ID（升序）
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 对所有设备做一次异常检查（定时巡检）
    pub fn check_all(&self) -> Vec<Anomaly> {
        let handles: Vec<DeviceHandle> = self.devices.read().values().cloned().collect();
        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.lock().check_anomaly());
        }
        self.publish_anomalies(all.clone());
        all
    }

    pub fn remove_device(&self, device_id: &str) -> bool {
        let removed = self.devices.write().remove(device_id).is_some();
        if removed {
            self.teaching.lock().remove_device(device_id);
            info!("Removed device '{}'", device_id);
        } else {
            debug!("Remove requested for unknown device '{}'", device_id);
        }
        removed
    }

    pub fn clear(&self) {
        self.devices.write().clear();
        self.teaching.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn drain(rx: &Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
        rx.try_iter().collect()
    }

    fn arm_record(angles: [i64; 6]) -> SemanticRecord {
        let mut record = SemanticRecord::new("DeepArm01", DeviceFamily::Arm);
        for (i, angle) in angles.iter().enumerate() {
            record.insert(format!("joint{}_angle", i + 1), *angle);
        }
        record
    }

    #[test]
    fn test_route_creates_and_updates() {
        let manager = DeviceLogicManager::default();
        let events = manager.subscribe();

        let snapshot = manager
            .route_semantic("DeepArm01", &arm_record([10, 20, 30, 40, 50, 60]))
            .unwrap();
        assert_eq!(snapshot.status(), DeviceStatus::Connected);
        assert!(snapshot.common.is_online);
        assert_eq!(manager.device_ids(), vec!["DeepArm01".to_string()]);
        assert_eq!(manager.family("DeepArm01"), Some(DeviceFamily::Arm));

        let events = drain(&events);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], DeviceEvent::StateUpdated(s) if s.device_id() == "DeepArm01"));
    }

    #[test]
    fn test_record_type_tag_used_for_unknown_prefix() {
        let manager = DeviceLogicManager::default();
        let record = SemanticRecord::new("bench-motor", DeviceFamily::Motor).with("motor_rpm", 10);
        manager.route_semantic("bench-motor", &record).unwrap();
        assert_eq!(manager.family("bench-motor"), Some(DeviceFamily::Motor));
    }

    #[test]
    fn test_unknown_device_creates_no_entry() {
        let manager = DeviceLogicManager::default();
        let events = manager.subscribe();

        let err = manager.send_command("UnknownDevice123", "noop", &[]).unwrap_err();
        assert!(matches!(err, ManagerError::UnknownDeviceType(_)));
        assert!(manager.device_ids().is_empty());
        assert!(drain(&events).is_empty());
    }

    #[test]
    fn test_send_command_publishes_request() {
        let manager = DeviceLogicManager::default();
        let events = manager.subscribe();

        let request = manager
            .send_command("DeepMotor01", "set_rpm", &[Value::Int(1500)])
            .unwrap()
            .unwrap();
        assert_eq!(request.command, "set_motor_rpm");
        assert_eq!(drain(&events), vec![DeviceEvent::CommandRequested(request)]);

        assert_eq!(manager.send_command("DeepMotor01", "get_status", &[]).unwrap(), None);
        assert!(matches!(
            manager.send_command("DeepMotor01", "fly", &[]),
            Err(ManagerError::Command(_))
        ));
    }

    #[test]
    fn test_register_family_mismatch() {
        let manager = DeviceLogicManager::default();
        manager.register("rig", DeviceFamily::Arm).unwrap();
        manager.register("rig", DeviceFamily::Arm).unwrap();
        assert!(matches!(
            manager.register("rig", DeviceFamily::Motor),
            Err(ManagerError::FamilyMismatch { .. })
        ));
    }

    #[test]
    fn test_teaching_record_and_playback() {
        let manager = DeviceLogicManager::default();
        manager.route_semantic("DeepArm01", &arm_record([0; 6])).unwrap();

        manager.start_teaching("DeepArm01").unwrap();
        assert!(manager.is_teaching("DeepArm01"));
        assert_eq!(manager.snapshot("DeepArm01").unwrap().status(), DeviceStatus::Teaching);

        let snapshot = manager
            .route_semantic("DeepArm01", &arm_record([10, 20, 30, 40, 50, 60]))
            .unwrap();
        assert_eq!(snapshot.status(), DeviceStatus::Teaching);
        manager.route_semantic("DeepArm01", &arm_record([11, 21, 31, 41, 51, 61])).unwrap();

        let trajectory = manager.stop_teaching("DeepArm01", "wave").unwrap();
        assert_eq!(trajectory.len(), 2);
        assert_eq!(trajectory.points[0].joint_angles, [10.0, 20.0, 30.0, 40.0, 50.0, 60.0]);
        assert_eq!(manager.trajectory_names("DeepArm01"), vec!["wave".to_string()]);
        assert_eq!(manager.snapshot("DeepArm01").unwrap().status(), DeviceStatus::Connected);

        let events = manager.subscribe();
        let requests = manager.play_trajectory("DeepArm01", "wave").unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].command, MOVE_JOINT_ANGLES);
        assert_eq!(requests[1].args[5], Value::Float(61.0));
        assert_eq!(manager.snapshot("DeepArm01").unwrap().status(), DeviceStatus::Playing);

        let events = drain(&events);
        assert!(events.contains(&DeviceEvent::PlaybackStarted {
            device_id: "DeepArm01".to_string(),
            name: "wave".to_string(),
            points: 2,
        }));
        assert!(!events.iter().any(|e| matches!(e, DeviceEvent::CommandRequested(_))));
    }

    #[test]
    fn test_teaching_errors() {
        let manager = DeviceLogicManager::default();
        assert!(matches!(
            manager.start_teaching("DeepMotor01"),
            Err(ManagerError::Trajectory { .. })
        ));
        assert!(manager.stop_teaching("DeepArm01", "x").is_err());
        manager.register("DeepArm01", DeviceFamily::Arm).unwrap();
        assert!(manager.stop_teaching("DeepArm01", "x").is_err());
        assert!(manager.play_trajectory("DeepArm01", "missing").is_err());
    }

    #[test]
    fn test_trajectory_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wave.json");

        let manager = DeviceLogicManager::default();
        let mut trajectory = Trajectory::new("wave", "DeepArm01");
        trajectory.push(deep_tools::TrajectoryPoint::new(Duration::ZERO, [1.0; 6]));
        manager.add_trajectory(trajectory.clone());
        manager.save_trajectory("DeepArm01", "wave", &path).unwrap();

        let other = DeviceLogicManager::default();
        assert_eq!(other.load_trajectory(&path).unwrap(), trajectory);
        assert_eq!(other.trajectory_names("DeepArm01"), vec!["wave".to_string()]);
        assert!(other.load_trajectory(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_check_all_and_remove() {
        let manager = DeviceLogicManager::default();
        manager
            .route_semantic(
                "DeepMotor01",
                &SemanticRecord::new("DeepMotor01", DeviceFamily::Motor).with("error_code", 4),
            )
            .unwrap();
        manager.route_semantic("DeepArm01", &arm_record([0; 6])).unwrap();

        let anomalies = manager.check_all();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].device_id, "DeepMotor01");

        assert!(manager.remove_device("DeepMotor01"));
        assert!(!manager.remove_device("DeepMotor01"));
        assert_eq!(manager.device_ids(), vec!["DeepArm01".to_string()]);

        manager.clear();
        assert!(manager.device_ids().is_empty());
        assert!(manager.snapshot("DeepArm01").is_none());
    }
}
