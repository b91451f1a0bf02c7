//! 示教轨迹录制与存储
//!
//! 录制期间每次机械臂状态更新都追加一个关节角度点；停止时按名称保存。
//! 锁由 [`DeviceLogicManager`](crate::DeviceLogicManager) 持有，这里只有纯数据操作。

use deep_tools::{Trajectory, TrajectoryPoint};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

struct Session {
    started: Instant,
    trajectory: Trajectory,
}

#[derive(Default)]
pub(crate) struct TeachingStore {
    sessions: HashMap<String, Session>,
    /// device_id -> (name -> trajectory)
    stored: HashMap<String, BTreeMap<String, Trajectory>>,
}

impl TeachingStore {
    /// 开始录制（已在录制时重新开始）
    pub fn start(&mut self, device_id: &str) {
        self.sessions.insert(
            device_id.to_string(),
            Session {
                started: Instant::now(),
                trajectory: Trajectory::new("", device_id),
            },
        );
    }

    pub fn is_recording(&self, device_id: &str) -> bool {
        self.sessions.contains_key(device_id)
    }

    /// 录制中则追加一个点，返回是否追加
    pub fn record(&mut self, device_id: &str, joint_angles: [f64; 6]) -> bool {
        match self.sessions.get_mut(device_id) {
            Some(session) => {
                let point = TrajectoryPoint::new(session.started.elapsed(), joint_angles);
                session.trajectory.push(point);
                true
            },
            None => false,
        }
    }

    /// 停止录制并命名；空轨迹不保存
    pub fn stop(&mut self, device_id: &str, name: &str) -> Option<Trajectory> {
        let mut trajectory = self.sessions.remove(device_id)?.trajectory;
        trajectory.name = name.to_string();
        if !trajectory.is_empty() {
            self.insert(trajectory.clone());
        }
        Some(trajectory)
    }

    /// 保存（同名覆盖）
    pub fn insert(&mut self, trajectory: Trajectory) {
        self.stored
            .entry(trajectory.device_id.clone())
            .or_default()
            .insert(trajectory.name.clone(), trajectory);
    }

    pub fn get(&self, device_id: &str, name: &str) -> Option<&Trajectory> {
        self.stored.get(device_id)?.get(name)
    }

    /// 设备的轨迹名（升序）
    pub fn names(&self, device_id: &str) -> Vec<String> {
        self.stored
            .get(device_id)
            .map(|by_name| by_name.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove_device(&mut self, device_id: &str) {
        self.sessions.remove(device_id);
        self.stored.remove(device_id);
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
        self.stored.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_stop() {
        let mut store = TeachingStore::default();
        assert!(!store.record("DeepArm01", [0.0; 6]));

        store.start("DeepArm01");
        assert!(store.is_recording("DeepArm01"));
        assert!(store.record("DeepArm01", [1.0; 6]));
        assert!(store.record("DeepArm01", [2.0; 6]));

        let trajectory = store.stop("DeepArm01", "wave").unwrap();
        assert_eq!(trajectory.name, "wave");
        assert_eq!(trajectory.len(), 2);
        assert!(!store.is_recording("DeepArm01"));
        assert_eq!(store.names("DeepArm01"), vec!["wave".to_string()]);
        assert_eq!(store.get("DeepArm01", "wave").unwrap().points[1].joint_angles, [2.0; 6]);
    }

    #[test]
    fn test_empty_trajectory_not_stored() {
        let mut store = TeachingStore::default();
        store.start("DeepArm01");
        let trajectory = store.stop("DeepArm01", "nothing").unwrap();
        assert!(trajectory.is_empty());
        assert!(store.names("DeepArm01").is_empty());
        assert!(store.stop("DeepArm01", "again").is_none());
    }

    #[test]
    fn test_names_are_per_device() {
        let mut store = TeachingStore::default();
        let mut a = Trajectory::new("b-move", "DeepArm01");
        a.push(TrajectoryPoint::new(std::time::Duration::ZERO, [0.0; 6]));
        let mut b = a.clone();
        b.name = "a-move".to_string();
        let mut other = a.clone();
        other.device_id = "DeepArm02".to_string();

        store.insert(a);
        store.insert(b);
        store.insert(other);
        assert_eq!(store.names("DeepArm01"), vec!["a-move".to_string(), "b-move".to_string()]);
        assert_eq!(store.names("DeepArm02"), vec!["b-move".to_string()]);

        store.remove_device("DeepArm01");
        assert!(store.names("DeepArm01").is_empty());
        store.clear();
        assert!(store.names("DeepArm02").is_empty());
    }
}
