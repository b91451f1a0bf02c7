//! 语义记录

use crate::family::DeviceFamily;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 语义字段映射
pub type Fields = BTreeMap<String, Value>;

/// 一次接收产生的业务语义数据，由目标设备消费一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticRecord {
    pub device_id: String,
    pub device_type: DeviceFamily,
    pub fields: Fields,
}

impl SemanticRecord {
    pub fn new(device_id: impl Into<String>, device_type: DeviceFamily) -> Self {
        Self {
            device_id: device_id.into(),
            device_type,
            fields: Fields::new(),
        }
    }

    /// 追加字段（builder 风格）
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// 数值字段
    pub fn number(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}
