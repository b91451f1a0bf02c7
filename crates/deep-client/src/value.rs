//! 语义值
//!
//! 语义字段和命令参数共用的动态值类型。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 语义值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Value {
    /// 从信号物理值构造：整数值保留为 `Int`
    pub fn from_signal(raw: f64) -> Self {
        if raw.fract() == 0.0 && raw.is_finite() && raw.abs() < i64::MAX as f64 {
            Self::Int(raw as i64)
        } else {
            Self::Float(raw)
        }
    }

    /// 从命令参数文本解析：含 `.` 按浮点，其余数字按整数，否则保留文本
    pub fn parse_arg(text: &str) -> Self {
        let text = text.trim();
        if text.contains('.') {
            if let Ok(v) = text.parse::<f64>() {
                return Self::Float(v);
            }
        } else if let Ok(v) = text.parse::<i64>() {
            return Self::Int(v);
        }
        Self::Text(text.to_string())
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// 数值转整数（浮点向零截断）
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.is_finite() => Some(v.trunc() as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg() {
        assert_eq!(Value::parse_arg("10"), Value::Int(10));
        assert_eq!(Value::parse_arg(" -3 "), Value::Int(-3));
        assert_eq!(Value::parse_arg("1.5"), Value::Float(1.5));
        assert_eq!(Value::parse_arg("home"), Value::Text("home".to_string()));
        assert_eq!(Value::parse_arg("1.2.3"), Value::Text("1.2.3".to_string()));
    }

    #[test]
    fn test_from_signal() {
        assert_eq!(Value::from_signal(95.0), Value::Int(95));
        assert_eq!(Value::from_signal(0.5), Value::Float(0.5));
        assert!(matches!(Value::from_signal(f64::NAN), Value::Float(_)));
    }

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(Value::Float(12.9).as_i64(), Some(12));
        assert_eq!(Value::Int(7).as_f64(), Some(7.0));
        assert_eq!(Value::Text("x".into()).as_f64(), None);
        assert!(!Value::Bool(true).is_number());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::from("fw").as_str(), Some("fw"));
    }

    #[test]
    fn test_serde_untagged() {
        let json = serde_json::to_string(&vec![
            Value::Int(1),
            Value::Float(2.5),
            Value::Bool(false),
            Value::Text("a".into()),
        ])
        .unwrap();
        assert_eq!(json, r#"[1,2.5,false,"a"]"#);
    }
}
