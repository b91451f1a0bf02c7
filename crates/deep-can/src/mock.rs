//! Mock 链路（无硬件依赖）
//!
//! - [`MockOpener`]: 按端口名分配 [`MockLink`]，可注入打开失败、打开延迟和独占访问
//! - [`MockLink`]: 脚本化的输入行 / IO 错误，记录所有写入
//! - [`MockCanAdapter`]: 帧队列形式的 CAN 适配器

use crate::{CanAdapter, DeepFrame, LinkDeviceError, LinkDeviceErrorKind, LinkError, LinkOpener, LinkPair, LinkSettings, RxLink, TxLink};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

/// 空闲时单次读取的等待上限，避免读循环空转
const IDLE_READ_SLEEP: Duration = Duration::from_millis(2);

/// 脚本化的读取结果
#[derive(Debug, Clone)]
pub enum MockRead {
    Line(String),
    Error(ErrorKind),
}

#[derive(Debug, Default)]
struct LinkState {
    incoming: VecDeque<MockRead>,
    written: Vec<Vec<u8>>,
    write_error: Option<ErrorKind>,
    /// 仍存活的 rx / tx 句柄数
    handles: usize,
}

/// 一个端口的共享 mock 状态（可克隆，克隆体共享同一状态）
#[derive(Debug, Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<LinkState>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一行输入
    pub fn push_line(&self, line: impl Into<String>) {
        self.state.lock().incoming.push_back(MockRead::Line(line.into()));
    }

    /// 追加一次读取错误
    pub fn push_error(&self, kind: ErrorKind) {
        self.state.lock().incoming.push_back(MockRead::Error(kind));
    }

    /// 让后续写入失败（`None` 恢复正常）
    pub fn fail_writes(&self, kind: Option<ErrorKind>) {
        self.state.lock().write_error = kind;
    }

    /// 已写入的数据块
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// 已写入的数据块（按 UTF-8 解释）
    pub fn written_text(&self) -> Vec<String> {
        self.state
            .lock()
            .written
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    /// 尚未被读取的脚本条目数
    pub fn pending(&self) -> usize {
        self.state.lock().incoming.len()
    }

    /// 仍未释放的 rx / tx 句柄数
    pub fn open_handles(&self) -> usize {
        self.state.lock().handles
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.handles = state.handles.saturating_sub(1);
    }

    fn pair(&self) -> LinkPair {
        self.state.lock().handles += 2;
        LinkPair {
            rx: Box::new(MockRx { link: self.clone() }),
            tx: Box::new(MockTx { link: self.clone() }),
        }
    }
}

struct MockRx {
    link: MockLink,
}

impl RxLink for MockRx {
    fn read_line(&mut self) -> Result<Option<String>, LinkError> {
        let next = self.link.state.lock().incoming.pop_front();
        match next {
            Some(MockRead::Line(line)) => Ok(Some(line.trim().to_string())),
            Some(MockRead::Error(kind)) => Err(LinkError::Io(std::io::Error::new(
                kind,
                "mock read error",
            ))),
            None => {
                std::thread::sleep(IDLE_READ_SLEEP);
                Ok(None)
            },
        }
    }
}

impl Drop for MockRx {
    fn drop(&mut self) {
        self.link.release();
    }
}

struct MockTx {
    link: MockLink,
}

impl Drop for MockTx {
    fn drop(&mut self) {
        self.link.release();
    }
}

impl TxLink for MockTx {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize, LinkError> {
        let mut state = self.link.state.lock();
        match state.write_error {
            Some(ErrorKind::TimedOut) => Err(LinkError::Timeout),
            Some(kind) => Err(LinkError::Io(std::io::Error::new(kind, "mock write error"))),
            None => {
                state.written.push(bytes.to_vec());
                Ok(bytes.len())
            },
        }
    }
}

#[derive(Debug, Default)]
struct OpenerState {
    links: HashMap<String, MockLink>,
    /// 剩余失败次数；`None` 表示一直失败
    failures: HashMap<String, Option<usize>>,
    opens: HashMap<String, usize>,
    last_settings: HashMap<String, LinkSettings>,
    delays: HashMap<String, Duration>,
    /// 旧句柄未释放时拒绝再次打开（与真实串口的独占锁一致）
    exclusive: bool,
}

/// Mock 打开器
#[derive(Debug, Clone, Default)]
pub struct MockOpener {
    state: Arc<Mutex<OpenerState>>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取（或创建）端口对应的链路
    pub fn link(&self, port: &str) -> MockLink {
        self.state
            .lock()
            .links
            .entry(port.to_string())
            .or_default()
            .clone()
    }

    /// 注入打开失败：`Some(n)` 失败 n 次，`None` 一直失败
    pub fn fail_opens(&self, port: &str, times: Option<usize>) {
        self.state.lock().failures.insert(port.to_string(), times);
    }

    /// 清除注入的失败
    pub fn allow_opens(&self, port: &str) {
        self.state.lock().failures.remove(port);
    }

    /// 每次打开该端口前等待 `delay`
    pub fn delay_opens(&self, port: &str, delay: Duration) {
        self.state.lock().delays.insert(port.to_string(), delay);
    }

    /// 启用后，端口的旧 rx / tx 句柄全部释放前打开会返回 `Busy`
    pub fn exclusive_access(&self, enabled: bool) {
        self.state.lock().exclusive = enabled;
    }

    /// 端口被打开（含失败）的次数
    pub fn open_count(&self, port: &str) -> usize {
        self.state.lock().opens.get(port).copied().unwrap_or(0)
    }

    /// 最近一次打开使用的参数
    pub fn last_settings(&self, port: &str) -> Option<LinkSettings> {
        self.state.lock().last_settings.get(port).copied()
    }
}

impl LinkOpener for MockOpener {
    fn open(&self, port: &str, settings: &LinkSettings) -> Result<LinkPair, LinkError> {
        let delay = {
            let mut state = self.state.lock();
            *state.opens.entry(port.to_string()).or_default() += 1;
            state.last_settings.insert(port.to_string(), *settings);
            state.delays.get(port).copied()
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.state.lock();
        let fail = match state.failures.get_mut(port) {
            Some(None) => true,
            Some(Some(0)) => false,
            Some(Some(n)) => {
                *n -= 1;
                true
            },
            None => false,
        };
        if fail {
            return Err(LinkError::Device(LinkDeviceError::new(
                LinkDeviceErrorKind::NotFound,
                format!("mock port '{}' unavailable", port),
            )));
        }

        let exclusive = state.exclusive;
        let link = state.links.entry(port.to_string()).or_default().clone();
        drop(state);

        if exclusive && link.open_handles() > 0 {
            return Err(LinkError::Device(LinkDeviceError::new(
                LinkDeviceErrorKind::Busy,
                format!("mock port '{}' is still held by another handle", port),
            )));
        }
        Ok(link.pair())
    }
}

/// Mock CAN 适配器
///
/// 接收队列为空时返回 `LinkError::Timeout`。
#[derive(Debug, Clone, Default)]
pub struct MockCanAdapter {
    rx: Arc<Mutex<VecDeque<DeepFrame>>>,
    sent: Arc<Mutex<Vec<DeepFrame>>>,
}

impl MockCanAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注入一帧待接收数据
    pub fn inject(&self, frame: DeepFrame) {
        self.rx.lock().push_back(frame);
    }

    pub fn sent(&self) -> Vec<DeepFrame> {
        self.sent.lock().clone()
    }

    pub fn pending(&self) -> usize {
        self.rx.lock().len()
    }
}

impl CanAdapter for MockCanAdapter {
    fn send(&mut self, frame: &DeepFrame) -> Result<(), LinkError> {
        self.sent.lock().push(frame.clone());
        Ok(())
    }

    fn receive(&mut self) -> Result<DeepFrame, LinkError> {
        self.rx.lock().pop_front().ok_or(LinkError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_link_roundtrip() {
        let opener = MockOpener::new();
        let link = opener.link("COM9");
        link.push_line("AT10100\r\n");

        let mut pair = opener.open("COM9", &LinkSettings::default()).unwrap();
        assert_eq!(pair.rx.read_line().unwrap().as_deref(), Some("AT10100"));
        assert_eq!(pair.rx.read_line().unwrap(), None);

        pair.tx.write_bytes(b"GET_STATUS\r\n").unwrap();
        assert_eq!(link.written_text(), vec!["GET_STATUS\r\n".to_string()]);
    }

    #[test]
    fn test_mock_open_failures() {
        let opener = MockOpener::new();
        opener.fail_opens("COM1", Some(2));
        assert!(opener.open("COM1", &LinkSettings::default()).is_err());
        assert!(opener.open("COM1", &LinkSettings::default()).is_err());
        assert!(opener.open("COM1", &LinkSettings::default()).is_ok());
        assert_eq!(opener.open_count("COM1"), 3);

        opener.fail_opens("COM1", None);
        for _ in 0..5 {
            assert!(opener.open("COM1", &LinkSettings::default()).is_err());
        }
    }

    #[test]
    fn test_mock_write_errors() {
        let opener = MockOpener::new();
        let link = opener.link("COM2");
        let mut pair = opener.open("COM2", &LinkSettings::default()).unwrap();

        link.fail_writes(Some(ErrorKind::TimedOut));
        assert!(matches!(pair.tx.write_bytes(b"x"), Err(LinkError::Timeout)));
        link.fail_writes(Some(ErrorKind::BrokenPipe));
        assert!(matches!(pair.tx.write_bytes(b"x"), Err(LinkError::Io(_))));
        link.fail_writes(None);
        assert_eq!(pair.tx.write_bytes(b"xy").unwrap(), 2);
    }

    #[test]
    fn test_mock_exclusive_access() {
        let opener = MockOpener::new();
        opener.exclusive_access(true);
        let link = opener.link("COM3");

        let pair = opener.open("COM3", &LinkSettings::default()).unwrap();
        assert_eq!(link.open_handles(), 2);
        match opener.open("COM3", &LinkSettings::default()) {
            Err(LinkError::Device(e)) => assert_eq!(e.kind, LinkDeviceErrorKind::Busy),
            other => panic!("expected busy error, got {:?}", other.map(|_| ())),
        }

        let LinkPair { rx, tx } = pair;
        drop(tx);
        assert!(opener.open("COM3", &LinkSettings::default()).is_err());
        drop(rx);
        assert_eq!(link.open_handles(), 0);
        assert!(opener.open("COM3", &LinkSettings::default()).is_ok());
    }

    #[test]
    fn test_mock_can_adapter() {
        let mut adapter = MockCanAdapter::new();
        assert!(adapter.try_receive().unwrap().is_none());

        adapter.inject(DeepFrame::new("vcan0", 0x201, &[1]).unwrap());
        let frame = adapter.try_receive().unwrap().unwrap();
        assert_eq!(frame.arbitration_id(), 0x201);

        adapter.send(&frame).unwrap();
        assert_eq!(adapter.sent().len(), 1);
    }
}
