//! 串口传输层
//!
//! 每个打开的端口对应一个读线程：逐行读取并发布 [`TransportEvent::Line`]，
//! I/O 错误时按配置自动重连。写操作在调用方线程执行，受写超时约束。
//!
//! # 生命周期
//!
//! ```text
//! open ──► Connected ──► Line* ──► (I/O error) ──► ReconnectAttempt{1..n} ──► Connected
//!                                         │                            └──► Error（终止）
//!                                         └──（未启用重连）──► Error（终止）
//! close ──► Disconnected
//! ```

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::events::EventBus;
use crate::thread::{JOIN_TIMEOUT, JoinTimeout, sleep_while_running};
use crossbeam_channel::Receiver;
use deep_can::{LinkError, LinkOpener, LinkPair, RxLink, TxLink};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// 传输层事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected { port: String },
    Disconnected { port: String },
    /// 收到一行（已去除首尾空白）
    Line { port: String, line: String },
    /// 即将进行第 `attempt` 次重连
    ReconnectAttempt { port: String, attempt: u32, max: u32 },
    /// 终止性错误，读循环已退出
    Error { port: String, message: String },
}

impl TransportEvent {
    pub fn port(&self) -> &str {
        match self {
            Self::Connected { port }
            | Self::Disconnected { port }
            | Self::Line { port, .. }
            | Self::ReconnectAttempt { port, .. }
            | Self::Error { port, .. } => port,
        }
    }
}

/// 写端槽位：重连期间为 `None`
type TxSlot = Arc<Mutex<Option<Box<dyn TxLink>>>>;

struct Connection {
    tx: TxSlot,
    is_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }
}

/// 串口传输管理器
///
/// # Example
///
/// ```no_run
/// use deep_can::SerialPortOpener;
/// use deep_driver::{SerialTransport, TransportConfig, TransportEvent};
/// use std::sync::Arc;
///
/// let transport = SerialTransport::new(Arc::new(SerialPortOpener), TransportConfig::default());
/// let events = transport.subscribe();
///
/// transport.open("/dev/ttyUSB0", 9600).unwrap();
/// transport.send("/dev/ttyUSB0", b"GET_STATUS\r\n").unwrap();
///
/// while let Ok(event) = events.recv() {
///     if let TransportEvent::Line { line, .. } = event {
///         println!("{line}");
///     }
/// }
/// ```
pub struct SerialTransport {
    opener: Arc<dyn LinkOpener>,
    config: TransportConfig,
    connections: Mutex<HashMap<String, Connection>>,
    /// 正在打开的端口（打开期间不持有 `connections` 锁）
    opening: Mutex<HashSet<String>>,
    events: Arc<EventBus<TransportEvent>>,
}

/// 打开期间的端口占位，离开作用域时释放
struct OpenReservation<'a> {
    opening: &'a Mutex<HashSet<String>>,
    port: String,
}

impl Drop for OpenReservation<'_> {
    fn drop(&mut self) {
        self.opening.lock().remove(&self.port);
    }
}

impl SerialTransport {
    pub fn new(opener: Arc<dyn LinkOpener>, config: TransportConfig) -> Self {
        let events = Arc::new(EventBus::new(config.event_capacity));
        Self {
            opener,
            config,
            connections: Mutex::new(HashMap::new()),
            opening: Mutex::new(HashSet::new()),
            events,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus<TransportEvent>> {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// 打开端口并启动读线程
    ///
    /// 端口表只在登记占位和插入连接时短暂加锁，阻塞的打开与旧线程回收
    /// 不会拖住其他端口的 [`send`](Self::send)。`Connected` 由读线程在开始读取前发布。
    ///
    /// # 错误
    /// - `TransportError::AlreadyOpen`: 端口已打开且读循环在运行，或正在被打开
    /// - `TransportError::Connect`: 端口无法打开
    /// - `TransportError::Spawn`: 读线程创建失败
    pub fn open(&self, port: &str, baud_rate: u32) -> Result<(), TransportError> {
        let (_reservation, stale) = {
            let mut connections = self.connections.lock();
            let mut opening = self.opening.lock();
            if opening.contains(port) || connections.get(port).is_some_and(Connection::is_alive) {
                return Err(TransportError::AlreadyOpen {
                    port: port.to_string(),
                });
            }
            opening.insert(port.to_string());
            let reservation = OpenReservation {
                opening: &self.opening,
                port: port.to_string(),
            };
            (reservation, connections.remove(port))
        };

        // 读循环已因终止性错误退出，回收旧句柄后再打开
        if let Some(mut stale) = stale {
            join_read_loop(port, &mut stale);
            stale.tx.lock().take();
        }

        let settings = self.config.link_settings(baud_rate);
        let LinkPair { rx, tx } =
            self.opener.open(port, &settings).map_err(|source| TransportError::Connect {
                port: port.to_string(),
                source,
            })?;

        let tx: TxSlot = Arc::new(Mutex::new(Some(tx)));
        let is_running = Arc::new(AtomicBool::new(true));

        let ctx = ReadLoop {
            port: port.to_string(),
            baud_rate,
            rx: Some(rx),
            tx: tx.clone(),
            opener: self.opener.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            is_running: is_running.clone(),
        };

        let thread = std::thread::Builder::new()
            .name(format!("deep-serial-{}", port))
            .spawn(move || ctx.run())
            .map_err(|source| TransportError::Spawn {
                port: port.to_string(),
                source,
            })?;

        self.connections.lock().insert(
            port.to_string(),
            Connection {
                tx,
                is_running,
                thread: Some(thread),
            },
        );

        info!("Serial port {} opened at {} baud", port, settings.baud_rate);
        Ok(())
    }

    /// 关闭端口（幂等）
    ///
    /// 停止读线程并释放句柄。端口存在时发布 `Disconnected`。
    pub fn close(&self, port: &str) {
        let Some(mut connection) = self.connections.lock().remove(port) else {
            warn!("Close requested for unknown port {}", port);
            return;
        };

        connection.is_running.store(false, Ordering::Release);
        join_read_loop(port, &mut connection);
        connection.tx.lock().take();

        info!("Serial port {} closed", port);
        self.events.publish(TransportEvent::Disconnected {
            port: port.to_string(),
        });
    }

    /// 关闭所有端口
    pub fn close_all(&self) {
        let ports: Vec<String> = self.connections.lock().keys().cloned().collect();
        for port in ports {
            self.close(&port);
        }
    }

    /// 端口是否打开且读循环在运行
    pub fn is_open(&self, port: &str) -> bool {
        self.connections.lock().get(port).is_some_and(Connection::is_alive)
    }

    /// 当前登记的端口
    pub fn ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = self.connections.lock().keys().cloned().collect();
        ports.sort();
        ports
    }

    /// 发送字节（不自动重试）
    ///
    /// 等待写锁与实际写入都受写超时约束。
    ///
    /// # 错误
    /// - `TransportError::NotConnected`: 端口未打开或正在重连
    /// - `TransportError::WriteTimeout`: 超过写超时
    /// - `TransportError::Write`: I/O 错误
    pub fn send(&self, port: &str, bytes: &[u8]) -> Result<usize, TransportError> {
        let slot = {
            let connections = self.connections.lock();
            match connections.get(port) {
                Some(c) if c.is_alive() => c.tx.clone(),
                _ => {
                    return Err(TransportError::NotConnected {
                        port: port.to_string(),
                    });
                },
            }
        };

        let mut guard = slot
            .try_lock_for(self.config.write_timeout())
            .ok_or_else(|| TransportError::WriteTimeout {
                port: port.to_string(),
            })?;

        let tx = guard.as_mut().ok_or_else(|| TransportError::NotConnected {
            port: port.to_string(),
        })?;

        match tx.write_bytes(bytes) {
            Ok(n) => {
                trace!("Sent {} bytes to {}", n, port);
                Ok(n)
            },
            Err(LinkError::Timeout) => Err(TransportError::WriteTimeout {
                port: port.to_string(),
            }),
            Err(source) => Err(TransportError::Write {
                port: port.to_string(),
                source,
            }),
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn join_read_loop(port: &str, connection: &mut Connection) {
    connection.is_running.store(false, Ordering::Release);
    if let Some(handle) = connection.thread.take()
        && let Err(_e) = handle.join_timeout(JOIN_TIMEOUT)
    {
        error!(
            "Read loop for {} panicked or failed to shut down within {:?}",
            port, JOIN_TIMEOUT
        );
    }
}

/// 读线程上下文
struct ReadLoop {
    port: String,
    baud_rate: u32,
    /// 重连期间为 `None`
    rx: Option<Box<dyn RxLink>>,
    tx: TxSlot,
    opener: Arc<dyn LinkOpener>,
    config: TransportConfig,
    events: Arc<EventBus<TransportEvent>>,
    is_running: Arc<AtomicBool>,
}

impl ReadLoop {
    fn run(mut self) {
        self.events.publish(TransportEvent::Connected {
            port: self.port.clone(),
        });

        loop {
            if !self.is_running.load(Ordering::Acquire) {
                trace!("Read loop for {}: is_running flag is false, exiting", self.port);
                break;
            }
            let Some(rx) = self.rx.as_mut() else {
                break;
            };

            match rx.read_line() {
                Ok(Some(line)) => {
                    trace!("[{}] <- {}", self.port, line);
                    self.events.publish(TransportEvent::Line {
                        port: self.port.clone(),
                        line,
                    });
                },
                Ok(None) => {},
                Err(e) => {
                    if !self.is_running.load(Ordering::Acquire) {
                        break;
                    }
                    warn!("Read error on {}: {}", self.port, e);
                    // 串口独占打开：重连前先释放旧的读写句柄
                    self.rx = None;
                    self.tx.lock().take();

                    if !self.config.auto_reconnect {
                        self.fail(format!("Read error: {}", e));
                        break;
                    }

                    match self.reconnect() {
                        Some(pair) => {
                            self.rx = Some(pair.rx);
                            *self.tx.lock() = Some(pair.tx);
                        },
                        None => {
                            if self.is_running.load(Ordering::Acquire) {
                                self.fail(format!(
                                    "Reconnect failed after {} attempts: {}",
                                    self.config.reconnect_attempts, e
                                ));
                            }
                            break;
                        },
                    }
                },
            }
        }
    }

    /// 依次尝试重连；成功返回新链路，耗尽或被关闭返回 `None`
    fn reconnect(&self) -> Option<LinkPair> {
        let max = self.config.reconnect_attempts;
        let settings = self.config.link_settings(self.baud_rate);

        for attempt in 1..=max {
            if !self.is_running.load(Ordering::Acquire) {
                return None;
            }

            info!("Reconnecting {} (attempt {}/{})", self.port, attempt, max);
            self.events.publish(TransportEvent::ReconnectAttempt {
                port: self.port.clone(),
                attempt,
                max,
            });

            if !sleep_while_running(self.config.reconnect_delay(), &self.is_running) {
                return None;
            }

            match self.opener.open(&self.port, &settings) {
                Ok(pair) => {
                    info!("Reconnected {} after {} attempt(s)", self.port, attempt);
                    self.events.publish(TransportEvent::Connected {
                        port: self.port.clone(),
                    });
                    return Some(pair);
                },
                Err(e) => {
                    debug!("Reconnect attempt {}/{} for {} failed: {}", attempt, max, self.port, e);
                },
            }
        }
        None
    }

    fn fail(&self, message: String) {
        error!("Serial port {} stopped: {}", self.port, message);
        self.is_running.store(false, Ordering::Release);
        self.events.publish(TransportEvent::Error {
            port: self.port.clone(),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deep_can::mock::MockOpener;
    use std::io::ErrorKind;
    use std::time::{Duration, Instant};

    fn fast_config() -> TransportConfig {
        TransportConfig {
            read_timeout_ms: 5,
            write_timeout_ms: 50,
            reconnect_delay_ms: 5,
            reconnect_attempts: 3,
            ..Default::default()
        }
    }

    fn next_event(rx: &Receiver<TransportEvent>) -> TransportEvent {
        rx.recv_timeout(Duration::from_secs(2)).expect("event expected")
    }

    #[test]
    fn test_open_emits_connected_and_lines() {
        let opener = MockOpener::new();
        let link = opener.link("COM1");
        link.push_line("AT10201FF\r\n");

        let transport = SerialTransport::new(Arc::new(opener.clone()), fast_config());
        let events = transport.subscribe();
        transport.open("COM1", 9600).unwrap();

        assert_eq!(next_event(&events), TransportEvent::Connected { port: "COM1".into() });
        assert_eq!(
            next_event(&events),
            TransportEvent::Line {
                port: "COM1".into(),
                line: "AT10201FF".into()
            }
        );
        assert_eq!(opener.last_settings("COM1").unwrap().baud_rate, 9600);
        assert!(transport.is_open("COM1"));
    }

    #[test]
    fn test_connected_always_precedes_lines() {
        let opener = MockOpener::new();
        let link = opener.link("COM1");
        let transport = SerialTransport::new(Arc::new(opener), fast_config());
        let events = transport.subscribe();

        for i in 0..20 {
            // 行在打开前就已就绪，读线程一启动即可读到
            link.push_line(format!("AT102010{:X}", i % 16));
            transport.open("COM1", 9600).unwrap();

            assert_eq!(next_event(&events), TransportEvent::Connected { port: "COM1".into() });
            assert!(matches!(next_event(&events), TransportEvent::Line { .. }));

            transport.close("COM1");
            assert_eq!(next_event(&events), TransportEvent::Disconnected { port: "COM1".into() });
        }
    }

    #[test]
    fn test_open_without_baud_uses_default() {
        let opener = MockOpener::new();
        let config = TransportConfig {
            default_baud_rate: 57_600,
            ..fast_config()
        };
        let transport = SerialTransport::new(Arc::new(opener.clone()), config);
        transport.open("COM4", 0).unwrap();
        assert_eq!(opener.last_settings("COM4").unwrap().baud_rate, 57_600);
    }

    #[test]
    fn test_open_twice_fails() {
        let transport = SerialTransport::new(Arc::new(MockOpener::new()), fast_config());
        transport.open("COM1", 9600).unwrap();
        assert!(matches!(
            transport.open("COM1", 9600),
            Err(TransportError::AlreadyOpen { .. })
        ));
    }

    #[test]
    fn test_open_failure_reports_connect_error() {
        let opener = MockOpener::new();
        opener.fail_opens("COM3", None);
        let transport = SerialTransport::new(Arc::new(opener), fast_config());
        assert!(matches!(
            transport.open("COM3", 9600),
            Err(TransportError::Connect { .. })
        ));
        assert!(!transport.is_open("COM3"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let transport = SerialTransport::new(Arc::new(MockOpener::new()), fast_config());
        let events = transport.subscribe();
        transport.open("COM1", 9600).unwrap();
        transport.close("COM1");
        transport.close("COM1");
        transport.close("NEVER_OPENED");

        let collected: Vec<_> = events.try_iter().collect();
        let disconnects = collected
            .iter()
            .filter(|e| matches!(e, TransportEvent::Disconnected { .. }))
            .count();
        assert_eq!(disconnects, 1);
        assert!(!transport.is_open("COM1"));
    }

    #[test]
    fn test_send_writes_bytes() {
        let opener = MockOpener::new();
        let link = opener.link("COM2");
        let transport = SerialTransport::new(Arc::new(opener), fast_config());
        transport.open("COM2", 115200).unwrap();

        assert_eq!(transport.send("COM2", b"GET_STATUS\r\n").unwrap(), 12);
        assert_eq!(link.written_text(), vec!["GET_STATUS\r\n".to_string()]);
    }

    #[test]
    fn test_send_errors() {
        let opener = MockOpener::new();
        let link = opener.link("COM2");
        let transport = SerialTransport::new(Arc::new(opener), fast_config());

        assert!(matches!(
            transport.send("COM2", b"x"),
            Err(TransportError::NotConnected { .. })
        ));

        transport.open("COM2", 9600).unwrap();
        link.fail_writes(Some(ErrorKind::TimedOut));
        assert!(matches!(
            transport.send("COM2", b"x"),
            Err(TransportError::WriteTimeout { .. })
        ));
        link.fail_writes(Some(ErrorKind::BrokenPipe));
        assert!(matches!(
            transport.send("COM2", b"x"),
            Err(TransportError::Write { .. })
        ));
    }

    #[test]
    fn test_reconnect_exhausted_is_terminal() {
        let opener = MockOpener::new();
        let link = opener.link("COM1");
        let transport = SerialTransport::new(Arc::new(opener.clone()), fast_config());
        let events = transport.subscribe();
        transport.open("COM1", 9600).unwrap();

        opener.fail_opens("COM1", None);
        link.push_error(ErrorKind::BrokenPipe);

        let mut attempts = Vec::new();
        loop {
            match next_event(&events) {
                TransportEvent::ReconnectAttempt { attempt, max, .. } => {
                    assert_eq!(max, 3);
                    attempts.push(attempt);
                },
                TransportEvent::Error { .. } => break,
                _ => {},
            }
        }
        assert_eq!(attempts, vec![1, 2, 3]);

        std::thread::sleep(Duration::from_millis(50));
        assert!(!transport.is_open("COM1"));
        // 初次打开 + 3 次重连，没有第 4 次
        assert_eq!(opener.open_count("COM1"), 4);
        assert!(events.try_iter().all(|e| !matches!(e, TransportEvent::ReconnectAttempt { .. })));
    }

    #[test]
    fn test_reconnect_success_resumes_reading() {
        let opener = MockOpener::new();
        let link = opener.link("COM1");
        let transport = SerialTransport::new(Arc::new(opener.clone()), fast_config());
        let events = transport.subscribe();
        transport.open("COM1", 9600).unwrap();

        opener.fail_opens("COM1", Some(1));
        link.push_error(ErrorKind::BrokenPipe);
        link.push_line("rpm_raw=100");

        let mut saw_reconnect = false;
        loop {
            match next_event(&events) {
                TransportEvent::ReconnectAttempt { .. } => saw_reconnect = true,
                TransportEvent::Line { line, .. } => {
                    assert_eq!(line, "rpm_raw=100");
                    break;
                },
                TransportEvent::Error { message, .. } => panic!("unexpected error: {message}"),
                _ => {},
            }
        }
        assert!(saw_reconnect);
        assert!(transport.is_open("COM1"));
        assert_eq!(transport.send("COM1", b"x").unwrap(), 1);
    }

    #[test]
    fn test_reconnect_releases_old_handles_first() {
        let opener = MockOpener::new();
        // 旧句柄未释放时再次打开会失败
        opener.exclusive_access(true);
        let link = opener.link("COM1");
        let transport = SerialTransport::new(Arc::new(opener.clone()), fast_config());
        let events = transport.subscribe();
        transport.open("COM1", 9600).unwrap();
        assert_eq!(next_event(&events), TransportEvent::Connected { port: "COM1".into() });
        assert_eq!(link.open_handles(), 2);

        link.push_error(ErrorKind::BrokenPipe);
        link.push_line("rpm_raw=250");

        let mut attempts = 0;
        loop {
            match next_event(&events) {
                TransportEvent::ReconnectAttempt { .. } => attempts += 1,
                TransportEvent::Line { line, .. } => {
                    assert_eq!(line, "rpm_raw=250");
                    break;
                },
                TransportEvent::Error { message, .. } => panic!("unexpected error: {message}"),
                _ => {},
            }
        }
        assert_eq!(attempts, 1);
        assert_eq!(opener.open_count("COM1"), 2);
        assert_eq!(link.open_handles(), 2);

        transport.close("COM1");
        assert_eq!(link.open_handles(), 0);
    }

    #[test]
    fn test_slow_open_does_not_block_other_ports() {
        let opener = MockOpener::new();
        opener.delay_opens("COM9", Duration::from_millis(500));
        let link = opener.link("COM1");
        let transport = SerialTransport::new(Arc::new(opener.clone()), fast_config());
        transport.open("COM1", 9600).unwrap();

        std::thread::scope(|s| {
            let slow = s.spawn(|| transport.open("COM9", 9600));

            let deadline = Instant::now() + Duration::from_secs(2);
            while opener.open_count("COM9") == 0 && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            assert_eq!(opener.open_count("COM9"), 1);

            let start = Instant::now();
            assert_eq!(transport.send("COM1", b"PING\r\n").unwrap(), 6);
            assert!(start.elapsed() < transport.config().write_timeout());
            assert!(!transport.is_open("COM9"));

            // 打开进行中的端口不能重复打开
            assert!(matches!(
                transport.open("COM9", 9600),
                Err(TransportError::AlreadyOpen { .. })
            ));

            slow.join().unwrap().unwrap();
        });

        assert!(transport.is_open("COM9"));
        assert_eq!(opener.open_count("COM9"), 1);
        assert_eq!(link.written_text(), vec!["PING\r\n".to_string()]);
    }

    #[test]
    fn test_error_without_auto_reconnect() {
        let opener = MockOpener::new();
        let link = opener.link("COM1");
        let config = TransportConfig {
            auto_reconnect: false,
            ..fast_config()
        };
        let transport = SerialTransport::new(Arc::new(opener.clone()), config);
        let events = transport.subscribe();
        transport.open("COM1", 9600).unwrap();
        link.push_error(ErrorKind::BrokenPipe);

        loop {
            match next_event(&events) {
                TransportEvent::Error { port, .. } => {
                    assert_eq!(port, "COM1");
                    break;
                },
                TransportEvent::ReconnectAttempt { .. } => panic!("no reconnect expected"),
                _ => {},
            }
        }
        assert_eq!(opener.open_count("COM1"), 1);

        // 读循环退出后允许重新打开
        std::thread::sleep(Duration::from_millis(20));
        transport.open("COM1", 9600).unwrap();
        assert!(transport.is_open("COM1"));
    }

    #[test]
    fn test_close_all() {
        let transport = SerialTransport::new(Arc::new(MockOpener::new()), fast_config());
        transport.open("COM1", 9600).unwrap();
        transport.open("COM2", 9600).unwrap();
        assert_eq!(transport.ports(), vec!["COM1".to_string(), "COM2".to_string()]);

        transport.close_all();
        assert!(transport.ports().is_empty());
    }
}
