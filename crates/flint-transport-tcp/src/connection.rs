//! 逐连接帧读取状态机。
//!
//! ## 模块目标（Why）
//! - 把一条 TCP/TLS 字节流切成离散的 SIP 报文：容忍任意分片、处理
//!   流水线化的连续报文、识别双 CRLF 保活、对畸形输入自愈，并在下游
//!   拥塞时走拒绝路径。
//! - 状态全部驻留在 [`Connection`] 里，读处理函数返回即挂起；一条
//!   连接同一时刻只被一个传输任务驱动，无内部锁。
//!
//! ## 状态契约（What）
//! - 三态：`NewMessage`（初始）→ `ReadingHeaders` → `PartialBody`，
//!   报文完成或出错后回到 `NewMessage`；
//! - 头部字节在扫描器首次取得进展时即移交报文所有（`split_to` +
//!   `freeze`，零拷贝），未消费字节留在缓冲头部；
//! - 入队前按下游 FIFO 的拥塞快照执行拒绝策略，被拒的请求以 503 回写
//!   到本连接的发送队列；
//! - 帧错误丢弃当前报文与缓冲并复位状态，连接本身可继续收流。
//!
//! ## 缓冲策略（How）
//! - 增长遵循 `max(3/2 × 未消费, 基线)`，正文阶段封顶 `content_length`；
//! - [`Connection::read_buffer`] 按状态预留可写空间，驱动直接
//!   `read_buf` 进缓冲，避免二次拷贝。
//!
//! ## 风险提示（Trade-offs）
//! - 严格要求 CRLF 行终结与精确的双 CRLF 保活；宽容解析不在目标内；
//! - `Content-Length` 在流式传输上强制存在，缺失即丢弃。

use std::time::Instant;

use bytes::{Bytes, BytesMut};
use flint_codec_sip::scan::{HeaderScanner, ScanStatus, ScannedField};
use flint_codec_sip::{basic_check, make_503, parse_start_line, ScanError};
use flint_core::error::FailureReason;
use flint_core::message::{HeaderField, SipMessage};
use flint_core::txn::{RejectionBehavior, TransactionFifo};
use flint_core::{Endpoint, StreamLimits};
use tracing::{debug, warn};

use crate::error::FramingError;
use crate::send::{FailedSend, SendData, SendQueue};

const CRLFCRLF: &[u8] = b"\r\n\r\n";

/// 帧读取器的三个状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    /// 等待新报文的首字节。
    NewMessage,
    /// 起始行与头部块扫描中。
    ReadingHeaders,
    /// 头部完毕，正文尚未收齐。
    PartialBody,
}

/// 单条流式连接的接收与发送状态。
pub struct Connection {
    peer_addrs: Vec<Endpoint>,
    tls_domain: Option<String>,
    tls_peer_names: Vec<String>,
    limits: StreamLimits,
    state: ConnState,
    buffer: BytesMut,
    scanner: HeaderScanner,
    message: Option<SipMessage>,
    content_length: usize,
    send_queue: SendQueue,
    failure_reason: FailureReason,
    last_used: Instant,
    ping_hook: Option<Box<dyn FnMut() + Send>>,
}

impl Connection {
    /// 为一个已建立的流创建读取器。
    pub fn new(peer: Endpoint, limits: StreamLimits) -> Self {
        Self {
            peer_addrs: vec![peer],
            tls_domain: None,
            tls_peer_names: Vec::new(),
            limits,
            state: ConnState::NewMessage,
            buffer: BytesMut::with_capacity(limits.chunk_size()),
            scanner: HeaderScanner::new(),
            message: None,
            content_length: 0,
            send_queue: SendQueue::new(),
            failure_reason: FailureReason::None,
            last_used: Instant::now(),
            ping_hook: None,
        }
    }

    /// 记录接收侧 TLS 域名，随后的报文都会带上它。
    pub fn with_tls_domain(mut self, domain: impl Into<String>) -> Self {
        self.tls_domain = Some(domain.into());
        self
    }

    /// 记录 TLS 对端证书中的已验证名字。
    pub fn with_tls_peer_names(mut self, names: Vec<String>) -> Self {
        self.tls_peer_names = names;
        self
    }

    /// 安装双 CRLF 保活钩子。
    pub fn set_ping_hook(&mut self, hook: Box<dyn FnMut() + Send>) {
        self.ping_hook = Some(hook);
    }

    /// 当前状态。
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// 对端标识（列表首位的当前地址）。
    pub fn peer(&self) -> &Endpoint {
        self.primary_peer()
    }

    /// 已知的对端地址列表，首位为当前使用的地址。
    pub fn peer_addrs(&self) -> &[Endpoint] {
        &self.peer_addrs
    }

    /// 整体替换对端地址列表；空列表被忽略。
    pub fn set_peer_addrs(&mut self, peer_addrs: Vec<Endpoint>) {
        if peer_addrs.is_empty() {
            debug_assert!(false, "对端地址列表不得为空");
            return;
        }
        self.peer_addrs = peer_addrs;
    }

    fn primary_peer(&self) -> &Endpoint {
        &self.peer_addrs[0]
    }

    /// 最近一次收发活动的时间戳，供空闲清扫使用。
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// 预先登记失败原因，拆线时随队列上报。
    pub fn set_failure_reason(&mut self, reason: FailureReason) {
        self.failure_reason = reason;
    }

    /// 按当前状态预留可写空间并暴露缓冲，驱动直接读入其尾部。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：返回后缓冲保证有非零可写容量；`PartialBody`
    ///   阶段的预留不超过正文剩余量，增长倍率与
    ///   [`Connection::process`] 的策略一致。
    pub fn read_buffer(&mut self) -> &mut BytesMut {
        let len = self.buffer.len();
        let target = match self.state {
            ConnState::NewMessage | ConnState::ReadingHeaders => len + self.limits.chunk_size(),
            ConnState::PartialBody => {
                let remaining = self.content_length.saturating_sub(len);
                let step = remaining.min((len / 2).max(self.limits.chunk_size()));
                len + step.max(1)
            }
        };
        self.reserve_to(target);
        &mut self.buffer
    }

    /// 测试与内嵌场景的便捷入口：追加一段字节并立即推进状态机。
    pub fn ingest(&mut self, chunk: &[u8], fifo: &TransactionFifo) -> Result<(), FramingError> {
        self.buffer.extend_from_slice(chunk);
        self.process(fifo)
    }

    /// 对缓冲内的新字节运行状态机，直至需要更多输入。
    pub fn process(&mut self, fifo: &TransactionFifo) -> Result<(), FramingError> {
        self.last_used = Instant::now();
        loop {
            match self.state {
                ConnState::NewMessage => {
                    if self.buffer.is_empty() {
                        return Ok(());
                    }
                    if self.buffer.len() < CRLFCRLF.len()
                        && CRLFCRLF.starts_with(&self.buffer)
                    {
                        // 可能是保活的前缀，等齐 4 字节再裁决。
                        return Ok(());
                    }
                    if self.buffer.starts_with(CRLFCRLF) {
                        debug!(target: "flint::transport::tcp", peer = %self.primary_peer(), "收到双 CRLF 保活");
                        let _ = self.buffer.split_to(CRLFCRLF.len());
                        if let Some(hook) = self.ping_hook.as_mut() {
                            hook();
                        }
                        continue;
                    }
                    self.scanner = HeaderScanner::new();
                    self.message = None;
                    self.state = ConnState::ReadingHeaders;
                }
                ConnState::ReadingHeaders => {
                    let status = match self.scanner.scan_chunk(&self.buffer) {
                        Ok(status) => status,
                        Err(err) => {
                            warn!(target: "flint::transport::tcp", peer = %self.primary_peer(), error = %err, "丢弃无法成帧的报文");
                            return Err(self.reset_framing(err.into()));
                        }
                    };
                    if self.scanner.header_count() > self.limits.max_headers() {
                        warn!(target: "flint::transport::tcp", peer = %self.primary_peer(), "丢弃报文：头部字段过多");
                        return Err(self.reset_framing(FramingError::TooManyHeaders {
                            limit: self.limits.max_headers(),
                        }));
                    }
                    match status {
                        ScanStatus::NeedMore { consumed } => {
                            let unconsumed = self.buffer.len() - consumed;
                            if unconsumed > self.limits.max_header_bytes() {
                                warn!(target: "flint::transport::tcp", peer = %self.primary_peer(), "丢弃报文：头部字段超长");
                                return Err(self.reset_framing(FramingError::HeaderFieldTooLong {
                                    limit: self.limits.max_header_bytes(),
                                }));
                            }
                            if consumed == 0 {
                                // 扫描器毫无进展，只能扩容等待更多字节。
                                let target =
                                    (unconsumed * 3 / 2).max(self.limits.chunk_size());
                                self.reserve_to(target);
                                return Ok(());
                            }
                            let scanned = self.buffer.split_to(consumed).freeze();
                            if let Err(err) = self.attach_scanned(scanned) {
                                return Err(self.reset_framing(err));
                            }
                            self.reserve_to(self.buffer.len() + self.limits.chunk_size());
                            return Ok(());
                        }
                        ScanStatus::Complete { consumed } => {
                            let scanned = self.buffer.split_to(consumed).freeze();
                            if let Err(err) = self.attach_scanned(scanned) {
                                return Err(self.reset_framing(err));
                            }
                            let Some(message) = self.message.as_ref() else {
                                // 扫描器契约保证起始行先于 Complete 提交。
                                debug_assert!(false, "Complete 前必有起始行");
                                return Err(self.reset_framing(FramingError::Scan(
                                    ScanError::EmptyStartLine,
                                )));
                            };
                            let content_length = match message.content_length() {
                                Ok(value) => value,
                                Err(err) => {
                                    warn!(target: "flint::transport::tcp", peer = %self.primary_peer(), error = %err, "丢弃报文：Content-Length 不可用");
                                    return Err(self.reset_framing(err.into()));
                                }
                            };
                            if content_length > self.limits.max_body_bytes() {
                                warn!(target: "flint::transport::tcp", peer = %self.primary_peer(), length = content_length, "丢弃报文：正文超过上限");
                                return Err(self.reset_framing(FramingError::BodyTooLarge {
                                    length: content_length,
                                    limit: self.limits.max_body_bytes(),
                                }));
                            }
                            self.content_length = content_length;
                            if self.buffer.len() < content_length {
                                let unconsumed = self.buffer.len();
                                let target = (unconsumed * 3 / 2)
                                    .max(self.limits.chunk_size())
                                    .min(content_length);
                                self.reserve_to(target);
                                self.state = ConnState::PartialBody;
                                // 余下字节不足正文，等待更多输入。
                                return Ok(());
                            }
                            self.finish_message(fifo);
                            // 缓冲中的悬垂字节属于下一条报文，回到起点继续。
                        }
                    }
                }
                ConnState::PartialBody => {
                    if self.buffer.len() < self.content_length {
                        if self.buffer.len() == self.buffer.capacity() {
                            let target =
                                (self.buffer.capacity() * 3 / 2).min(self.content_length);
                            self.reserve_to(target);
                        }
                        return Ok(());
                    }
                    self.finish_message(fifo);
                }
            }
        }
    }

    /// 入队一条出站载荷。
    pub fn enqueue_send(&mut self, data: SendData) {
        self.last_used = Instant::now();
        self.send_queue.push(data);
    }

    /// 队首尚未写出的字节。
    pub fn pending_write(&self) -> Option<&[u8]> {
        self.send_queue.pending()
    }

    /// 写出 `written` 字节后推进发送游标。
    pub fn advance_write(&mut self, written: usize) -> bool {
        self.last_used = Instant::now();
        self.send_queue.advance(written)
    }

    /// 销毁连接：清空发送队列并产出逐事务失败记录。
    pub fn close(&mut self, reason: FailureReason) -> Vec<FailedSend> {
        self.failure_reason = reason;
        self.buffer.clear();
        self.message = None;
        self.state = ConnState::NewMessage;
        self.send_queue.fail_all(reason)
    }

    /// 把扫描器移交的前缀落到在装配的报文上。
    fn attach_scanned(&mut self, scanned: Bytes) -> Result<(), FramingError> {
        for field in self.scanner.take_fields() {
            match field {
                ScannedField::StartLine { line } => {
                    let start_line = parse_start_line(&scanned[line.clone()])?;
                    let mut message = SipMessage::with_start_line(start_line);
                    message.set_source(*self.primary_peer());
                    if let Some(domain) = &self.tls_domain {
                        message.set_tls_domain(domain.clone());
                    }
                    if !self.tls_peer_names.is_empty() {
                        message.set_tls_peer_names(self.tls_peer_names.clone());
                    }
                    self.message = Some(message);
                }
                ScannedField::Header { name, value } => {
                    if let Some(message) = self.message.as_mut() {
                        message.push_header(HeaderField::new(
                            scanned.slice(name),
                            scanned.slice(value),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// 取正文、过拥塞与结构检查，然后投递。
    fn finish_message(&mut self, fifo: &TransactionFifo) {
        let body = self.buffer.split_to(self.content_length).freeze();
        self.state = ConnState::NewMessage;
        let Some(mut message) = self.message.take() else {
            return;
        };
        message.set_raw_body(body);

        let snapshot = fifo.congestion();
        let reject = match snapshot.behavior {
            RejectionBehavior::Normal => false,
            RejectionBehavior::RejectingNewWork => message.is_request(),
            RejectionBehavior::RejectingNonEssential => true,
        };
        if reject {
            debug!(
                target: "flint::transport::tcp",
                peer = %self.primary_peer(),
                behavior = ?snapshot.behavior,
                "下游拥塞，丢弃入站报文"
            );
            if let Some(reply) = make_503(&message, snapshot.expected_wait) {
                let payload = reply.encode();
                self.send_queue
                    .push(SendData::new(*self.primary_peer(), payload, None, false));
            }
            return;
        }
        if !basic_check(&message) {
            debug!(target: "flint::transport::tcp", peer = %self.primary_peer(), "basic check 未通过，静默丢弃");
            return;
        }
        fifo.push(message);
    }

    /// 帧错误自愈：丢报文、清缓冲、回到初始状态。
    fn reset_framing(&mut self, error: FramingError) -> FramingError {
        self.buffer.clear();
        self.message = None;
        self.scanner = HeaderScanner::new();
        self.state = ConnState::NewMessage;
        error
    }

    fn reserve_to(&mut self, target_capacity: usize) {
        let needed = target_capacity.saturating_sub(self.buffer.capacity());
        if needed > 0 {
            self.buffer.reserve(needed);
        } else if self.buffer.capacity() == self.buffer.len() {
            // 容量被既有字节占满时至少保证可写一步。
            self.buffer.reserve(self.limits.chunk_size());
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.send_queue.is_empty() {
            let reason = match self.failure_reason {
                FailureReason::None => FailureReason::ConnectionClosed,
                other => other,
            };
            let _ = self.send_queue.fail_all(reason);
        }
    }
}
