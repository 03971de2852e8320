//! 逐连接发送队列。
//!
//! ## 模块目标（Why）
//! - 流式传输的写操作可能只写出部分字节；队列为每条出站载荷维护可续
//!   写游标，保证报文字节在连接上严格按入队顺序、不交错地发出。
//!
//! ## 行为契约（What）
//! - [`SendQueue::advance`] 推进队首游标，整条写完时出队并复位；
//! - 连接销毁时 [`SendQueue::fail_all`] 清空队列，携带事务标识的条目
//!   以记录的失败原因逐一上报（见
//!   [`SendFailureSink`](flint_core::txn::SendFailureSink)）；
//! - 入队本身是 O(1)，队列之间不做公平性调度。
//!
//! ## 风险提示（Trade-offs）
//! - 本地生成的回执（如 503）不携带事务标识，失败时静默丢弃；
//!   `is_important` 只影响日志等级，不改变上报行为。

use std::collections::VecDeque;

use bytes::Bytes;
use flint_core::error::FailureReason;
use flint_core::Endpoint;
use tracing::{debug, warn};

/// 一条待写出的出站载荷。
#[derive(Clone, Debug)]
pub struct SendData {
    destination: Endpoint,
    payload: Bytes,
    transaction_id: Option<String>,
    is_important: bool,
}

impl SendData {
    /// 构造出站载荷。
    pub fn new(
        destination: Endpoint,
        payload: Bytes,
        transaction_id: Option<String>,
        is_important: bool,
    ) -> Self {
        Self {
            destination,
            payload,
            transaction_id,
            is_important,
        }
    }

    /// 写出目的地。
    pub fn destination(&self) -> &Endpoint {
        &self.destination
    }

    /// 载荷字节。
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// 所属事务标识（本地生成的回执为 `None`）。
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    /// 失败时是否值得告警。
    pub fn is_important(&self) -> bool {
        self.is_important
    }
}

/// 发送失败的上报载荷。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedSend {
    /// 失败条目的事务标识。
    pub transaction_id: String,
    /// 连接记录的失败原因。
    pub reason: FailureReason,
}

/// 带可续写游标的有序发送队列。
#[derive(Debug, Default)]
pub struct SendQueue {
    queue: VecDeque<SendData>,
    send_pos: usize,
}

impl SendQueue {
    /// 构造空队列。
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队一条载荷。
    pub fn push(&mut self, data: SendData) {
        self.queue.push_back(data);
    }

    /// 队列深度。
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 队首尚未写出的字节切片。
    pub fn pending(&self) -> Option<&[u8]> {
        self.queue
            .front()
            .map(|data| &data.payload()[self.send_pos..])
    }

    /// 推进游标 `written` 字节；整条写完时出队复位并返回 `true`。
    pub fn advance(&mut self, written: usize) -> bool {
        let Some(head) = self.queue.front() else {
            debug_assert!(written == 0, "空队列不应有写出量");
            return false;
        };
        self.send_pos += written;
        debug_assert!(self.send_pos <= head.payload().len());
        if self.send_pos == head.payload().len() {
            self.queue.pop_front();
            self.send_pos = 0;
            return true;
        }
        false
    }

    /// 清空队列，逐条折算为失败上报。
    pub fn fail_all(&mut self, reason: FailureReason) -> Vec<FailedSend> {
        self.send_pos = 0;
        let mut failed = Vec::new();
        while let Some(data) = self.queue.pop_front() {
            match data.transaction_id() {
                Some(tid) => {
                    if data.is_important() {
                        warn!(
                            target: "flint::transport::tcp",
                            transaction_id = tid,
                            %reason,
                            "出站报文随连接销毁而失败"
                        );
                    }
                    failed.push(FailedSend {
                        transaction_id: tid.to_owned(),
                        reason,
                    });
                }
                None => {
                    debug!(
                        target: "flint::transport::tcp",
                        destination = %data.destination(),
                        "本地回执随连接销毁而丢弃"
                    );
                }
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use flint_core::TransportKind;

    fn endpoint() -> Endpoint {
        Endpoint::new(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5060),
            TransportKind::Tcp,
        )
    }

    fn send(tid: Option<&str>, payload: &'static [u8]) -> SendData {
        SendData::new(
            endpoint(),
            Bytes::from_static(payload),
            tid.map(str::to_owned),
            tid.is_some(),
        )
    }

    #[test]
    fn partial_writes_resume_from_cursor() {
        let mut queue = SendQueue::new();
        queue.push(send(Some("t1"), b"hello"));
        queue.push(send(Some("t2"), b"world"));

        assert_eq!(queue.pending().unwrap(), b"hello");
        assert!(!queue.advance(3));
        assert_eq!(queue.pending().unwrap(), b"lo");
        assert!(queue.advance(2), "整条写完应出队");
        assert_eq!(queue.pending().unwrap(), b"world");
    }

    #[test]
    fn teardown_fails_transactions_with_recorded_reason() {
        let mut queue = SendQueue::new();
        queue.push(send(Some("t1"), b"a"));
        queue.push(send(None, b"generated 503"));
        queue.push(send(Some("t2"), b"b"));

        let failed = queue.fail_all(FailureReason::ConnectionClosed);
        assert_eq!(
            failed,
            vec![
                FailedSend {
                    transaction_id: "t1".into(),
                    reason: FailureReason::ConnectionClosed
                },
                FailedSend {
                    transaction_id: "t2".into(),
                    reason: FailureReason::ConnectionClosed
                },
            ],
            "无事务标识的本地回执不上报"
        );
        assert!(queue.is_empty());
    }
}
