//! 事务层交接点：跨线程 FIFO 与拥塞快照。
//!
//! ## 角色定位（Why）
//! - 帧读取器在各自的传输线程上产出报文，事务层在另一个线程上消费，
//!   [`TransactionFifo`] 是两者之间唯一的跨线程交接点；
//! - 入队前读取器要先询问“下游还接不接活”，[`CongestionPolicy`] 把队列
//!   深度折算成三档拒绝行为与预期等待时长。
//!
//! ## 行为契约（What）
//! - `push`/`pop` 线程安全，FIFO 保序；
//! - [`TransactionFifo::congestion`] 返回的快照是入队决策的依据：
//!   `Normal` 正常入队，`RejectingNewWork` 丢请求并回 503（响应放行），
//!   `RejectingNonEssential` 丢弃一切并在可行时回 503；
//! - [`SendFailureSink`] 是发送队列拆线时逐事务上报失败的回调面。
//!
//! ## 风险提示（Trade-offs）
//! - 预期等待按“队列深度 × 单报文开销”线性估算，只求量级正确；
//!   精确的拥塞控制属于上层调度器的职责。

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::FailureReason;
use crate::message::SipMessage;

/// 下游队列的拒绝行为档位。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionBehavior {
    /// 正常接收。
    Normal,
    /// 拒绝新增工作：丢请求、收响应。
    RejectingNewWork,
    /// 拒绝一切非必要工作。
    RejectingNonEssential,
}

/// 入队决策用的拥塞快照。
#[derive(Clone, Copy, Debug)]
pub struct CongestionSnapshot {
    /// 当前拒绝档位。
    pub behavior: RejectionBehavior,
    /// 预计排空等待，回填 503 的 `Retry-After`。
    pub expected_wait: Duration,
}

/// 队列深度到拒绝档位的折算配置。
#[derive(Clone, Copy, Debug)]
pub struct CongestionPolicy {
    new_work_limit: usize,
    non_essential_limit: usize,
    wait_per_message: Duration,
}

impl CongestionPolicy {
    /// 覆盖“拒绝新增工作”的深度阈值（默认 64）。
    pub fn with_new_work_limit(mut self, value: usize) -> Self {
        self.new_work_limit = value;
        self
    }

    /// 覆盖“拒绝一切”的深度阈值（默认 256）。
    pub fn with_non_essential_limit(mut self, value: usize) -> Self {
        self.non_essential_limit = value;
        self
    }

    /// 覆盖单报文的估算处理开销（默认 20ms）。
    pub fn with_wait_per_message(mut self, value: Duration) -> Self {
        self.wait_per_message = value;
        self
    }

    fn snapshot(&self, depth: usize) -> CongestionSnapshot {
        let behavior = if depth >= self.non_essential_limit {
            RejectionBehavior::RejectingNonEssential
        } else if depth >= self.new_work_limit {
            RejectionBehavior::RejectingNewWork
        } else {
            RejectionBehavior::Normal
        };
        CongestionSnapshot {
            behavior,
            expected_wait: self.wait_per_message.saturating_mul(depth as u32),
        }
    }
}

impl Default for CongestionPolicy {
    fn default() -> Self {
        Self {
            new_work_limit: 64,
            non_essential_limit: 256,
            wait_per_message: Duration::from_millis(20),
        }
    }
}

/// 送往事务层的有序报文队列。
#[derive(Debug, Default)]
pub struct TransactionFifo {
    inner: Mutex<VecDeque<SipMessage>>,
    policy: CongestionPolicy,
}

impl TransactionFifo {
    /// 以默认拥塞配置构造。
    pub fn new() -> Self {
        Self::with_policy(CongestionPolicy::default())
    }

    /// 指定拥塞配置构造。
    pub fn with_policy(policy: CongestionPolicy) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            policy,
        }
    }

    /// 入队一条报文。
    pub fn push(&self, message: SipMessage) {
        self.inner.lock().push_back(message);
    }

    /// 出队队首报文。
    pub fn pop(&self) -> Option<SipMessage> {
        self.inner.lock().pop_front()
    }

    /// 当前深度。
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// 读取入队决策用的拥塞快照。
    pub fn congestion(&self) -> CongestionSnapshot {
        self.policy.snapshot(self.len())
    }
}

/// 发送失败回报契约：连接拆线时逐事务通知。
pub trait SendFailureSink: Send + Sync {
    /// 报告 `transaction_id` 对应的出站报文以 `reason` 失败。
    fn transmission_failed(&self, transaction_id: &str, reason: FailureReason);
}
