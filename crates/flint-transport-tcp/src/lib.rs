//! # flint-transport-tcp
//!
//! ## 定位与职责（Why）
//! - 提供 SIP endpoint 在流式传输（TCP，以及由上层完成握手的 TLS）上
//!   的接收与发送通道：逐连接的帧读取状态机、带续写游标的发送队列，
//!   以及把二者接到 Tokio 套接字的驱动任务。
//! - 报文模型与扫描、解析能力分别来自 `flint-core` 与
//!   `flint-codec-sip`；本 crate 专注连接生命周期与缓冲纪律。
//!
//! ## 架构嵌入（Where）
//! - `connection` 是可独立测试的无 IO 状态机，`driver` 是它在 Tokio
//!   运行时上的宿主；
//! - 出帧报文经 `flint_core::txn::TransactionFifo` 交给事务层，连接
//!   拆除时经 `SendFailureSink` 逐事务上报发送失败。
//!
//! ## 并发模型（Trade-offs）
//! - 一条连接由一个任务独占驱动（单线程协作），状态无锁；多条连接
//!   并行互不干扰；跨线程交接只发生在 FIFO 上。

/// 帧读取状态机。
pub mod connection;

/// Tokio 驱动与监听循环。
pub mod driver;

/// 传输层错误类型。
pub mod error;

/// 发送队列。
pub mod send;

pub use connection::{ConnState, Connection};
pub use driver::{Acceptor, DriverHandle, StreamDriver};
pub use error::FramingError;
pub use send::{FailedSend, SendData, SendQueue};
