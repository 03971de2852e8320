//! # flint-core
//!
//! ## 定位与职责（Why）
//! - 作为 flint SIP endpoint 工作区的模型层，收纳报文、正文树、安全
//!   属性、对端标识与事务 FIFO 等被编解码、传输与 S/MIME 特性共同
//!   依赖的类型，避免上层 crate 之间出现环状引用。
//! - 本 crate 不做 IO、不绑定运行时：帧读取与套接字归
//!   `flint-transport-tcp`，解析细节归 `flint-codec-sip`，加解密流程归
//!   `flint-smime`。
//!
//! ## 架构嵌入（Where）
//! - `message` / `contents` / `security` 构成报文数据模型；
//! - `txn` 是传输线程与事务线程之间唯一的跨线程交接面；
//! - `error` 定义稳定错误码域，各 crate 的细粒度错误折叠于此；
//! - `config` 收纳流式接收侧的防御限额。
//!
//! ## Feature 策略（Trade-offs）
//! - 纯 `std` 实现，无可选特性：模型层的体积与依赖都很小，按需裁剪
//!   的收益不抵维护两套 cfg 的成本。

/// Address-of-Record 值类型与抽取工具。
pub mod aor;

/// 流式接收侧限额配置。
pub mod config;

/// 正文树与 MIME 处理。
pub mod contents;

/// 对端标识。
pub mod endpoint;

/// 稳定错误码域与失败原因。
pub mod error;

/// SIP 报文模型。
pub mod message;

/// 逐报文安全属性。
pub mod security;

/// 事务 FIFO 与拥塞快照。
pub mod txn;

pub use aor::Aor;
pub use config::StreamLimits;
pub use contents::{Contents, Mime};
pub use endpoint::{Endpoint, TransportKind};
pub use error::{ContentsError, FailureReason, MessageError, StackError};
pub use message::{HeaderField, Method, SipMessage, StartLine};
pub use security::{EncryptionLevel, IdentityStrength, SecurityAttributes, SignatureStatus};
pub use txn::{
    CongestionPolicy, CongestionSnapshot, RejectionBehavior, SendFailureSink, TransactionFifo,
};
