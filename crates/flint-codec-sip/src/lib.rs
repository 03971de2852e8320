//! # flint-codec-sip
//!
//! ## 定位与职责（Why）
//! - 为流式传输提供 SIP 报文的增量编解码能力：可跨任意分片续扫的
//!   头部扫描器、起始行解析、以及 503/415 本地响应的构造。
//! - 本 crate 不持有连接状态：缓冲的增长与移位、限额的执行、报文的
//!   装配与投递全部归 `flint-transport-tcp` 的帧读取器。
//!
//! ## 架构嵌入（Where）
//! - `scan` 是帧读取器 `ReadingHeaders` 状态的核心依赖；
//! - `parse` 在扫描器首次提交时把起始行定型为 `flint_core::StartLine`；
//! - `fmt` / `check` 服务于入队前的拒绝路径与结构把关。
//!
//! ## 设计要点（Trade-offs）
//! - 扫描器只向前推进、绝不重扫，换来的约束是调用方必须维护
//!   “未消费前缀在区域头部”的缓冲纪律；
//! - 深层头部文法（URI 参数、`Via` 各参数）不在本 crate 展开，保持
//!   编解码层的最小职责。

/// 入队前的廉价结构检查。
pub mod check;

/// 编解码错误类型。
pub mod error;

/// 本地响应构造。
pub mod fmt;

/// 起始行解析。
pub mod parse;

/// 增量头部扫描器。
pub mod scan;

pub use check::basic_check;
pub use error::{ScanError, SipParseError};
pub use fmt::{make_415, make_503, make_response};
pub use parse::parse_start_line;
pub use scan::{HeaderScanner, ScanStatus, ScannedField};
