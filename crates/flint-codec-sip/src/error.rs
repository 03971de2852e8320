//! 编解码错误类型。
//!
//! ## 模块目的（Why）
//! - 把扫描与解析两个阶段的失败分别归档：扫描错误意味着字节流框架
//!   已不可恢复，解析错误则只作用于单条报文；
//! - 错误枚举不引用输入缓冲，避免生命周期纠缠，可安全进入日志。
//!
//! ## 使用契约（What）
//! - 扫描相关 API 返回 [`ScanError`]；起始行解析返回 [`SipParseError`]；
//! - 两者都可通过 `From` 折叠进 `flint_core::StackError`，错误码分别为
//!   `framing.scanner` 与 `framing.start_line`。

use flint_core::error::{codes, StackError};

/// 头部扫描阶段的不可恢复错误。
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// 行以裸 LF 结束，缺少前导 CR。
    #[error("header line terminated by bare LF")]
    BareLineFeed,
    /// 起始行位置出现空行。
    #[error("empty start line")]
    EmptyStartLine,
    /// 头部字段缺少冒号分隔符。
    #[error("header field has no colon separator")]
    MissingColon,
    /// 冒号前没有任何字段名字符。
    #[error("header field name is empty")]
    EmptyHeaderName,
    /// 折行出现在首个头部字段之前，无可归属字段。
    #[error("continuation line without a preceding header field")]
    StrayContinuation,
}

impl From<ScanError> for StackError {
    fn from(value: ScanError) -> Self {
        StackError::new(codes::FRAMING_SCANNER, value.to_string())
    }
}

/// 起始行解析错误。
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SipParseError {
    /// 请求行不符合 `METHOD SP URI SP SIP/2.0`。
    #[error("request line does not match `METHOD SP URI SP SIP/2.0`")]
    InvalidRequestLine,
    /// 状态行不符合 `SIP/2.0 SP Status-Code SP Reason`。
    #[error("status line does not match `SIP/2.0 SP Status-Code SP Reason`")]
    InvalidStatusLine,
    /// 版本号不是 `SIP/2.0`。
    #[error("only SIP/2.0 is supported")]
    UnsupportedVersion,
    /// 起始行不是合法 UTF-8。
    #[error("start line is not valid UTF-8")]
    NotUtf8,
}

impl From<SipParseError> for StackError {
    fn from(value: SipParseError) -> Self {
        StackError::new(codes::FRAMING_START_LINE, value.to_string())
    }
}
