//! 传输层错误类型。
//!
//! ## 角色定位（Why）
//! - 把帧读取路径上的各种丢弃原因归为一个枚举：调用方（驱动或测试）
//!   据此决定记日志后继续收流，还是直接关断连接；
//! - 与 `flint_core::error::codes` 的框架错误码一一对应，保证观测面
//!   语义稳定。
//!
//! ## 使用契约（What）
//! - [`FramingError`] 返回时，连接状态机已经完成自愈：当前报文与缓冲
//!   被丢弃，状态回到 `NewMessage`，连接可以继续使用。

use flint_core::error::{codes, StackError};
use flint_core::MessageError;
use flint_codec_sip::{ScanError, SipParseError};

/// 帧读取失败的具体原因。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// 头部扫描器判定字节流框架损坏。
    #[error("header scan failed: {0}")]
    Scan(#[from] ScanError),
    /// 起始行无法解析。
    #[error("start line rejected: {0}")]
    StartLine(#[from] SipParseError),
    /// 头部字段数量超过上限。
    #[error("message exceeds {limit} header fields")]
    TooManyHeaders {
        /// 生效的上限。
        limit: usize,
    },
    /// `NeedMore` 时未消费头部字节超过上限。
    #[error("unconsumed header bytes exceed {limit}")]
    HeaderFieldTooLong {
        /// 生效的上限。
        limit: usize,
    },
    /// `Content-Length` 缺失或畸形。
    #[error("content length rejected: {0}")]
    ContentLength(#[from] MessageError),
    /// 正文长度超过上限。
    #[error("body of {length} bytes exceeds limit {limit}")]
    BodyTooLarge {
        /// 声明的正文长度。
        length: usize,
        /// 生效的上限。
        limit: usize,
    },
}

impl From<FramingError> for StackError {
    fn from(value: FramingError) -> Self {
        let code = match &value {
            FramingError::Scan(_) | FramingError::StartLine(_) => codes::FRAMING_SCANNER,
            FramingError::TooManyHeaders { .. } => codes::FRAMING_TOO_MANY_HEADERS,
            FramingError::HeaderFieldTooLong { .. } => codes::FRAMING_HEADER_FIELD_TOO_LONG,
            FramingError::ContentLength(_) | FramingError::BodyTooLarge { .. } => {
                codes::FRAMING_CONTENT_LENGTH
            }
        };
        StackError::new(code, value.to_string())
    }
}
