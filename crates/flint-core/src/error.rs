//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为整个 flint 工作区提供最底层的稳定错误域：所有 crate 的细粒度错误
//!   最终都折叠为携带稳定错误码的 [`StackError`]，方便日志、指标与告警
//!   系统按码值做自动化治理。
//! - 同时收纳传输层拆线时需要逐事务上报的 [`FailureReason`]，保证
//!   发送队列的失败语义在各层之间不失真。
//!
//! ## 设计要求（What）
//! - 错误码为 `'static` 字符串，遵循 `<域>.<语义>` 命名约定并集中登记在
//!   [`codes`] 模块；
//! - `StackError` 实现 `std::error::Error`，可通过 `with_cause` 串联底层
//!   原因，形成 `Impl → Domain → Core` 的错误链；
//! - 各 crate 的 `thiserror` 枚举通过 `From` 转换进入本域，`?` 运算符
//!   直接生效。
//!
//! ## 风险提示（Trade-offs）
//! - `message` 采用 `Cow<'static, str>`，动态拼装描述会产生一次堆分配，
//!   换取排障文案的完整性；热路径应优先使用静态文案。

use std::borrow::Cow;
use std::error::Error;
use std::fmt;

/// 稳定错误码登记处。
///
/// # 教案式说明
/// - **意图 (Why)**：避免调用方散落地手写字符串码值，导致同一语义出现
///   多种拼写；
/// - **契约 (What)**：常量一经发布不得改名或复用；新增码值需同步补充
///   对应模块的文档与测试。
pub mod codes {
    /// 头部扫描器判定报文框架不可恢复地损坏。
    pub const FRAMING_SCANNER: &str = "framing.scanner";
    /// 单条报文的头部字段数量超过硬上限。
    pub const FRAMING_TOO_MANY_HEADERS: &str = "framing.too_many_headers";
    /// 扫描器报告 `NeedMore` 时未消费字节超过硬上限。
    pub const FRAMING_HEADER_FIELD_TOO_LONG: &str = "framing.header_field_too_long";
    /// `Content-Length` 缺失、畸形或超出正文上限。
    pub const FRAMING_CONTENT_LENGTH: &str = "framing.content_length";
    /// 起始行无法解析为合法请求行或状态行。
    pub const FRAMING_START_LINE: &str = "framing.start_line";
    /// 流式连接读写失败或对端挂断。
    pub const TRANSPORT_STREAM: &str = "transport.stream";
    /// 发送队列随连接销毁被整体判失败。
    pub const TRANSPORT_SEND_FAILED: &str = "transport.send_failed";
    /// 报文缺少加解密所需的本地密钥材料且无远端证书仓库可用。
    pub const SMIME_NO_CERTS: &str = "smime.no_certs";
    /// 远端证书仓库返回获取失败。
    pub const SMIME_FETCH_FAILED: &str = "smime.fetch_failed";
    /// 正文树结构非法（如 multipart/signed 部件数不为 2）。
    pub const CONTENTS_STRUCTURE: &str = "contents.structure";
    /// 正文字节无法按声明的 MIME 类型解析。
    pub const CONTENTS_PARSE: &str = "contents.parse";
}

/// `StackError` 是 flint 各层共享的最终错误形态。
///
/// # 教案式说明
/// - **意图 (Why)**：各 crate 的枚举错误在跨层传播前折叠为统一载体，
///   使观测面只需理解一种错误结构；
/// - **契约 (What)**：`code` 必须取自 [`codes`] 或遵循相同命名约定；
///   实例满足 `Send + Sync + 'static`，可跨线程传递；
/// - **执行 (How)**：Builder 风格的 [`with_cause`](Self::with_cause)
///   附加底层原因，`source()` 暴露完整链路。
#[derive(Debug)]
pub struct StackError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl StackError {
    /// 构造一条核心错误。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带底层原因并返回新的错误实例。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取面向排障人员的描述。
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for StackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|boxed| boxed.as_ref() as &(dyn Error + 'static))
    }
}

/// 正文树解析与结构探测的错误。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContentsError {
    /// multipart 正文缺少 `boundary` 参数。
    #[error("multipart body is missing its boundary parameter")]
    MissingBoundary,
    /// 找不到关闭定界符，容器不完整。
    #[error("multipart body terminated without a closing delimiter")]
    UnterminatedMultipart,
    /// part 头部块不是合法的 `Name: value` 行序列。
    #[error("multipart part headers are malformed")]
    MalformedPartHeaders,
    /// `multipart/signed` 的部件数不为 2。
    #[error("multipart/signed requires exactly two parts, found {found}")]
    SignedPartCount {
        /// 实际部件数。
        found: usize,
    },
    /// multipart 容器没有任何部件。
    #[error("multipart container has no parts")]
    EmptyMultipart,
    /// `Content-Type` 文本无法解析。
    #[error("content type `{text}` cannot be parsed")]
    MalformedMime {
        /// 原始文本。
        text: String,
    },
}

impl From<ContentsError> for StackError {
    fn from(value: ContentsError) -> Self {
        let code = match &value {
            ContentsError::SignedPartCount { .. } | ContentsError::EmptyMultipart => {
                codes::CONTENTS_STRUCTURE
            }
            _ => codes::CONTENTS_PARSE,
        };
        StackError::new(code, value.to_string())
    }
}

/// 报文级访问错误：头部缺失或取值畸形。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// 流式传输上 `Content-Length` 强制存在。
    #[error("mandatory Content-Length header is missing")]
    MissingContentLength,
    /// `Content-Length` 取值不是十进制长度。
    #[error("Content-Length value `{text}` is not a valid length")]
    MalformedContentLength {
        /// 原始取值。
        text: String,
    },
    /// 必需头部缺失。
    #[error("header `{name}` is missing")]
    MissingHeader {
        /// 头部名。
        name: &'static str,
    },
    /// 地址类头部无法抽取 AoR。
    #[error("header `{name}` does not contain a parseable address")]
    MalformedAddress {
        /// 头部名。
        name: &'static str,
    },
}

impl From<MessageError> for StackError {
    fn from(value: MessageError) -> Self {
        StackError::new(codes::FRAMING_CONTENT_LENGTH, value.to_string())
    }
}

/// 连接销毁时记录的失败原因，逐事务回报给事务层。
///
/// # 教案式说明
/// - **意图 (Why)**：发送队列中尚未写完的报文必须带着“为什么失败”离场，
///   事务层据此决定重试或向上报错；
/// - **契约 (What)**：`None` 仅作为连接存活期间的占位值；销毁路径必须
///   先落一个具体原因再清空队列。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailureReason {
    /// 连接仍然存活，尚无失败。
    #[default]
    None,
    /// 对端正常或异常关闭了连接。
    ConnectionClosed,
    /// 本端传输整体停机。
    TransportShutdown,
    /// 底层写操作报错。
    WriteFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::None => "none",
            FailureReason::ConnectionClosed => "connection closed",
            FailureReason::TransportShutdown => "transport shutdown",
            FailureReason::WriteFailed => "write failed",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_error_exposes_code_and_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err = StackError::new(codes::TRANSPORT_STREAM, "peer reset").with_cause(io);
        assert_eq!(err.code(), "transport.stream");
        assert!(err.source().is_some(), "底层原因应沿 source() 链路可见");
        assert_eq!(format!("{err}"), "[transport.stream] peer reset");
    }
}
