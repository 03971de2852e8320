//! 起始行解析。
//!
//! ## 模块目的（Why）
//! - 帧读取器在扫描器首次提交时就要判别请求/响应（拥塞丢弃与 503
//!   生成都依赖方向），因此起始行在装配期立即解析定型。
//!
//! ## 使用契约（What）
//! - [`parse_start_line`] 接受不含 CRLF 的行字节，返回
//!   `flint_core::StartLine`；任何畸形按 [`SipParseError`] 报告，由
//!   调用方升级为框架错误。
//!
//! ## 实现策略（How）
//! - 请求行与状态行靠 `SIP/2.0 ` 前缀区分；
//! - 版本号严格匹配 `SIP/2.0`，不做大版本兼容。

use flint_core::message::{Method, StartLine};

use crate::error::SipParseError;

const VERSION: &str = "SIP/2.0";

/// 解析起始行（不含 CRLF）。
pub fn parse_start_line(line: &[u8]) -> Result<StartLine, SipParseError> {
    let text = std::str::from_utf8(line).map_err(|_| SipParseError::NotUtf8)?;

    if let Some(rest) = text.strip_prefix("SIP/") {
        return parse_status_line(rest);
    }
    parse_request_line(text)
}

fn parse_status_line(after_prefix: &str) -> Result<StartLine, SipParseError> {
    // `after_prefix` 形如 `2.0 200 OK`。
    let (version_rest, after_version) = after_prefix
        .split_once(' ')
        .ok_or(SipParseError::InvalidStatusLine)?;
    if format!("SIP/{version_rest}") != VERSION {
        return Err(SipParseError::UnsupportedVersion);
    }

    let (code_text, reason) = match after_version.split_once(' ') {
        Some((code, reason)) => (code, reason),
        None => (after_version, ""),
    };
    if code_text.len() != 3 || !code_text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SipParseError::InvalidStatusLine);
    }
    let code: u16 = code_text
        .parse()
        .map_err(|_| SipParseError::InvalidStatusLine)?;

    Ok(StartLine::Response {
        code,
        reason: reason.to_owned(),
    })
}

fn parse_request_line(text: &str) -> Result<StartLine, SipParseError> {
    let mut pieces = text.split(' ');
    let method = pieces.next().ok_or(SipParseError::InvalidRequestLine)?;
    let uri = pieces.next().ok_or(SipParseError::InvalidRequestLine)?;
    let version = pieces.next().ok_or(SipParseError::InvalidRequestLine)?;
    if pieces.next().is_some() || method.is_empty() || uri.is_empty() {
        return Err(SipParseError::InvalidRequestLine);
    }
    if version != VERSION {
        return Err(SipParseError::UnsupportedVersion);
    }
    Ok(StartLine::Request {
        method: Method::from_token(method),
        uri: uri.to_owned(),
    })
}
