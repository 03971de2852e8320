//! 本地响应构造。
//!
//! ## 模块目标（Why）
//! - 过载丢弃（503）与密钥材料缺失（415）都要求端点在不经过事务层的
//!   情况下就地造出合法响应；响应必须携带请求的对话标识头部才可被
//!   对端关联。
//!
//! ## 行为契约（What）
//! - [`make_response`] 从请求复制 `Via`（全部）、`From`、`To`、
//!   `Call-ID`、`CSeq`；
//! - [`make_503`] 附带 `Retry-After`（秒），对 ACK 与响应返回 `None`
//!   （ACK 不可应答，响应不可再应答）；
//! - [`make_415`] 用于出站加密失败的本地回执，同样不应答响应。

use std::time::Duration;

use flint_core::message::SipMessage;
use flint_core::Method;
use tracing::debug;

/// 由请求构造响应，复制对话关联头部。
pub fn make_response(request: &SipMessage, code: u16, reason: &str) -> SipMessage {
    let mut response = SipMessage::response(code, reason);
    for name in ["Via", "From", "To", "Call-ID", "CSeq"] {
        for field in request.headers() {
            if field_named(field.name(), name) {
                response.push_header(field.clone());
            }
        }
    }
    response
}

fn field_named(stored: &[u8], wanted: &str) -> bool {
    stored.eq_ignore_ascii_case(wanted.as_bytes())
        || (stored.len() == 1 && compact_of(wanted) == Some(stored[0].to_ascii_lowercase()))
}

fn compact_of(full: &str) -> Option<u8> {
    match full {
        "Via" => Some(b'v'),
        "From" => Some(b'f'),
        "To" => Some(b't'),
        "Call-ID" => Some(b'i'),
        _ => None,
    }
}

/// 过载回执：`503 Service Unavailable` 加 `Retry-After`。
///
/// # 教案式说明
/// - **契约 (What)**：入参是刚出帧的完整报文；对响应与 ACK 请求返回
///   `None`——二者按协议不可应答，调用方直接丢弃即可。
pub fn make_503(message: &SipMessage, expected_wait: Duration) -> Option<SipMessage> {
    if message.is_response() {
        return None;
    }
    if message.method() == Some(&Method::Ack) {
        debug!(target: "flint::codec::sip", "ACK 不可应答，过载时静默丢弃");
        return None;
    }
    let mut response = make_response(message, 503, "Service Unavailable");
    response.add_header("Retry-After", &expected_wait.as_secs().to_string());
    Some(response)
}

/// 密钥材料缺失回执：`415 Unsupported Media Type`。
pub fn make_415(message: &SipMessage) -> Option<SipMessage> {
    if message.is_response() {
        debug!(target: "flint::codec::sip", "响应无法再应答，415 回执跳过");
        return None;
    }
    Some(make_response(message, 415, "Unsupported Media Type"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method) -> SipMessage {
        let mut msg = SipMessage::request(method, "sip:bob@b.example");
        msg.add_header("Via", "SIP/2.0/TCP a.example;branch=z9hG4bK-9");
        msg.add_header("From", "<sip:alice@a.example>;tag=1");
        msg.add_header("To", "<sip:bob@b.example>");
        msg.add_header("Call-ID", "c1");
        msg.add_header("CSeq", "7 INVITE");
        msg.add_header("Content-Length", "0");
        msg
    }

    #[test]
    fn response_copies_dialog_headers_only() {
        let resp = make_response(&request(Method::Invite), 503, "Service Unavailable");
        assert!(resp.is_response());
        assert!(resp.header("Via").is_some());
        assert!(resp.header("CSeq").is_some());
        assert!(resp.header("Content-Length").is_none(), "长度头不复制，由编码重算");
    }

    #[test]
    fn overload_reply_carries_retry_after() {
        let resp = make_503(&request(Method::Invite), Duration::from_secs(12)).expect("INVITE 应有 503");
        assert_eq!(resp.header_value("Retry-After").unwrap(), "12");
        let wire = resp.encode();
        assert!(std::str::from_utf8(&wire).unwrap().starts_with("SIP/2.0 503 Service Unavailable\r\n"));
    }

    #[test]
    fn ack_and_responses_get_no_503() {
        assert!(make_503(&request(Method::Ack), Duration::ZERO).is_none());
        let resp = make_response(&request(Method::Invite), 200, "OK");
        assert!(make_503(&resp, Duration::ZERO).is_none());
    }

    #[test]
    fn unsupported_media_reply_only_for_requests() {
        assert!(make_415(&request(Method::Message)).is_some());
        let resp = make_response(&request(Method::Invite), 200, "OK");
        assert!(make_415(&resp).is_none());
    }
}
