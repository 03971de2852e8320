//! 入队前的廉价结构检查。
//!
//! ## 模块目的（Why）
//! - 事务层假定入队报文至少具备对话关联所需的头部；在传输线程上用
//!   一次 O(头部数) 的检查挡掉明显残缺的报文，比让事务层崩在半路
//!   便宜得多。
//!
//! ## 行为契约（What）
//! - [`basic_check`] 只验证存在性与 `From`/`To` 的 AoR 可抽取性，
//!   不做任何语法全量校验；失败的报文由调用方静默丢弃（记日志）。

use flint_core::message::SipMessage;
use tracing::debug;

/// 必需头部存在且地址头可抽取 AoR 时返回 `true`。
pub fn basic_check(message: &SipMessage) -> bool {
    for name in ["Via", "Call-ID", "CSeq"] {
        if message.header(name).is_none() {
            debug!(target: "flint::codec::sip", header = name, "basic check 失败：头部缺失");
            return false;
        }
    }
    if message.from_aor().is_err() || message.to_aor().is_err() {
        debug!(target: "flint::codec::sip", "basic check 失败：From/To 无法抽取 AoR");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use flint_core::message::Method;

    #[test]
    fn complete_message_passes() {
        let mut msg = SipMessage::request(Method::Invite, "sip:b@b.example");
        msg.add_header("Via", "SIP/2.0/TCP a;branch=z9hG4bK1");
        msg.add_header("From", "<sip:a@a.example>");
        msg.add_header("To", "<sip:b@b.example>");
        msg.add_header("Call-ID", "c");
        msg.add_header("CSeq", "1 INVITE");
        assert!(basic_check(&msg));
    }

    #[test]
    fn missing_via_fails() {
        let mut msg = SipMessage::request(Method::Invite, "sip:b@b.example");
        msg.add_header("From", "<sip:a@a.example>");
        msg.add_header("To", "<sip:b@b.example>");
        msg.add_header("Call-ID", "c");
        msg.add_header("CSeq", "1 INVITE");
        assert!(!basic_check(&msg));
    }

    #[test]
    fn unparseable_from_fails() {
        let mut msg = SipMessage::request(Method::Invite, "sip:b@b.example");
        msg.add_header("Via", "SIP/2.0/TCP a;branch=z9hG4bK1");
        msg.add_header("From", "not-a-uri");
        msg.add_header("To", "<sip:b@b.example>");
        msg.add_header("Call-ID", "c");
        msg.add_header("CSeq", "1 INVITE");
        assert!(!basic_check(&msg));
    }
}
