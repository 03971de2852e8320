//! Address-of-Record 取值与抽取工具。
//!
//! ## 模块目的（Why）
//! - 签名、加密与证书获取全部以 AoR（`user@host`）为索引，需要一个
//!   零歧义的值类型贯穿各层，避免裸字符串在接口间漂移。
//!
//! ## 使用契约（What）
//! - [`Aor`] 内部以 `Arc<str>` 共享存储，克隆零拷贝，可直接作哈希键；
//! - [`Aor::from_uri_text`] 接受 `From`/`To` 头部的 name-addr 或裸 URI
//!   文本，抽取规范化的 `user@host`；抽取失败返回 `None`，由调用方决定
//!   是否视为协议错误。
//!
//! ## 实现策略（How）
//! - 仅做 AoR 抽取所需的最小 URI 处理：剥离显示名与尖括号、剥离
//!   `sip:`/`sips:` scheme、截断参数与 header 段、丢弃端口。
//!   完整的 §19 URI 文法不在本 crate 范围内。

use std::fmt;
use std::sync::Arc;

/// 规范化的 Address-of-Record（`user@host`）。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Aor(Arc<str>);

impl Aor {
    /// 由已规范化的文本直接构造。
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    /// 从 name-addr 或裸 URI 文本抽取 AoR。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：输入形如 `"Alice" <sip:alice@a.example;tag=1>`、
    ///   `sip:alice@a.example:5061` 或 `sips:bob@b.example`；输出
    ///   `alice@a.example` 等；host 为空或缺失 scheme 时返回 `None`。
    /// - **执行 (How)**：优先截取 `<...>` 内部文本，再按
    ///   scheme → userinfo → host 顺序裁剪，端口与参数一律丢弃。
    pub fn from_uri_text(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let inner = match (trimmed.find('<'), trimmed.rfind('>')) {
            (Some(open), Some(close)) if open < close => &trimmed[open + 1..close],
            _ => trimmed,
        };

        let rest = inner
            .strip_prefix("sips:")
            .or_else(|| inner.strip_prefix("sip:"))?;
        let rest = rest.split([';', '?']).next().unwrap_or(rest);

        let (user, host_port) = match rest.rfind('@') {
            Some(at) => (Some(&rest[..at]), &rest[at + 1..]),
            None => (None, rest),
        };

        // IPv6 字面量带方括号，端口裁剪必须跳过括号内部的冒号。
        let host = if let Some(stripped) = host_port.strip_prefix('[') {
            let close = stripped.find(']')?;
            &stripped[..close]
        } else {
            host_port.split(':').next().unwrap_or(host_port)
        };

        if host.is_empty() {
            return None;
        }

        let aor = match user {
            Some(user) if !user.is_empty() => format!("{user}@{host}"),
            _ => host.to_owned(),
        };
        Some(Self(aor.into()))
    }

    /// 以 `&str` 形式读取。
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Aor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Aor {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
