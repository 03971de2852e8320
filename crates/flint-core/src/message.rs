//! SIP 报文模型。
//!
//! ## 模块目标（Why）
//! - 为帧读取器、S/MIME 特性与事务层提供同一个报文载体：头部以
//!   [`Bytes`] 切片零拷贝地引用接收缓冲，正文在首次访问时才解析成
//!   [`Contents`] 树。
//! - 起始行在组装期即解析定型，请求/响应的判别（拥塞丢弃、AoR 选择）
//!   因此是 O(1) 的。
//!
//! ## 使用契约（What）
//! - 头部查找大小写不敏感，并识别 RFC 3261 的紧凑形式（`v i f t l c m`）；
//! - [`SipMessage::install_contents`] 先对新正文做结构探测再替换，
//!   失败时保持原正文不动；
//! - [`SipMessage::encode`] 重新计算 `Content-Length` 与（解析态正文的）
//!   `Content-Type`，存储的其余头部按原字节回写。
//!
//! ## 风险提示（Trade-offs）
//! - 头部值保留折行原文，[`SipMessage::header_value`] 返回折行压平后的
//!   文本，代价是一次按需分配；
//! - 事务标识取自顶部 `Via` 的 `branch` 参数，不校验 magic cookie。

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::aor::Aor;
use crate::contents::{Contents, Mime};
use crate::endpoint::Endpoint;
use crate::error::{ContentsError, MessageError};
use crate::security::SecurityAttributes;

/// SIP 请求方法。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Method {
    /// RFC 3261 `INVITE`。
    Invite,
    /// RFC 3261 `ACK`。
    Ack,
    /// RFC 3261 `OPTIONS`。
    Options,
    /// RFC 3261 `BYE`。
    Bye,
    /// RFC 3261 `CANCEL`。
    Cancel,
    /// RFC 3261 `REGISTER`。
    Register,
    /// RFC 3265 `SUBSCRIBE`。
    Subscribe,
    /// RFC 3265 `NOTIFY`。
    Notify,
    /// RFC 3428 `MESSAGE`。
    Message,
    /// RFC 3515 `REFER`。
    Refer,
    /// RFC 2976 `INFO`。
    Info,
    /// RFC 3311 `UPDATE`。
    Update,
    /// RFC 3903 `PUBLISH`。
    Publish,
    /// RFC 3262 `PRACK`。
    Prack,
    /// 其它扩展方法，保留原始 token。
    Extension(String),
}

impl Method {
    /// 根据方法 token 构造枚举。
    pub fn from_token(token: &str) -> Self {
        match token {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "OPTIONS" => Method::Options,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REGISTER" => Method::Register,
            "SUBSCRIBE" => Method::Subscribe,
            "NOTIFY" => Method::Notify,
            "MESSAGE" => Method::Message,
            "REFER" => Method::Refer,
            "INFO" => Method::Info,
            "UPDATE" => Method::Update,
            "PUBLISH" => Method::Publish,
            "PRACK" => Method::Prack,
            other => Method::Extension(other.to_owned()),
        }
    }

    /// 文本表示。
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Options => "OPTIONS",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Message => "MESSAGE",
            Method::Refer => "REFER",
            Method::Info => "INFO",
            Method::Update => "UPDATE",
            Method::Publish => "PUBLISH",
            Method::Prack => "PRACK",
            Method::Extension(token) => token,
        }
    }
}

/// 起始行：请求行或状态行。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartLine {
    /// `METHOD SP Request-URI SP SIP/2.0`。
    Request {
        /// 请求方法。
        method: Method,
        /// 原文形式的 Request-URI。
        uri: String,
    },
    /// `SIP/2.0 SP Status-Code SP Reason-Phrase`。
    Response {
        /// 三位状态码。
        code: u16,
        /// 原因短语，可为空。
        reason: String,
    },
}

/// 单个头部字段，名与值都是接收缓冲的零拷贝切片。
#[derive(Clone, Debug)]
pub struct HeaderField {
    name: Bytes,
    value: Bytes,
}

impl HeaderField {
    /// 由字节切片构造。
    pub fn new(name: Bytes, value: Bytes) -> Self {
        Self { name, value }
    }

    /// 便捷构造：从文本复制出独立存储。
    pub fn from_text(name: &str, value: &str) -> Self {
        Self {
            name: Bytes::copy_from_slice(name.as_bytes()),
            value: Bytes::copy_from_slice(value.as_bytes()),
        }
    }

    /// 字段名原始字节。
    pub fn name(&self) -> &Bytes {
        &self.name
    }

    /// 字段值原始字节（可能含折行）。
    pub fn value(&self) -> &Bytes {
        &self.value
    }
}

/// RFC 3261 §7.3.3 紧凑头部名映射到完整形式。
fn expand_compact(name: &[u8]) -> Option<&'static str> {
    if name.len() != 1 {
        return None;
    }
    match name[0].to_ascii_lowercase() {
        b'v' => Some("Via"),
        b'i' => Some("Call-ID"),
        b'f' => Some("From"),
        b't' => Some("To"),
        b'l' => Some("Content-Length"),
        b'c' => Some("Content-Type"),
        b'm' => Some("Contact"),
        b's' => Some("Subject"),
        b'k' => Some("Supported"),
        b'e' => Some("Content-Encoding"),
        _ => None,
    }
}

fn name_matches(stored: &[u8], wanted: &str) -> bool {
    if stored.eq_ignore_ascii_case(wanted.as_bytes()) {
        return true;
    }
    expand_compact(stored).is_some_and(|full| full.eq_ignore_ascii_case(wanted))
}

/// 正文槽位：空、未解析原始字节、或已解析的树。
#[derive(Clone, Debug, Default)]
enum Body {
    #[default]
    Empty,
    Raw(Bytes),
    Parsed(Contents),
}

/// 解析完成的 SIP 请求或响应。
#[derive(Clone, Debug)]
pub struct SipMessage {
    start_line: StartLine,
    headers: Vec<HeaderField>,
    body: Body,
    source: Option<Endpoint>,
    tls_domain: Option<String>,
    tls_peer_names: Vec<String>,
    security: Option<SecurityAttributes>,
}

impl SipMessage {
    /// 构造空请求。
    pub fn request(method: Method, uri: impl Into<String>) -> Self {
        Self::with_start_line(StartLine::Request {
            method,
            uri: uri.into(),
        })
    }

    /// 构造空响应。
    pub fn response(code: u16, reason: impl Into<String>) -> Self {
        Self::with_start_line(StartLine::Response {
            code,
            reason: reason.into(),
        })
    }

    /// 由已解析的起始行构造空报文（帧读取器装配入口）。
    pub fn with_start_line(start_line: StartLine) -> Self {
        Self {
            start_line,
            headers: Vec::new(),
            body: Body::Empty,
            source: None,
            tls_domain: None,
            tls_peer_names: Vec::new(),
            security: None,
        }
    }

    /// 起始行。
    pub fn start_line(&self) -> &StartLine {
        &self.start_line
    }

    /// 是否请求。
    pub fn is_request(&self) -> bool {
        matches!(self.start_line, StartLine::Request { .. })
    }

    /// 是否响应。
    pub fn is_response(&self) -> bool {
        matches!(self.start_line, StartLine::Response { .. })
    }

    /// 请求方法（响应返回 `None`）。
    pub fn method(&self) -> Option<&Method> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    /// 追加一条头部。
    pub fn push_header(&mut self, field: HeaderField) {
        self.headers.push(field);
    }

    /// 便捷追加：按文本构造头部。
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push(HeaderField::from_text(name, value));
    }

    /// 全部头部。
    pub fn headers(&self) -> &[HeaderField] {
        &self.headers
    }

    /// 查找首个同名头部（大小写不敏感，识别紧凑形式）。
    pub fn header(&self, name: &str) -> Option<&HeaderField> {
        self.headers
            .iter()
            .find(|field| name_matches(field.name(), name))
    }

    /// 读取首个同名头部的值文本，折行压平为单个空格。
    pub fn header_value(&self, name: &str) -> Option<Cow<'_, str>> {
        let field = self.header(name)?;
        Some(unfold_value(field.value()))
    }

    /// `From` 头部的 AoR。
    pub fn from_aor(&self) -> Result<Aor, MessageError> {
        self.address_header_aor("From")
    }

    /// `To` 头部的 AoR。
    pub fn to_aor(&self) -> Result<Aor, MessageError> {
        self.address_header_aor("To")
    }

    fn address_header_aor(&self, name: &'static str) -> Result<Aor, MessageError> {
        let value = self
            .header_value(name)
            .ok_or(MessageError::MissingHeader { name })?;
        Aor::from_uri_text(&value).ok_or(MessageError::MalformedAddress { name })
    }

    /// 严格解析 `Content-Length`：流式传输上强制存在，仅接受十进制数字。
    pub fn content_length(&self) -> Result<usize, MessageError> {
        let value = self
            .header_value("Content-Length")
            .ok_or(MessageError::MissingContentLength)?;
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MessageError::MalformedContentLength {
                text: trimmed.to_owned(),
            });
        }
        trimmed
            .parse::<usize>()
            .map_err(|_| MessageError::MalformedContentLength {
                text: trimmed.to_owned(),
            })
    }

    /// `Content-Type` 头部解析为 [`Mime`]；缺失或畸形返回 `None`。
    pub fn content_type(&self) -> Option<Mime> {
        let value = self.header_value("Content-Type")?;
        match Mime::parse(value.trim()) {
            Ok(mime) => Some(mime),
            Err(err) => {
                debug!(target: "flint::core", error = %err, "Content-Type 无法解析，按无正文类型处理");
                None
            }
        }
    }

    /// 顶部 `Via` 的 `branch` 参数，即本报文的事务标识。
    pub fn transaction_id(&self) -> Option<String> {
        let via = self.header_value("Via")?;
        for param in via.split(';').skip(1) {
            let param = param.trim();
            if let Some((name, value)) = param.split_once('=')
                && name.trim().eq_ignore_ascii_case("branch")
            {
                let branch = value.trim().split(',').next().unwrap_or("").trim();
                if !branch.is_empty() {
                    return Some(branch.to_owned());
                }
            }
        }
        None
    }

    /// 安装原始正文字节（帧读取器专用）。
    pub fn set_raw_body(&mut self, data: Bytes) {
        self.body = if data.is_empty() {
            Body::Empty
        } else {
            Body::Raw(data)
        };
    }

    /// 是否携带正文。
    pub fn has_body(&self) -> bool {
        !matches!(self.body, Body::Empty)
    }

    /// 访问正文树，必要时从原始字节惰性解析。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：原始字节缺少可解析的 `Content-Type` 或解析失败
    ///   时返回 `None`，原始字节保留不动；
    /// - **执行 (How)**：解析成功后槽位就地升级为 `Parsed`，后续访问
    ///   零成本。
    pub fn contents(&mut self) -> Option<&Contents> {
        if let Body::Raw(data) = &self.body {
            let Some(mime) = self.content_type() else {
                return None;
            };
            match Contents::parse(&mime, data) {
                Ok(parsed) => self.body = Body::Parsed(parsed),
                Err(err) => {
                    debug!(target: "flint::core", error = %err, "正文无法按声明类型解析，保留原始字节");
                    return None;
                }
            }
        }
        match &self.body {
            Body::Parsed(contents) => Some(contents),
            _ => None,
        }
    }

    /// 原子地替换正文：先结构探测，失败时原正文保持不变。
    pub fn install_contents(&mut self, contents: Contents) -> Result<(), ContentsError> {
        contents.validate()?;
        self.body = Body::Parsed(contents);
        Ok(())
    }

    /// 清空正文。
    pub fn clear_body(&mut self) {
        self.body = Body::Empty;
    }

    /// 来源对端。
    pub fn source(&self) -> Option<&Endpoint> {
        self.source.as_ref()
    }

    /// 设置来源对端。
    pub fn set_source(&mut self, endpoint: Endpoint) {
        self.source = Some(endpoint);
    }

    /// 接收侧 TLS 域名。
    pub fn tls_domain(&self) -> Option<&str> {
        self.tls_domain.as_deref()
    }

    /// 设置 TLS 域名。
    pub fn set_tls_domain(&mut self, domain: impl Into<String>) {
        self.tls_domain = Some(domain.into());
    }

    /// TLS 对端证书中的已验证名字。
    pub fn tls_peer_names(&self) -> &[String] {
        &self.tls_peer_names
    }

    /// 设置已验证的对端名字。
    pub fn set_tls_peer_names(&mut self, names: Vec<String>) {
        self.tls_peer_names = names;
    }

    /// 安全属性块。
    pub fn security_attributes(&self) -> Option<&SecurityAttributes> {
        self.security.as_ref()
    }

    /// 可变安全属性块。
    pub fn security_attributes_mut(&mut self) -> Option<&mut SecurityAttributes> {
        self.security.as_mut()
    }

    /// 整体替换安全属性块。
    pub fn set_security_attributes(&mut self, attributes: SecurityAttributes) {
        self.security = Some(attributes);
    }

    /// 序列化为线格式字节。
    ///
    /// # 教案式说明
    /// - **执行 (How)**：起始行 → 存储头部（剔除 `Content-Length`，
    ///   解析态正文时一并剔除 `Content-Type`）→ 重新计算的类型与长度
    ///   → 空行 → 正文。
    /// - **契约 (What)**：输出满足流式传输的 `Content-Length` 强制约束。
    pub fn encode(&self) -> Bytes {
        let (content_type, body): (Option<Mime>, Option<Bytes>) = match &self.body {
            Body::Empty => (None, None),
            Body::Raw(data) => (None, Some(data.clone())),
            Body::Parsed(contents) => {
                let (mime, data) = contents.encode();
                (Some(mime), Some(data))
            }
        };

        let mut out = BytesMut::new();
        match &self.start_line {
            StartLine::Request { method, uri } => {
                out.put_slice(method.as_str().as_bytes());
                out.put_slice(b" ");
                out.put_slice(uri.as_bytes());
                out.put_slice(b" SIP/2.0\r\n");
            }
            StartLine::Response { code, reason } => {
                if reason.is_empty() {
                    out.put_slice(format!("SIP/2.0 {code}\r\n").as_bytes());
                } else {
                    out.put_slice(format!("SIP/2.0 {code} {reason}\r\n").as_bytes());
                }
            }
        }

        for field in &self.headers {
            if name_matches(field.name(), "Content-Length") {
                continue;
            }
            if content_type.is_some() && name_matches(field.name(), "Content-Type") {
                continue;
            }
            out.put_slice(field.name());
            out.put_slice(b": ");
            out.put_slice(field.value());
            out.put_slice(b"\r\n");
        }

        if let Some(mime) = &content_type {
            out.put_slice(format!("Content-Type: {mime}\r\n").as_bytes());
        }
        let body_len = body.as_ref().map_or(0, Bytes::len);
        out.put_slice(format!("Content-Length: {body_len}\r\n\r\n").as_bytes());
        if let Some(body) = body {
            out.put_slice(&body);
        }
        out.freeze()
    }
}

/// 折行压平：`CRLF` 后随的连续空白连同换行整体折叠为一个空格。
fn unfold_value(value: &Bytes) -> Cow<'_, str> {
    if !value.as_ref().contains(&b'\r') {
        return String::from_utf8_lossy(value);
    }
    let mut text = String::with_capacity(value.len());
    let mut bytes = value.as_ref();
    while let Some(pos) = bytes.windows(2).position(|window| window == b"\r\n") {
        text.push_str(&String::from_utf8_lossy(&bytes[..pos]));
        let mut rest = &bytes[pos + 2..];
        while let [b' ' | b'\t', tail @ ..] = rest {
            rest = tail;
        }
        text.push(' ');
        bytes = rest;
    }
    text.push_str(&String::from_utf8_lossy(bytes));
    Cow::Owned(text)
}
