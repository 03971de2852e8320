//! 报文正文树：叶子、CMS 封包与 MIME multipart 容器。
//!
//! ## 模块目标（Why）
//! - S/MIME 特性需要在嵌套 multipart 上做结构递归（找加密点、验签、
//!   重建），用一个封闭的和类型表达正文形态，让递归成为穷举匹配而非
//!   运行时类型测试。
//! - 帧读取器只搬运字节；正文到树的解析推迟到这里，保证“替换正文前
//!   必须先证明可解析”的原子性约束有统一实现点。
//!
//! ## 结构概览（What）
//! - [`Mime`]：`type/subtype` 加参数表的轻量载体；
//! - [`Contents`]：六个变体的封闭枚举，multipart 变体的 `parts` 拥有
//!   其全部子节点（单一所有权，重建路径天然无二次释放问题）；
//! - [`Contents::parse`] / [`Contents::encode`]：线格式互转；
//! - [`Contents::validate`]：安装正文前的结构探测。
//!
//! ## 实现策略（How）
//! - 解析全程在 [`Bytes`] 切片上进行，part 正文零拷贝引用原缓冲；
//! - multipart 边界按 RFC 2046 处理：定界行吃掉其前导 CRLF，
//!   `--boundary--` 关闭容器；
//! - 编码侧的边界取自进程内单调计数器，保证测试可重放。
//!
//! ## 风险提示（Trade-offs）
//! - 未知的 multipart 子类型按不透明叶子对待，不会展开其内部结构；
//! - 参数解析只覆盖 token 与双引号两种取值形态，不处理 RFC 2231 扩展。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ContentsError;

/// MIME 类型：`type/subtype` 与参数表。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mime {
    ty: String,
    subtype: String,
    params: Vec<(String, String)>,
}

impl Mime {
    /// 构造不带参数的 MIME 类型。
    pub fn new(ty: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            ty: ty.into().to_ascii_lowercase(),
            subtype: subtype.into().to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    /// 链式追加参数。
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into().to_ascii_lowercase(), value.into()));
        self
    }

    /// 主类型。
    pub fn ty(&self) -> &str {
        &self.ty
    }

    /// 子类型。
    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    /// 大小写不敏感的类型判断。
    pub fn is(&self, ty: &str, subtype: &str) -> bool {
        self.ty.eq_ignore_ascii_case(ty) && self.subtype.eq_ignore_ascii_case(subtype)
    }

    /// 读取参数值。
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// 解析 `Content-Type` 文本。
    ///
    /// - **契约 (What)**：接受 `type/subtype` 后随分号分隔的
    ///   `name=value` / `name="value"` 参数；畸形输入返回
    ///   [`ContentsError::MalformedMime`]。
    pub fn parse(text: &str) -> Result<Self, ContentsError> {
        let malformed = || ContentsError::MalformedMime { text: text.to_owned() };
        let mut segments = text.split(';');
        let type_part = segments.next().ok_or_else(malformed)?.trim();
        let (ty, subtype) = type_part.split_once('/').ok_or_else(malformed)?;
        if ty.trim().is_empty() || subtype.trim().is_empty() {
            return Err(malformed());
        }
        let mut mime = Mime::new(ty.trim(), subtype.trim());
        for segment in segments {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (name, value) = segment.split_once('=').ok_or_else(malformed)?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|inner| inner.strip_suffix('"'))
                .unwrap_or(value);
            mime = mime.with_param(name.trim(), value);
        }
        Ok(mime)
    }
}

impl fmt::Display for Mime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ty, self.subtype)?;
        for (name, value) in &self.params {
            if value.bytes().all(is_token_byte) && !value.is_empty() {
                write!(f, ";{name}={value}")?;
            } else {
                write!(f, ";{name}=\"{value}\"")?;
            }
        }
        Ok(())
    }
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'!' | b'%' | b'*' | b'_' | b'+' | b'~')
}

/// 报文正文的封闭和类型。
///
/// # 教案式说明
/// - **契约 (What)**：每个值在任意时刻只有一个所有者；multipart 变体的
///   `parts` 按线格式顺序排列，`MultipartAlternative` 的末位是最优先
///   部件，`MultipartSigned` 恒为“载荷 + 签名”两件。
/// - **风险 (Trade-offs)**：枚举封闭意味着新增正文形态需要动到所有
///   穷举匹配点，这是刻意换来的递归安全性。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Contents {
    /// 任意叶子内容。
    Opaque {
        /// 叶子自身的 MIME 类型。
        mime: Mime,
        /// 原始字节。
        data: Bytes,
    },
    /// CMS（PKCS#7）封包：enveloped-data 或 signed-data。
    Pkcs7 {
        /// DER 封包字节。
        data: Bytes,
    },
    /// `multipart/signed`：载荷与分离式签名，恒为两件。
    MultipartSigned {
        /// `[payload, signature]`。
        parts: Vec<Contents>,
    },
    /// `multipart/alternative`：按偏好升序排列。
    MultipartAlternative {
        /// 末位最优先。
        parts: Vec<Contents>,
    },
    /// `multipart/mixed`：语义平铺的有序容器。
    MultipartMixed {
        /// 有序部件。
        parts: Vec<Contents>,
    },
    /// `multipart/related`：与 mixed 同构的有序容器。
    MultipartRelated {
        /// 有序部件。
        parts: Vec<Contents>,
    },
}

static BOUNDARY_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_boundary() -> String {
    let seq = BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("----flint-part-{seq:08x}")
}

impl Contents {
    /// 构造文本叶子，测试与示例的便捷入口。
    pub fn plain_text(text: impl Into<Bytes>) -> Self {
        Contents::Opaque {
            mime: Mime::new("text", "plain"),
            data: text.into(),
        }
    }

    /// 当前节点的简短种类名，供日志使用。
    pub fn kind_name(&self) -> &'static str {
        match self {
            Contents::Opaque { .. } => "opaque",
            Contents::Pkcs7 { .. } => "pkcs7",
            Contents::MultipartSigned { .. } => "multipart/signed",
            Contents::MultipartAlternative { .. } => "multipart/alternative",
            Contents::MultipartMixed { .. } => "multipart/mixed",
            Contents::MultipartRelated { .. } => "multipart/related",
        }
    }

    /// 按声明的 MIME 类型解析正文字节。
    pub fn parse(mime: &Mime, data: &Bytes) -> Result<Contents, ContentsError> {
        if mime.is("application", "pkcs7-mime") {
            return Ok(Contents::Pkcs7 { data: data.clone() });
        }
        if mime.ty().eq_ignore_ascii_case("multipart") {
            let known = matches!(
                mime.subtype(),
                "signed" | "alternative" | "mixed" | "related"
            );
            if !known {
                // 未知 multipart 子类型按不透明叶子对待。
                return Ok(Contents::Opaque {
                    mime: mime.clone(),
                    data: data.clone(),
                });
            }
            let boundary = mime.param("boundary").ok_or(ContentsError::MissingBoundary)?;
            let raw_parts = split_multipart(data, boundary)?;
            let mut parts = Vec::with_capacity(raw_parts.len());
            for raw in raw_parts {
                parts.push(parse_part(raw)?);
            }
            if parts.is_empty() {
                return Err(ContentsError::EmptyMultipart);
            }
            let contents = match mime.subtype() {
                "signed" => {
                    if parts.len() != 2 {
                        return Err(ContentsError::SignedPartCount { found: parts.len() });
                    }
                    Contents::MultipartSigned { parts }
                }
                "alternative" => Contents::MultipartAlternative { parts },
                "mixed" => Contents::MultipartMixed { parts },
                _ => Contents::MultipartRelated { parts },
            };
            return Ok(contents);
        }
        Ok(Contents::Opaque {
            mime: mime.clone(),
            data: data.clone(),
        })
    }

    /// 编码为线格式，返回携带必要参数的 MIME 类型与正文字节。
    pub fn encode(&self) -> (Mime, Bytes) {
        match self {
            Contents::Opaque { mime, data } => (mime.clone(), data.clone()),
            Contents::Pkcs7 { data } => (
                Mime::new("application", "pkcs7-mime")
                    .with_param("smime-type", "enveloped-data")
                    .with_param("name", "smime.p7m"),
                data.clone(),
            ),
            Contents::MultipartSigned { parts } => {
                let (mime, body) = encode_multipart("signed", parts);
                (
                    mime.with_param("protocol", "application/pkcs7-signature"),
                    body,
                )
            }
            Contents::MultipartAlternative { parts } => encode_multipart("alternative", parts),
            Contents::MultipartMixed { parts } => encode_multipart("mixed", parts),
            Contents::MultipartRelated { parts } => encode_multipart("related", parts),
        }
    }

    /// 安装前的结构探测：树上每个容器都必须成立。
    ///
    /// - **意图 (Why)**：正文替换要求原子性——先证明新正文结构合法，
    ///   再覆盖旧值，失败时报文保持原状。
    pub fn validate(&self) -> Result<(), ContentsError> {
        match self {
            Contents::Opaque { .. } | Contents::Pkcs7 { .. } => Ok(()),
            Contents::MultipartSigned { parts } => {
                if parts.len() != 2 {
                    return Err(ContentsError::SignedPartCount { found: parts.len() });
                }
                parts.iter().try_for_each(Contents::validate)
            }
            Contents::MultipartAlternative { parts }
            | Contents::MultipartMixed { parts }
            | Contents::MultipartRelated { parts } => {
                if parts.is_empty() {
                    return Err(ContentsError::EmptyMultipart);
                }
                parts.iter().try_for_each(Contents::validate)
            }
        }
    }
}

fn encode_multipart(subtype: &str, parts: &[Contents]) -> (Mime, Bytes) {
    let boundary = next_boundary();
    let mut out = BytesMut::new();
    for part in parts {
        let (mime, body) = part.encode();
        out.put_slice(b"--");
        out.put_slice(boundary.as_bytes());
        out.put_slice(b"\r\nContent-Type: ");
        out.put_slice(mime.to_string().as_bytes());
        out.put_slice(b"\r\n\r\n");
        out.put_slice(&body);
        out.put_slice(b"\r\n");
    }
    out.put_slice(b"--");
    out.put_slice(boundary.as_bytes());
    out.put_slice(b"--\r\n");
    (
        Mime::new("multipart", subtype).with_param("boundary", boundary),
        out.freeze(),
    )
}

/// 按边界切出各 part 的原始字节（头部加正文）。
fn split_multipart(data: &Bytes, boundary: &str) -> Result<Vec<Bytes>, ContentsError> {
    let delimiter = format!("--{boundary}");
    let bytes = data.as_ref();
    let mut parts = Vec::new();

    let mut cursor = match find_delimiter(bytes, 0, delimiter.as_bytes()) {
        Some(pos) => pos,
        None => return Err(ContentsError::UnterminatedMultipart),
    };

    loop {
        let after = cursor + delimiter.len();
        if bytes[after..].starts_with(b"--") {
            // 关闭定界符，容器结束。
            return Ok(parts);
        }
        let line_end = match find_subslice(bytes, after, b"\r\n") {
            Some(pos) => pos + 2,
            None => return Err(ContentsError::UnterminatedMultipart),
        };
        let next = find_delimiter(bytes, line_end, delimiter.as_bytes())
            .ok_or(ContentsError::UnterminatedMultipart)?;
        // 定界行吃掉其前导 CRLF。
        let part_end = next.checked_sub(2).filter(|end| *end >= line_end);
        let part_end = part_end.ok_or(ContentsError::UnterminatedMultipart)?;
        parts.push(data.slice(line_end..part_end));
        cursor = next;
    }
}

/// 在 `from` 之后寻找位于行首的定界符。
fn find_delimiter(bytes: &[u8], from: usize, delimiter: &[u8]) -> Option<usize> {
    let mut search = from;
    loop {
        let pos = find_subslice(bytes, search, delimiter)?;
        if pos == 0 || bytes[..pos].ends_with(b"\r\n") {
            return Some(pos);
        }
        search = pos + 1;
    }
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from > bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|rel| from + rel)
}

/// 解析单个 part：可选头部块加正文。
fn parse_part(raw: Bytes) -> Result<Contents, ContentsError> {
    let bytes = raw.as_ref();
    let (header_block, body_start) = match find_subslice(bytes, 0, b"\r\n\r\n") {
        Some(pos) => (&bytes[..pos], pos + 4),
        None if bytes.starts_with(b"\r\n") => (&bytes[..0], 2),
        None => (&bytes[..0], 0),
    };

    let mut mime = Mime::new("text", "plain");
    for line in header_block.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let text = std::str::from_utf8(line).map_err(|_| ContentsError::MalformedPartHeaders)?;
        let (name, value) = text
            .split_once(':')
            .ok_or(ContentsError::MalformedPartHeaders)?;
        if name.trim().eq_ignore_ascii_case("content-type") {
            mime = Mime::parse(value.trim())?;
        }
    }

    let body = raw.slice(body_start..);
    Contents::parse(&mime, &body)
}
