//! 对端标识（传输五元组的精简版）。
//!
//! ## 模块目的（Why）
//! - 帧读取器需要把“报文从哪条流上来”钉在 [`SipMessage`](crate::message::SipMessage)
//!   上，供事务层与日志使用；发送队列也以它作为回写目的地。
//!
//! ## 使用契约（What）
//! - [`Endpoint`] 是纯值类型：套接字地址加流式传输种类（TCP / TLS），
//!   不持有任何连接资源；
//! - 数据报传输不在本工作区范围内，故枚举只覆盖流式两种。

use std::fmt;
use std::net::SocketAddr;

/// 流式传输种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// 明文 TCP。
    Tcp,
    /// TLS over TCP。
    Tls,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => f.write_str("TCP"),
            TransportKind::Tls => f.write_str("TLS"),
        }
    }
}

/// 对端标识：地址加传输种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Endpoint {
    addr: SocketAddr,
    kind: TransportKind,
}

impl Endpoint {
    /// 构造对端标识。
    pub fn new(addr: SocketAddr, kind: TransportKind) -> Self {
        Self { addr, kind }
    }

    /// 套接字地址。
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// 传输种类。
    pub fn kind(&self) -> TransportKind {
        self.kind
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.kind)
    }
}
