//! 流式接收侧的显式限额配置。
//!
//! ## 设计动机（Why）
//! - 256 头部、2048 未消费字节、10 MiB 正文这类防御上限最容易散落成
//!   状态机里的硬编码；这里把它们收敛为一个配置结构，默认值即推荐值，
//!   部署方可按环境调参。
//!
//! ## 行为契约（What）
//! - 所有字段都有文档化默认值；`with_*` 方法返回新实例，便于链式构造；
//! - 这些限额是防御参数而非正确性参数：放大它们不会改变协议语义，
//!   只会放宽对畸形输入的容忍度。
//!
//! ## 风险提示（Trade-offs）
//! - `chunk_size` 同时决定初始缓冲与增长下限，取值过小导致频繁扩容，
//!   过大浪费低流量连接的常驻内存。

/// 单连接接收侧限额，含增长基线。
#[derive(Clone, Copy, Debug)]
pub struct StreamLimits {
    max_headers: usize,
    max_header_bytes: usize,
    max_body_bytes: usize,
    chunk_size: usize,
}

impl StreamLimits {
    /// 单条报文允许的头部字段数上限（默认 256）。
    pub fn max_headers(&self) -> usize {
        self.max_headers
    }

    /// 扫描器报告 `NeedMore` 时允许的未消费字节上限（默认 2048）。
    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    /// 正文字节数上限（默认 10 MiB）。
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// 初始缓冲与增长下限（默认 2048 字节，性能参数）。
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 覆盖头部字段数上限。
    pub fn with_max_headers(mut self, value: usize) -> Self {
        self.max_headers = value;
        self
    }

    /// 覆盖未消费头部字节上限。
    pub fn with_max_header_bytes(mut self, value: usize) -> Self {
        self.max_header_bytes = value;
        self
    }

    /// 覆盖正文字节上限。
    pub fn with_max_body_bytes(mut self, value: usize) -> Self {
        self.max_body_bytes = value;
        self
    }

    /// 覆盖缓冲基线。
    pub fn with_chunk_size(mut self, value: usize) -> Self {
        self.chunk_size = value;
        self
    }
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            max_headers: 256,
            max_header_bytes: 2048,
            max_body_bytes: 10 * 1024 * 1024,
            chunk_size: 2048,
        }
    }
}
