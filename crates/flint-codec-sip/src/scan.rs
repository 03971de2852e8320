//! 增量头部扫描器。
//!
//! ## 模块目标（Why）
//! - 流式传输上，一条报文的起始行与头部块会被任意切碎到多次读取里；
//!   扫描器要在不回拷、不重扫的前提下跨调用推进，并告诉调用方每次
//!   可以安全移交多少前缀字节给报文所有。
//!
//! ## 输入输出契约（What）
//! - 每次调用传入当前未消费区域（调用方保证：上次未消费的字节原样
//!   保留在区域头部，新字节追加在尾部）；
//! - 返回 [`ScanStatus::NeedMore`] 或 [`ScanStatus::Complete`]，二者都
//!   携带 `consumed`：区域前 `consumed` 字节从此归报文所有，本轮提交
//!   的字段（见 [`ScannedField`]）全部落在该前缀内，以相对区域起点的
//!   字节区间表示；
//! - 调用方必须在下一次 `scan_chunk` 之前通过
//!   [`HeaderScanner::take_fields`] 取走已提交字段，并把未消费字节
//!   移到区域头部——扫描器内部进度会随 `consumed` 自动重定位。
//!
//! ## 实现策略（How）
//! - 字段的提交时机是“看到下一行首字节且它不是 SP/HT”：在此之前无法
//!   断定该字段不会被折行续写，因此字段首字节之前就是消费水位线；
//! - 扫描器记录 `examined` 进度，已看过的字节绝不重扫，跨调用重入的
//!   代价是 O(新增字节)；
//! - 空行（CRLF 紧跟 CRLF）终结头部块，返回 `Complete`。
//!
//! ## 风险提示（Trade-offs）
//! - 裸 LF 一律判为框架错误，不做宽容兼容；
//! - 头部数量上限与未消费字节上限由帧读取器依据
//!   [`HeaderScanner::header_count`] 与 `consumed` 执行，扫描器本身
//!   保持纯粹。

use std::ops::Range;

use crate::error::ScanError;

/// 本轮已提交的扫描产物，区间相对本次调用的区域起点。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScannedField {
    /// 起始行（不含 CRLF）。
    StartLine {
        /// 行内容区间。
        line: Range<usize>,
    },
    /// 一条完整头部字段。
    Header {
        /// 字段名区间（已去除尾部空白）。
        name: Range<usize>,
        /// 字段值区间（已去除首尾空白与终结 CRLF，保留内部折行）。
        value: Range<usize>,
    },
}

/// 单次扫描的推进结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanStatus {
    /// 头部块尚未结束，需要更多字节；前 `consumed` 字节可移交。
    NeedMore {
        /// 可移交的前缀长度。
        consumed: usize,
    },
    /// 头部块已结束；前 `consumed` 字节覆盖到空行为止。
    Complete {
        /// 已消费长度，其后即正文或下一条报文。
        consumed: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    StartLine,
    Headers,
    Done,
}

/// 可跨调用续扫的头部扫描器。
#[derive(Debug)]
pub struct HeaderScanner {
    phase: Phase,
    /// 已检视进度：此前的字节绝不重扫。
    examined: usize,
    /// 当前行的起点。
    line_start: usize,
    /// 消费水位线：首个尚未归属任何已提交条目的字节。
    watermark: usize,
    /// 挂起（尚未提交）头部字段的起点，恒等于水位线。
    open_field: Option<usize>,
    header_count: usize,
    fields: Vec<ScannedField>,
}

impl HeaderScanner {
    /// 为一条新报文准备扫描器。
    pub fn new() -> Self {
        Self {
            phase: Phase::StartLine,
            examined: 0,
            line_start: 0,
            watermark: 0,
            open_field: None,
            header_count: 0,
            fields: Vec::new(),
        }
    }

    /// 已提交的头部字段总数（跨调用累计）。
    pub fn header_count(&self) -> usize {
        self.header_count
    }

    /// 取走本轮提交的字段。必须在下一次 [`Self::scan_chunk`] 前调用。
    pub fn take_fields(&mut self) -> Vec<ScannedField> {
        std::mem::take(&mut self.fields)
    }

    /// 在未消费区域上推进扫描。
    pub fn scan_chunk(&mut self, region: &[u8]) -> Result<ScanStatus, ScanError> {
        debug_assert!(
            self.fields.is_empty(),
            "上一轮提交的字段必须先 take_fields 取走"
        );
        if self.phase == Phase::Done {
            return Ok(ScanStatus::Complete { consumed: 0 });
        }

        loop {
            // 新行首字节已可见时，先裁决挂起字段的归属。
            if self.phase == Phase::Headers
                && self.examined == self.line_start
                && self.line_start < region.len()
                && let Some(start) = self.open_field
            {
                let first = region[self.line_start];
                if first != b' ' && first != b'\t' {
                    self.commit_header(region, start, self.line_start)?;
                    self.open_field = None;
                    self.watermark = self.line_start;
                }
            }

            let Some(rel) = region[self.examined..].iter().position(|b| *b == b'\n') else {
                self.examined = region.len();
                let consumed = self.watermark;
                self.rebase(consumed);
                return Ok(ScanStatus::NeedMore { consumed });
            };
            let nl = self.examined + rel;
            if nl == self.line_start || region[nl - 1] != b'\r' {
                return Err(ScanError::BareLineFeed);
            }
            let line_end = nl - 1;

            match self.phase {
                Phase::StartLine => {
                    if line_end == self.line_start {
                        return Err(ScanError::EmptyStartLine);
                    }
                    self.fields.push(ScannedField::StartLine {
                        line: self.line_start..line_end,
                    });
                    self.advance_line(nl);
                    self.watermark = self.line_start;
                    self.phase = Phase::Headers;
                }
                Phase::Headers => {
                    if line_end == self.line_start {
                        // 空行终结头部块；挂起字段已在循环顶部提交。
                        self.phase = Phase::Done;
                        let consumed = nl + 1;
                        self.advance_line(nl);
                        self.watermark = consumed;
                        self.rebase(consumed);
                        return Ok(ScanStatus::Complete { consumed });
                    }
                    if self.open_field.is_none() {
                        let first = region[self.line_start];
                        if first == b' ' || first == b'\t' {
                            return Err(ScanError::StrayContinuation);
                        }
                        self.open_field = Some(self.line_start);
                    }
                    self.advance_line(nl);
                }
                Phase::Done => unreachable!("Done 阶段在函数入口直接返回"),
            }
        }
    }

    fn advance_line(&mut self, nl: usize) {
        self.line_start = nl + 1;
        self.examined = nl + 1;
    }

    /// 提交 `start..end`（含终结 CRLF）的字段字节。
    fn commit_header(&mut self, region: &[u8], start: usize, end: usize) -> Result<(), ScanError> {
        let bytes = &region[start..end];
        let colon = bytes
            .iter()
            .position(|b| *b == b':')
            .ok_or(ScanError::MissingColon)?;

        let mut name_end = start + colon;
        while name_end > start && matches!(region[name_end - 1], b' ' | b'\t') {
            name_end -= 1;
        }
        if name_end == start {
            return Err(ScanError::EmptyHeaderName);
        }

        let mut value_start = start + colon + 1;
        while value_start < end && matches!(region[value_start], b' ' | b'\t') {
            value_start += 1;
        }
        // 去掉终结 CRLF 与其前的空白。
        let mut value_end = end.saturating_sub(2).max(value_start);
        while value_end > value_start && matches!(region[value_end - 1], b' ' | b'\t') {
            value_end -= 1;
        }

        self.header_count += 1;
        self.fields.push(ScannedField::Header {
            name: start..name_end,
            value: value_start..value_end,
        });
        Ok(())
    }

    /// 调用方移交 `consumed` 前缀后，把内部进度重定位到新的区域起点。
    fn rebase(&mut self, consumed: usize) {
        self.examined -= consumed;
        self.line_start -= consumed;
        self.watermark -= consumed;
        if let Some(start) = self.open_field.as_mut() {
            *start -= consumed;
        }
    }
}

impl Default for HeaderScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIRE: &[u8] = b"INVITE sip:a@b SIP/2.0\r\nVia: SIP/2.0/TCP h;branch=z9hG4bK1\r\nContent-Length: 0\r\n\r\n";

    /// 按给定切块喂给扫描器，模拟帧读取器的缓冲移位。
    fn scan_in_chunks(chunk_len: usize) -> (Vec<(String, String)>, String) {
        let mut scanner = HeaderScanner::new();
        let mut region: Vec<u8> = Vec::new();
        let mut offered = 0;
        let mut headers = Vec::new();
        let mut start_line = String::new();

        while offered < WIRE.len() {
            let take = chunk_len.min(WIRE.len() - offered);
            region.extend_from_slice(&WIRE[offered..offered + take]);
            offered += take;

            let status = scanner.scan_chunk(&region).expect("合法报文不应报错");
            let consumed = match status {
                ScanStatus::NeedMore { consumed } | ScanStatus::Complete { consumed } => consumed,
            };
            for field in scanner.take_fields() {
                match field {
                    ScannedField::StartLine { line } => {
                        start_line = String::from_utf8_lossy(&region[line]).into_owned();
                    }
                    ScannedField::Header { name, value } => headers.push((
                        String::from_utf8_lossy(&region[name]).into_owned(),
                        String::from_utf8_lossy(&region[value]).into_owned(),
                    )),
                }
            }
            region.drain(..consumed);
            if matches!(status, ScanStatus::Complete { .. }) {
                assert!(region.is_empty(), "示例报文无正文，消费后应无剩余");
                break;
            }
        }
        (headers, start_line)
    }

    #[test]
    fn whole_message_in_one_chunk() {
        let (headers, start_line) = scan_in_chunks(WIRE.len());
        assert_eq!(start_line, "INVITE sip:a@b SIP/2.0");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0, "Via");
        assert_eq!(headers[1], ("Content-Length".into(), "0".into()));
    }

    #[test]
    fn single_byte_chunks_yield_identical_result() {
        let (headers, start_line) = scan_in_chunks(1);
        assert_eq!(start_line, "INVITE sip:a@b SIP/2.0");
        assert_eq!(
            headers,
            vec![
                ("Via".into(), "SIP/2.0/TCP h;branch=z9hG4bK1".into()),
                ("Content-Length".into(), "0".into()),
            ]
        );
    }

    #[test]
    fn folded_value_keeps_single_field() {
        let wire = b"OPTIONS sip:a@b SIP/2.0\r\nSubject: first\r\n second\r\nVia: v\r\n\r\n";
        let mut scanner = HeaderScanner::new();
        let status = scanner.scan_chunk(wire).unwrap();
        assert!(matches!(status, ScanStatus::Complete { .. }));
        let fields = scanner.take_fields();
        let headers: Vec<_> = fields
            .iter()
            .filter(|f| matches!(f, ScannedField::Header { .. }))
            .collect();
        assert_eq!(headers.len(), 2, "折行不得拆成独立字段");
        assert_eq!(scanner.header_count(), 2);
    }

    #[test]
    fn bare_linefeed_is_rejected() {
        let mut scanner = HeaderScanner::new();
        let err = scanner.scan_chunk(b"INVITE sip:a@b SIP/2.0\nVia: v\r\n\r\n");
        assert_eq!(err, Err(ScanError::BareLineFeed));
    }

    #[test]
    fn missing_colon_is_rejected() {
        let mut scanner = HeaderScanner::new();
        let err = scanner.scan_chunk(b"INVITE sip:a@b SIP/2.0\r\nBadHeader\r\nVia: v\r\n\r\n");
        assert_eq!(err, Err(ScanError::MissingColon));
    }

    #[test]
    fn needmore_reports_zero_progress_inside_incomplete_line() {
        let mut scanner = HeaderScanner::new();
        let status = scanner.scan_chunk(b"INVITE sip:a@").unwrap();
        assert_eq!(status, ScanStatus::NeedMore { consumed: 0 });
    }

    #[test]
    fn committed_prefix_excludes_undecided_field() {
        let mut scanner = HeaderScanner::new();
        // Via 行已终结，但尚不知道下一行是否折行，故只能移交起始行。
        let wire = b"INVITE sip:a@b SIP/2.0\r\nVia: v\r\n";
        let status = scanner.scan_chunk(wire).unwrap();
        assert_eq!(
            status,
            ScanStatus::NeedMore {
                consumed: "INVITE sip:a@b SIP/2.0\r\n".len()
            }
        );
    }
}
