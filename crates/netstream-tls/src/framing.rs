//! 按 TLS 记录边界切分密文读取。
//!
//! `rustls` 的 `read_tls` 会尽量多读，对端在 `close_notify` 之后紧接着发送的明文因此可能
//! 落进会话的解帧缓冲区，随会话一起被丢弃。后端在把字节交给 `rustls` 之前先用
//! [`RecordFraming`] 截断每次读取：记录头读满前只读记录头，之后最多读到当前记录末尾。

/// TLS 记录头：类型、版本（两字节）、长度（两字节，大端）。
const RECORD_HEADER_LEN: usize = 5;

/// 当前记录的读取进度，跨多次读取保留。
#[derive(Debug, Default, Clone)]
pub struct RecordFraming {
    header: [u8; RECORD_HEADER_LEN],
    header_filled: usize,
    body_left: usize,
}

impl RecordFraming {
    /// 下一次读取最多可以请求的字节数，不超过 `capacity`。
    pub fn next_read_len(&self, capacity: usize) -> usize {
        if self.body_left > 0 {
            self.body_left.min(capacity)
        } else {
            (RECORD_HEADER_LEN - self.header_filled).min(capacity)
        }
    }

    /// 登记刚读到的字节；`bytes` 的长度不得超过之前 [`next_read_len`](Self::next_read_len) 的返回值。
    pub fn consume(&mut self, bytes: &[u8]) {
        if self.body_left > 0 {
            self.body_left -= bytes.len().min(self.body_left);
            return;
        }
        let start = self.header_filled;
        let end = (start + bytes.len()).min(RECORD_HEADER_LEN);
        self.header[start..end].copy_from_slice(&bytes[..end - start]);
        self.header_filled = end;
        if self.header_filled == RECORD_HEADER_LEN {
            self.header_filled = 0;
            self.body_left = usize::from(u16::from_be_bytes([self.header[3], self.header[4]]));
        }
    }

    /// 是否恰好停在两条记录之间。
    pub fn at_boundary(&self) -> bool {
        self.header_filled == 0 && self.body_left == 0
    }
}
