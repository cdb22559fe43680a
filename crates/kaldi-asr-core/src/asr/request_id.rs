//! 请求 ID 编解码
//!
//! 格式为 `{corr_id}_{index}_{first}_{last}`，标志位用 `1`/`0` 表示。
//! 响应回来时直接解析请求 ID 即可定位所属语音，不需要请求表。

use std::fmt;
use std::str::FromStr;

use super::chunker::Chunk;
use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId {
    pub correlation_id: u64,
    pub index: u64,
    pub is_first: bool,
    pub is_last: bool,
}

impl RequestId {
    pub fn for_chunk(chunk: &Chunk<'_>) -> Self {
        Self {
            correlation_id: chunk.correlation_id,
            index: chunk.index,
            is_first: chunk.is_first,
            is_last: chunk.is_last,
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn decode(raw: &str) -> Result<Self, SessionError> {
        raw.parse()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.correlation_id,
            self.index,
            flag(self.is_first),
            flag(self.is_last)
        )
    }
}

impl FromStr for RequestId {
    type Err = SessionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || SessionError::MalformedRequestId(raw.to_string());

        let mut parts = raw.split('_');
        let correlation_id = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let index = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let is_first = parts.next().and_then(parse_flag).ok_or_else(malformed)?;
        let is_last = parts.next().and_then(parse_flag).ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }

        Ok(Self {
            correlation_id,
            index,
            is_first,
            is_last,
        })
    }
}

fn flag(value: bool) -> char {
    if value {
        '1'
    } else {
        '0'
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}
