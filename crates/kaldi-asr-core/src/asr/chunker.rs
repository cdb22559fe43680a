//! 把一条语音切成定长分块

use crate::error::SessionError;

/// 一个分块，借用原始样本
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chunk<'a> {
    pub correlation_id: u64,
    pub index: u64,
    pub is_first: bool,
    pub is_last: bool,
    pub samples: &'a [f32],
}

impl Chunk<'_> {
    /// 按固定帧长编码为 f32 小端字节，不足部分补零
    pub fn to_payload(&self, frame_samples: usize) -> Vec<u8> {
        debug_assert!(self.samples.len() <= frame_samples);
        let mut payload = Vec::with_capacity(frame_samples * 4);
        for &sample in self.samples {
            payload.extend_from_slice(&sample.to_le_bytes());
        }
        payload.resize(frame_samples * 4, 0);
        payload
    }
}

/// 惰性分块迭代器；克隆即可从头重新迭代
#[derive(Debug, Clone)]
pub struct Chunker<'a> {
    samples: &'a [f32],
    chunk_length: usize,
    correlation_id: u64,
    offset: usize,
    index: u64,
    done: bool,
}

impl<'a> Chunker<'a> {
    pub fn new(
        samples: &'a [f32],
        chunk_length: usize,
        correlation_id: u64,
    ) -> Result<Self, SessionError> {
        if chunk_length == 0 {
            return Err(SessionError::InvalidChunkLength(0));
        }
        if samples.is_empty() {
            return Err(SessionError::EmptyInput { correlation_id });
        }

        Ok(Self {
            samples,
            chunk_length,
            correlation_id,
            offset: 0,
            index: 0,
            done: false,
        })
    }

    /// 分块总数 = ceil(L / C)
    pub fn chunk_count(&self) -> usize {
        self.samples.len().div_ceil(self.chunk_length)
    }
}

impl<'a> Iterator for Chunker<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        if self.done {
            return None;
        }

        let remaining = self.samples.len() - self.offset;
        let num_samples = self.chunk_length.min(remaining);
        let is_last = self.chunk_length >= remaining;

        let chunk = Chunk {
            correlation_id: self.correlation_id,
            index: self.index,
            is_first: self.offset == 0,
            is_last,
            samples: &self.samples[self.offset..self.offset + num_samples],
        };

        self.offset += num_samples;
        self.index += 1;
        self.done = is_last;

        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_cover(len: usize, chunk_length: usize) {
        let samples: Vec<f32> = (0..len).map(|i| i as f32).collect();
        let chunks: Vec<_> = Chunker::new(&samples, chunk_length, 7).unwrap().collect();

        assert_eq!(chunks.len(), len.div_ceil(chunk_length), "L={len} C={chunk_length}");
        assert_eq!(chunks.iter().map(|c| c.samples.len()).sum::<usize>(), len);
        assert_eq!(chunks.iter().filter(|c| c.is_first).count(), 1);
        assert_eq!(chunks.iter().filter(|c| c.is_last).count(), 1);
        assert!(chunks[0].is_first);
        assert!(chunks.last().unwrap().is_last);
        assert_eq!(chunks[0].is_last, len <= chunk_length);

        let rebuilt: Vec<f32> = chunks.iter().flat_map(|c| c.samples.iter().copied()).collect();
        assert_eq!(rebuilt, samples);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as u64);
            assert_eq!(chunk.correlation_id, 7);
        }
    }

    #[test]
    fn test_chunks_cover_buffer_exactly() {
        for len in [1, 2, 5, 99, 100, 101, 250, 8160, 8161, 20000] {
            for chunk_length in [1, 3, 100, 8160] {
                check_cover(len, chunk_length);
            }
        }
    }

    #[test]
    fn test_single_chunk_has_both_flags() {
        let samples = vec![0.5f32; 10];
        let chunks: Vec<_> = Chunker::new(&samples, 8160, 1).unwrap().collect();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_first && chunks[0].is_last);
    }

    #[test]
    fn test_exact_multiple_ends_on_full_chunk() {
        let samples = vec![0.0f32; 300];
        let chunks: Vec<_> = Chunker::new(&samples, 100, 1).unwrap().collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].samples.len(), 100);
        assert!(chunks[2].is_last);
        assert!(!chunks[1].is_last);
    }

    #[test]
    fn test_clone_restarts() {
        let samples = vec![1.0f32; 25];
        let chunker = Chunker::new(&samples, 10, 3).unwrap();
        assert_eq!(chunker.chunk_count(), 3);
        let first: Vec<_> = chunker.clone().collect();
        let second: Vec<_> = chunker.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = Chunker::new(&[], 10, 4).unwrap_err();
        assert!(matches!(err, SessionError::EmptyInput { correlation_id: 4 }));
    }

    #[test]
    fn test_zero_chunk_length_rejected() {
        let err = Chunker::new(&[1.0], 0, 1).unwrap_err();
        assert!(matches!(err, SessionError::InvalidChunkLength(0)));
    }

    #[test]
    fn test_payload_is_padded_to_frame() {
        let samples = [1.0f32, -2.0];
        let chunk = Chunker::new(&samples, 4, 1).unwrap().next().unwrap();
        let payload = chunk.to_payload(4);
        assert_eq!(payload.len(), 16);
        assert_eq!(&payload[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&payload[4..8], &(-2.0f32).to_le_bytes());
        assert!(payload[8..].iter().all(|&b| b == 0));
    }
}
