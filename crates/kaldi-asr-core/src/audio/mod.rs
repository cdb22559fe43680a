use std::io::Cursor;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AudioError {
    #[error("Invalid WAV data: {0}")]
    Decode(String),
    #[error("Unsupported WAV format: {0}")]
    Unsupported(String),
    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// 解码后的单声道音频
#[derive(Debug, Clone, PartialEq)]
pub struct WaveData {
    pub samples: Vec<f32>,
    pub sample_rate: f32,
    /// 时长（秒）
    pub duration: f32,
}

impl WaveData {
    pub fn new(samples: Vec<f32>, sample_rate: f32) -> Self {
        let duration = if sample_rate > 0.0 {
            samples.len() as f32 / sample_rate
        } else {
            0.0
        };
        Self {
            samples,
            sample_rate,
            duration,
        }
    }
}

/// 音频解码器
pub trait AudioSource: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<WaveData, AudioError>;
}

/// RIFF/WAV 解码
///
/// 只取第一个声道。整数样本保持原始整数刻度（服务端按 Kaldi 波形读取的约定处理），
/// 浮点样本原样保留。
#[derive(Debug, Default, Clone, Copy)]
pub struct WavSource;

impl AudioSource for WavSource {
    fn parse(&self, bytes: &[u8]) -> Result<WaveData, AudioError> {
        let reader =
            hound::WavReader::new(Cursor::new(bytes)).map_err(|e| AudioError::Decode(e.to_string()))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                if spec.bits_per_sample > 32 {
                    return Err(AudioError::Unsupported(format!(
                        "{}-bit integer samples",
                        spec.bits_per_sample
                    )));
                }
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32))
                    .collect::<Result<_, _>>()
                    .map_err(|e| AudioError::Decode(e.to_string()))?
            }
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| AudioError::Decode(e.to_string()))?,
        };

        let samples = interleaved.into_iter().step_by(channels).collect();
        Ok(WaveData::new(samples, spec.sample_rate as f32))
    }
}

/// 将整数刻度的样本编码为 16-bit 单声道 WAV
pub fn encode_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer =
        hound::WavWriter::new(&mut cursor, spec).map_err(|e| AudioError::Encoding(e.to_string()))?;

    for &sample in samples {
        let amplitude = sample.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        writer
            .write_sample(amplitude)
            .map_err(|e| AudioError::Encoding(e.to_string()))?;
    }

    writer
        .finalize()
        .map_err(|e| AudioError::Encoding(e.to_string()))?;

    Ok(cursor.into_inner())
}
