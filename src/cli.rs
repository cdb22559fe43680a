use std::path::PathBuf;

use clap::Parser;
use kaldi_asr_core::{ConfigError, SessionConfig, SessionError, TextMode};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Unable to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// 把一批 WAV 文件并行发送到 Kaldi 推理服务，按输入顺序打印识别结果
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// WAV files, one utterance each
    #[arg(required_unless_present = "write_config")]
    pub inputs: Vec<PathBuf>,

    /// Config file (default: <config dir>/kaldi-asr-client/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Inference gateway address, host:port or http(s)://host:port. Repeat for several servers.
    #[arg(long = "server")]
    pub servers: Vec<String>,

    #[arg(long)]
    pub model: Option<String>,

    /// Streams per server
    #[arg(long)]
    pub contexts: Option<i64>,

    /// Samples per chunk
    #[arg(long)]
    pub chunk_length: Option<i64>,

    /// Expected sample rate of every input
    #[arg(long)]
    pub sample_rate: Option<f32>,

    /// Request CTM output instead of plain text
    #[arg(long)]
    pub ctm: bool,

    /// Concatenate partial results of every chunk
    #[arg(long)]
    pub accumulate: bool,

    #[arg(short, long)]
    pub verbose: bool,

    /// Run the same batch this many times on one session
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,

    /// Save the merged configuration to the config file
    #[arg(long)]
    pub write_config: bool,
}

impl Args {
    /// 命令行参数覆盖配置文件
    pub fn apply(&self, config: &mut SessionConfig) {
        if !self.servers.is_empty() {
            config.servers = self.servers.clone();
        }
        if let Some(model) = &self.model {
            config.model_name = model.clone();
        }
        if let Some(contexts) = self.contexts {
            config.ncontextes = contexts;
        }
        if let Some(chunk_length) = self.chunk_length {
            config.chunk_length = chunk_length;
        }
        if let Some(sample_rate) = self.sample_rate {
            config.sample_rate = sample_rate;
        }
        if self.ctm {
            config.ctm = true;
        }
        if self.accumulate {
            config.text_mode = TextMode::Accumulate;
        }
        if self.verbose {
            config.verbose = true;
        }
    }
}
