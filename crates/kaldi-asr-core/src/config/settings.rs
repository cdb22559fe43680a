use serde::{Deserialize, Serialize};

/// 文本收集策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMode {
    /// 只收集末尾分块的文本，覆盖写入
    #[default]
    Final,
    /// 每个分块的文本片段都追加
    Accumulate,
}

/// 会话配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    /// 每个服务地址的连接数
    #[serde(default = "default_ncontextes")]
    pub ncontextes: i64,
    /// 每个分块的样本数
    #[serde(default = "default_chunk_length")]
    pub chunk_length: i64,
    /// 批次内所有输入必须使用的采样率
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f32,
    /// 请求 CTM 输出而不是 TEXT
    #[serde(default)]
    pub ctm: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub text_mode: TextMode,
    /// 每个批次开始前重建所有流
    #[serde(default = "default_true")]
    pub reset_on_begin: bool,
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,
    #[serde(default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,
}

fn default_servers() -> Vec<String> {
    vec!["localhost:8010".to_string()]
}

fn default_model_name() -> String {
    "kaldi_online".to_string()
}

fn default_ncontextes() -> i64 {
    10
}

fn default_chunk_length() -> i64 {
    8160
}

fn default_sample_rate() -> f32 {
    16000.0
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_us() -> u64 {
    1000
}

fn default_liveness_interval_ms() -> u64 {
    1000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            model_name: default_model_name(),
            ncontextes: default_ncontextes(),
            chunk_length: default_chunk_length(),
            sample_rate: default_sample_rate(),
            ctm: false,
            verbose: false,
            text_mode: TextMode::default(),
            reset_on_begin: true,
            poll_interval_us: default_poll_interval_us(),
            liveness_interval_ms: default_liveness_interval_ms(),
        }
    }
}

impl SessionConfig {
    /// 服务端输出张量名
    pub fn output_name(&self) -> &'static str {
        if self.ctm {
            "CTM"
        } else {
            "TEXT"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: SessionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.servers, vec!["localhost:8010"]);
        assert_eq!(config.chunk_length, 8160);
        assert_eq!(config.output_name(), "TEXT");
    }

    #[test]
    fn test_partial_json() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"servers":["a:1","b:2"],"ctm":true,"text_mode":"accumulate"}"#,
        )
        .unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.output_name(), "CTM");
        assert_eq!(config.text_mode, TextMode::Accumulate);
        assert_eq!(config.ncontextes, 10);
    }
}
