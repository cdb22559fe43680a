mod cli;

use std::fs;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use kaldi_asr_core::{
    default_config_path, install_interrupt_handler, load_config, save_config, CancellationToken,
    PerformStatus, SessionConfig, SessionController,
};
use tracing_subscriber::EnvFilter;

use cli::{Args, CliError};

/// SIGINT 的惯例退出码
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(PerformStatus::Completed) => ExitCode::SUCCESS,
        Ok(PerformStatus::Interrupted) => {
            eprintln!("Interrupted");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load(args: &Args) -> Result<SessionConfig, CliError> {
    let path = match &args.config {
        Some(path) => Some(path.clone()),
        None => default_config_path().ok(),
    };

    let mut config = match &path {
        Some(path) => load_config(path)?,
        None => SessionConfig::default(),
    };
    args.apply(&mut config);

    if args.write_config {
        let path = match &path {
            Some(path) => path.clone(),
            None => default_config_path()?,
        };
        save_config(&path, &config)?;
    }

    Ok(config)
}

fn run(args: &Args) -> Result<PerformStatus, CliError> {
    let config = load(args)?;
    if args.inputs.is_empty() {
        return Ok(PerformStatus::Completed);
    }

    let mut audio = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let bytes = fs::read(path).map_err(|source| CliError::Read {
            path: path.clone(),
            source,
        })?;
        audio.push(bytes);
    }

    install_interrupt_handler();
    let mut session = SessionController::ws_gateway().with_cancellation(CancellationToken::process().child());
    session.configure(config)?;

    for round in 0..args.repeat.max(1) {
        let started = Instant::now();

        session.begin_batch(audio.len())?;
        for bytes in &audio {
            session.feed(bytes)?;
        }
        if session.perform()? == PerformStatus::Interrupted {
            return Ok(PerformStatus::Interrupted);
        }

        for (path, text) in args.inputs.iter().zip(session.results()?) {
            println!("{}\t{}", path.display(), text);
        }

        tracing::info!(
            "Round {} finished: {} input(s) in {:?}",
            round + 1,
            audio.len(),
            started.elapsed()
        );
    }

    session.close();
    Ok(PerformStatus::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaldi_asr_core::TextMode;
    use tempfile::tempdir;

    #[test]
    fn test_write_config_merges_flags() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let path_arg = path.to_str().unwrap();

        let args = Args::try_parse_from([
            "kaldi-asr-client",
            "--config",
            path_arg,
            "--server",
            "asr:8001",
            "--accumulate",
            "--write-config",
        ])
        .unwrap();
        assert_eq!(run(&args).unwrap(), PerformStatus::Completed);

        let saved = load_config(&path).unwrap();
        assert_eq!(saved.servers, vec!["asr:8001"]);
        assert_eq!(saved.text_mode, TextMode::Accumulate);

        // 再次加载时文件中的值生效
        let args = Args::try_parse_from(["kaldi-asr-client", "--config", path_arg, "x.wav"]).unwrap();
        let config = load(&args).unwrap();
        assert_eq!(config, saved);
    }

    #[test]
    fn test_missing_input_file() {
        let dir = tempdir().unwrap();
        let config = dir.path().join("config.json");
        let args = Args::try_parse_from([
            "kaldi-asr-client",
            "--config",
            config.to_str().unwrap(),
            dir.path().join("missing.wav").to_str().unwrap(),
        ])
        .unwrap();
        assert!(matches!(run(&args), Err(CliError::Read { .. })));
    }
}
