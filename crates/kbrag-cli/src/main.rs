//! kbrag CLI - 基于知识库的检索增强问答

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kbrag_core::{CancellationToken, Config};
use tracing::warn;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod ask;

#[derive(Debug, Parser)]
#[command(name = "kbrag")]
#[command(about = "Answer a question from a knowledge base with an agentic RAG loop", long_about = None)]
#[command(version)]
struct Cli {
    /// Question to answer (words are joined with spaces)
    #[arg(required = true)]
    question: Vec<String>,
    /// Number of passages kept per iteration
    #[arg(long)]
    k: Option<usize>,
    /// Minimum similarity score for a passage to be used
    #[arg(long, allow_negative_numbers = true)]
    min_score: Option<f32>,
    /// Maximum plan/retrieve/answer/evaluate cycles
    #[arg(long)]
    max_iterations: Option<u32>,
    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Use an in-process index loaded from this corpus file
    #[arg(long)]
    index: Option<PathBuf>,
    /// Print the whole run result as JSON
    #[arg(long)]
    json: bool,
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn question(&self) -> String {
        self.question.join(" ")
    }

    /// 配置文件 → 环境变量 → 命令行参数
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("加载配置文件 {} 失败", path.display()))?,
            None => Config::default(),
        };
        config.apply_env_overrides();
        self.apply_overrides(&mut config);
        config.validate().context("配置无效")?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut Config) {
        if let Some(k) = self.k {
            config.agent.k = k;
        }
        if let Some(min_score) = self.min_score {
            config.agent.min_score = min_score;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.agent.max_iterations = max_iterations;
        }
        if let Some(path) = &self.index {
            config.vector.backend = kbrag_core::VectorBackend::Flat;
            config.vector.flat = Some(kbrag_core::FlatIndexConfig { path: path.clone() });
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "kbrag=debug,info" } else { "kbrag=info,warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.load_config()?;
    let orchestrator = ask::build_orchestrator(&config)?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消");
            token.cancel();
        }
    });

    let result = orchestrator
        .run(&cli.question(), (&config.agent).into(), &cancel)
        .await
        .context("问答循环失败")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", ask::render(&result));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_question_and_flags() {
        let cli = Cli::try_parse_from([
            "kbrag",
            "what",
            "is",
            "agentic",
            "rag?",
            "--k",
            "6",
            "--min-score",
            "-0.1",
            "--json",
        ])
        .unwrap();

        assert_eq!(cli.question(), "what is agentic rag?");
        assert_eq!(cli.k, Some(6));
        assert_eq!(cli.min_score, Some(-0.1));
        assert!(cli.json);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_question_is_required() {
        assert!(Cli::try_parse_from(["kbrag", "--k", "2"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "kbrag",
            "q",
            "--max-iterations",
            "5",
            "--index",
            "corpus.json",
        ])
        .unwrap();

        let mut config = Config::default();
        config.vector.backend = kbrag_core::VectorBackend::OpenSearch;
        cli.apply_overrides(&mut config);

        assert_eq!(config.agent.max_iterations, 5);
        assert_eq!(config.agent.k, 4);
        assert_eq!(config.vector.backend, kbrag_core::VectorBackend::Flat);
        assert_eq!(
            config.vector.flat.unwrap().path,
            PathBuf::from("corpus.json")
        );
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kbrag.json");
        std::fs::write(&path, r#"{"agent": {"k": 2}}"#).unwrap();

        let cli = Cli::try_parse_from([
            "kbrag",
            "q",
            "--config",
            path.to_str().unwrap(),
            "--min-score",
            "0.5",
        ])
        .unwrap();

        let config = cli.load_config().unwrap();
        assert_eq!(config.agent.k, 2);
        assert!((config.agent.min_score - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let cli = Cli::try_parse_from(["kbrag", "q", "--max-iterations", "0"]).unwrap();
        assert!(cli.load_config().is_err());
    }
}
