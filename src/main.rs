//! Memchat CLI
//!
//! 入口：加载配置、初始化日志，然后按子命令运行交互对话（默认）、自检或列出记忆。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use memchat::agent::{Assistant, DEFAULT_LIST_LIMIT};
use memchat::config::{load_config, AppConfig};
use memchat::core::{preview, setup, Persistence, TurnResult, DEFAULT_USER_ID};
use memchat::diagnostics::{check_environment, has_failures, probe_backends, CheckItem};
use memchat::observability;

const EXIT_WORDS: [&str; 4] = ["sair", "exit", "quit", "q"];

#[derive(Parser)]
#[command(name = "memchat", version, about = "Chat assistant with per-user long-term memory")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 交互式对话（默认）
    Chat {
        /// 用户 ID，未提供时启动后询问
        #[arg(short, long)]
        user: Option<String>,
    },
    /// 检查配置与后端连通性
    Check {
        /// 不发送 LLM 测试请求
        #[arg(long)]
        skip_llm: bool,
    },
    /// 列出某用户最近的记忆
    Memories {
        user_id: String,
        #[arg(short, long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;

    if let Err(e) = observability::init(cfg.app.log_file.as_deref()) {
        eprintln!("Warning: could not open log file ({e}), logging to stderr only");
        observability::init(None).context("Failed to initialize logging")?;
    }

    match cli.command.unwrap_or(Commands::Chat { user: None }) {
        Commands::Chat { user } => chat(&cfg, user).await,
        Commands::Check { skip_llm } => check(&cfg, !skip_llm).await,
        Commands::Memories { user_id, limit } => memories(&cfg, &user_id, limit).await,
    }
}

fn display_banner() {
    println!(
        r#"
    ╔═══════════════════════════════════════════════╗
    ║                   MEMCHAT                     ║
    ║     Assistant with vector memory v{:<8}    ║
    ╚═══════════════════════════════════════════════╝
"#,
        env!("CARGO_PKG_VERSION")
    );
    println!("  💭 Conversations with persistent memory\n");
}

async fn init_assistant(cfg: &AppConfig) -> Assistant {
    match Assistant::from_config(cfg).await {
        Ok(assistant) => assistant,
        Err(e) => {
            tracing::error!("configuration error: {}", e);
            eprintln!("❌ Configuration error: {e}");
            eprintln!("🔧 Set the required variables in .env or config/default.toml, then run `memchat check`.");
            std::process::exit(1);
        }
    }
}

/// 打印提示并读一行；Ctrl+C 或 EOF 时返回 None
async fn read_line(lines: &mut Lines<BufReader<Stdin>>, prompt: &str) -> anyhow::Result<Option<String>> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    tokio::select! {
        line = lines.next_line() => Ok(line?),
        _ = tokio::signal::ctrl_c() => Ok(None),
    }
}

fn print_memory_notice(result: &TurnResult, user_id: &str, message: &str, backend: &str) {
    let timestamp = chrono::Local::now().format("%H:%M:%S");
    let short = preview(message, 30);
    match result.persistence {
        Persistence::Stored => {
            println!("💾 [{timestamp}] New memory stored:");
            println!("   • User: {user_id}");
            println!("   • Content: \"{short}\"");
            println!("   • Backend: {backend}");
        }
        Persistence::Reused => {
            println!("🔄 [{timestamp}] Existing memory used (nothing new stored):");
            println!("   • User: {user_id}");
            println!("   • Query: \"{short}\"");
            println!("   • Memories retrieved: {}", result.retrieved);
        }
        Persistence::Failed => {
            println!("⚠️  [{timestamp}] WARNING: failed to store memory (see logs)");
        }
        Persistence::Skipped => {}
    }
    println!();
}

async fn chat(cfg: &AppConfig, user: Option<String>) -> anyhow::Result<()> {
    display_banner();
    let assistant = init_assistant(cfg).await;
    let backend = assistant.orchestrator().memory().name().to_string();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let user_id = match user {
        Some(u) => u,
        None => {
            let prompt = format!("👤 Enter your user ID (blank for '{DEFAULT_USER_ID}'): ");
            match read_line(&mut lines, &prompt).await? {
                Some(line) => line,
                None => return Ok(()),
            }
        }
    };
    let user_id = memchat::core::resolve_user_id(&user_id).to_string();

    println!("\n🚀 Conversation started for user: {user_id}");
    println!("💡 Type 'exit' to end the conversation\n");

    loop {
        let Some(input) = read_line(&mut lines, "🧑 You: ").await? else {
            println!("\n\n👋 Session ended.");
            break;
        };
        let input = input.trim();
        if input.is_empty() {
            println!("⚠️ Please type something to talk to the assistant.");
            continue;
        }
        if EXIT_WORDS.contains(&input.to_lowercase().as_str()) {
            println!("👋 Bye!");
            break;
        }

        print!("🤖 Assistant is thinking...\r");
        std::io::stdout().flush()?;
        let result = assistant.process_message(input, &user_id).await;
        print!("{}\r", " ".repeat(40));
        println!("🤖 Assistant: {}\n", result.response);
        print_memory_notice(&result, &user_id, input, &backend);
    }

    assistant.shutdown().await;
    Ok(())
}

fn print_items(items: &[CheckItem]) {
    for item in items {
        println!("  [{:<4}] {:<18} {}", item.status, item.name, item.detail);
    }
}

async fn check(cfg: &AppConfig, call_llm: bool) -> anyhow::Result<()> {
    println!("🔎 Checking configuration");
    let env_items = check_environment(cfg);
    print_items(&env_items);
    if has_failures(&env_items) {
        println!("\n❌ Fix the failing items above before starting a conversation.");
        std::process::exit(1);
    }

    println!("\n🔌 Probing backends");
    let backends = setup(cfg).await.context("Backend setup failed")?;
    let probe_items = probe_backends(&backends, call_llm).await;
    print_items(&probe_items);
    if has_failures(&probe_items) {
        std::process::exit(1);
    }
    println!("\n✅ All checks passed");
    Ok(())
}

async fn memories(cfg: &AppConfig, user_id: &str, limit: usize) -> anyhow::Result<()> {
    let assistant = init_assistant(cfg).await;
    let records = assistant
        .user_memories(user_id, limit)
        .await
        .context("Failed to list memories")?;

    if records.is_empty() {
        println!("No memories stored for '{}'.", memchat::core::resolve_user_id(user_id));
        return Ok(());
    }
    for (i, record) in records.iter().enumerate() {
        println!(
            "{:>3}. [{}] {}",
            i + 1,
            record.created_at.format("%Y-%m-%d %H:%M"),
            record.text
        );
    }
    Ok(())
}
