use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use dbplanner_core_sdk::assist::{self, DesignInputs, SuggestionKind};
use dbplanner_core_sdk::models::{ProviderConfig, ProviderKind};
use dbplanner_core_sdk::{
    db, pages, server, telemetry, ChatBackend, ChatError, ChatSession, LlmClient, Submission,
};

/**
 * \brief CLI 程序入口：配置模型、编辑草稿、对话与生成建议。
 */
#[derive(Parser, Debug)]
#[command(name = "dbplanner", version, about = "Database design planner with an AI assistant")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 保存模型配置；未给出的字段沿用已保存的值。
     */
    Configure {
        /// mistral | gemini | custom
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        temperature: Option<f64>,
        /// Required for the custom provider
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Print the saved configuration with the key masked.
    ShowConfig,

    /// List the design pages.
    Pages,

    /// Read or write a page note.
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },

    /**
     * \brief 在指定页面上下文中进行多轮对话，逐行读取标准输入。
     */
    Chat {
        #[arg(long, default_value = "dashboard")]
        page: String,
    },

    /**
     * \brief 生成草稿建议（entities | attributes | relationships | tables）。
     */
    Suggest {
        kind: String,
        /// Merge the reply into the stored note
        #[arg(long, default_value_t = false)]
        save: bool,
    },

    /**
     * \brief 启动本地 HTTP 服务并提供前端页面。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },

    /// Turn the local event log on or off.
    Telemetry {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
}

#[derive(Subcommand, Debug)]
enum NoteAction {
    Get { key: String },
    Set { key: String, text: String },
}

/**
 * \brief 把存储中的配置值转成 ProviderConfig；未配置时返回 None。
 */
fn stored_config(stored: Option<Value>) -> Result<Option<ProviderConfig>> {
    match ProviderConfig::from_stored(stored) {
        Ok(config) => Ok(Some(config)),
        Err(ChatError::ConfigMissing) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let conn = db::open_default_db().context("open database failed")?;
    db::migrate(&conn).context("apply migrations failed")?;
    let telemetry_enabled = db::get_telemetry_enabled(&conn).unwrap_or(false);
    telemetry::set_enabled(telemetry_enabled);

    match cli.command {
        Commands::Configure {
            provider,
            api_key,
            model,
            temperature,
            endpoint,
        } => {
            let previous = stored_config(db::load_settings(&conn)?)?;
            let mut config = match provider {
                Some(p) => {
                    let kind: ProviderKind = p.parse()?;
                    match previous {
                        Some(mut prev) if prev.provider != kind => {
                            prev.switch_provider(kind);
                            prev
                        }
                        Some(prev) => prev,
                        None => ProviderConfig::new(kind, ""),
                    }
                }
                None => previous.unwrap_or_default(),
            };
            if let Some(key) = api_key {
                config.api_key = key;
            }
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(t) = temperature {
                config.temperature = t;
            }
            if endpoint.is_some() {
                config.custom_endpoint = endpoint;
            }
            if let Err(e) = config.validate() {
                if e.is_precondition() && config.api_key.trim().is_empty() {
                    println!("{}", config.provider.key_help());
                }
                return Err(e).context("configuration not saved");
            }

            db::save_settings(&conn, &config).context("save settings failed")?;
            telemetry::log_event(
                "cli.configure",
                &format!("provider={} model={}", config.provider.as_str(), config.model),
            );
            println!(
                "Saved settings ({} | {} | temperature {})",
                config.provider, config.model, config.temperature
            );
        }
        Commands::ShowConfig => match stored_config(db::load_settings(&conn)?)? {
            Some(config) => {
                let redacted = config.redacted();
                println!("{}", serde_json::to_string_pretty(&redacted)?);
                println!("Available models: {}", config.provider.model_options().join(", "));
            }
            None => println!("Not configured, run: dbplanner configure --provider ... --api-key ..."),
        },
        Commands::Pages => {
            for page in pages::PAGES {
                println!("{:<16} {}", page.slug, page.title);
                for field in page.fields {
                    println!("    {:<32} {}", field.key, field.label);
                }
            }
        }
        Commands::Note { action } => match action {
            NoteAction::Get { key } => {
                println!("{}", pages::load_note(&conn, &key)?);
            }
            NoteAction::Set { key, text } => {
                pages::save_note(&conn, &key, &text)?;
                println!("Saved {}", key);
            }
        },
        Commands::Chat { page } => {
            let Some(page) = pages::find_page(&page) else {
                bail!("unknown page: {}", page);
            };
            let config = stored_config(db::load_settings(&conn)?)?;
            drop(conn);

            let backend: Arc<dyn ChatBackend> = Arc::new(LlmClient::new()?);
            let session = ChatSession::new(page.context, backend);
            if let Some(config) = config {
                session.configure(config);
            }
            run_chat(&session, page.title).await?;
        }
        Commands::Suggest { kind, save } => {
            let kind: SuggestionKind = kind.parse()?;
            let inputs = DesignInputs::load(&conn)?;
            let current = pages::load_note(&conn, kind.target_key())?;
            let config = stored_config(db::load_settings(&conn)?)?;

            let client = LlmClient::new()?;
            let suggestion =
                assist::generate(&client, config.as_ref(), kind, &inputs, &current).await?;
            println!("{}", suggestion.reply);
            if save {
                pages::save_note(&conn, suggestion.target_key, &suggestion.merged)
                    .context("save note failed")?;
                println!("\nSaved to {}", suggestion.target_key);
            }
        }
        Commands::Serve { addr } => {
            drop(conn);
            server::run(&addr).await?;
        }
        Commands::Telemetry { state } => {
            let enabled = state == "on";
            db::set_telemetry_enabled(&conn, enabled).context("save telemetry failed")?;
            telemetry::set_enabled(enabled);
            println!(
                "Telemetry {} ({})",
                if enabled { "enabled" } else { "disabled" },
                telemetry::log_path().display()
            );
        }
    }

    Ok(())
}

/**
 * \brief 对话循环：空行忽略，Ctrl-C 取消在途请求，EOF 或 /quit 退出。
 */
async fn run_chat(session: &ChatSession, title: &str) -> Result<()> {
    println!("{} assistant. Type /quit to exit, /clear to reset the conversation.", title);
    if session.config().is_none() {
        println!("Please configure your AI settings first: dbplanner configure");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await.context("read stdin failed")? else {
            break;
        };
        match line.trim() {
            "/quit" => break,
            "/clear" => {
                session.clear_transcript();
                println!("Conversation cleared");
                continue;
            }
            _ => {}
        }

        tokio::select! {
            outcome = session.submit(&line) => match outcome {
                Ok(Submission::Replied(reply)) => println!("{}\n", reply),
                Ok(Submission::Ignored) => {}
                Err(ChatError::ConfigMissing) => {
                    println!("Please configure your AI settings first");
                }
                Err(e) => println!("Failed to get response from AI: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
                println!("\nRequest cancelled");
            }
        }
    }
    Ok(())
}
