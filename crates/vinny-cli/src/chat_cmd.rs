//! Interactive REPL for driving the assistant from a terminal.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;

use vinny_core::chat::{ChatClient, RemoteBackend};
use vinny_core::controller::run_turn;
use vinny_core::session::{SessionContext, SessionState, TurnLog};
use vinny_core::tools::ToolExecutor;

use crate::config::VinnyConfig;
use crate::executor_from_config;

fn prompt_line(label: &str) -> Result<String> {
    print!("{label} ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read stdin")?;
    Ok(line.trim().to_string())
}

pub async fn run_chat(pool: PgPool, config: &VinnyConfig) -> Result<()> {
    let lead_id: i64 = prompt_line("Enter lead_id:")?
        .parse()
        .context("lead_id must be an integer")?;
    let buyer_id: i64 = prompt_line("Enter buyer_id:")?
        .parse()
        .context("buyer_id must be an integer")?;
    let escalation_phone = prompt_line("Enter escalation phone number:")?;

    let executor: Arc<dyn ToolExecutor> = executor_from_config(pool, config);

    let backend = RemoteBackend::new(config.backend.clone());
    let mut client = ChatClient::new(
        Box::new(backend),
        lead_id.to_string(),
        config.backend_username.clone(),
        config.backend_secret.clone(),
    );
    client
        .bind_session(true)
        .await
        .context("failed to bind a backend session")?;

    let mut session = SessionState {
        context: SessionContext {
            lead_id,
            buyer_id,
            escalation_phone,
        },
        log: TurnLog::new(),
        client,
    };

    println!("\nVinny is ready. Type your message (or 'exit', '/logs').\n");
    loop {
        let user = prompt_line("You:")?;
        if user.is_empty() {
            continue;
        }
        if user.eq_ignore_ascii_case("exit") || user.eq_ignore_ascii_case("quit") {
            break;
        }
        if user == "/logs" {
            println!("---- recent logs ----");
            for entry in session.log.recent(5) {
                println!("[{}] {}: {}", entry.at.format("%H:%M:%S"), entry.kind, entry.detail);
            }
            println!("---------------------");
            continue;
        }

        let reply = run_turn(&mut session, executor.as_ref(), &user).await;
        println!("Vinny: {reply}\n");
    }

    println!("Bye!");
    Ok(())
}
