//! `tabwise chat`: interactive or single-message chat.

use std::io::Write;
use std::path::{Path, PathBuf};

use tabwise_agent::Assistant;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::runtime;

pub async fn run(
    config_path: Option<&Path>,
    message: Option<String>,
    page: Option<PathBuf>,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = runtime::load_config(config_path)?;
    let has_page = page.is_some() && config.privacy.allow_page_context;
    let pages = runtime::page_provider(&config, page);
    let assistant = runtime::build_assistant(&config, pages)?;

    runtime::initialize(&assistant).await?;

    if let Some(msg) = message {
        // Single message mode
        ask(&assistant, &msg, has_page, stream).await?;
        assistant.shutdown().await;
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        Tabwise Assistant: Interactive        ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Model:     {}", config.model.name);
    println!("  Profile:   {}", config.runtime.profile);
    println!("  Page:      {}", if has_page { "attached" } else { "none" });
    println!();
    println!("  Commands:  /tldr  summarize the page");
    println!("             /clear start a new conversation");
    println!("             /reset reload the model and start over");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            "" => {}
            "exit" | "quit" => break,
            "/clear" => {
                assistant.clear_conversation().await;
                println!("  Conversation cleared.");
            }
            "/reset" => {
                assistant.reset_conversation_state().await;
                println!("  {}", assistant.get_status().last_error.map_or_else(
                    || "Model reloaded.".to_string(),
                    |e| format!("[Error] {e}"),
                ));
            }
            "/tldr" => match assistant.summarize_current_page().await {
                Ok(summary) => print_reply(&summary),
                Err(e) => eprintln!("  [Error] {e}"),
            },
            query => {
                if let Err(e) = ask(&assistant, query, has_page, stream).await {
                    eprintln!("  [Error] {e}");
                }
            }
        }
        println!();
        prompt()?;
    }

    assistant.shutdown().await;
    println!();
    println!("  Goodbye! 👋");
    println!();

    Ok(())
}

async fn ask(
    assistant: &Assistant,
    query: &str,
    include_context: bool,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !stream {
        eprint!("  Thinking...");
        let response = assistant.process_query(query, include_context, true).await;
        eprint!("\r              \r");
        print_reply(&response?.text);
        return Ok(());
    }

    let mut fragments = assistant
        .process_streaming_query(query, include_context, true)
        .await?;
    print!("  Assistant > ");
    std::io::stdout().flush()?;
    while let Some(fragment) = fragments.recv().await {
        match fragment {
            Ok(text) => {
                print!("{}", text.replace('\n', "\n              "));
                std::io::stdout().flush()?;
            }
            Err(e) => {
                println!();
                return Err(e.into());
            }
        }
    }
    println!();
    Ok(())
}

fn print_reply(text: &str) {
    for line in text.lines() {
        println!("  Assistant > {line}");
    }
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}
