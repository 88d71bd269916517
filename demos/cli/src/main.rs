//! `gridloom-chat` — an interactive REPL driving the runtime against
//! the in-tree scripted adapter. Demonstrates the public API end to
//! end (a `Runner`, streaming events, session persistence across
//! turns) without a real model provider; not part of the library's
//! public contract, just a way to see the engine run.
//!
//! Grounded on the teacher's `gateway/src/cli/chat.rs`: a rustyline
//! REPL, slash commands for session control, streamed output to
//! stdout with tool/thought chatter dimmed on stderr. Since there is no
//! real model behind the scripted adapter, each turn scripts its own
//! reply before running: a `calc a + b` line becomes a `math.add` tool
//! call followed by a text reply, anything else is echoed back.

use std::io::Write;
use std::sync::Arc;

use gridloom::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RuntimeConfig::load_or_default("gridloom.toml").with_env_overrides();
    gridloom::tracing_init::init(&config.logging);

    let adapter = Arc::new(ScriptedAdapter::new(Vec::new()));
    let (runner, mut session) = RuntimeBuilder::new(config).with_adapter("scripted", adapter.clone()).build()?;

    let agent_name = "assistant";
    let agent = AgentDef::new(agent_name, "scripted")
        .with_tools(["echo".to_string(), "math.add".to_string()])
        .build();

    let mut rl = rustyline::DefaultEditor::new()?;
    let history_path = std::env::temp_dir().join("gridloom_chat_history.txt");
    let _ = rl.load_history(&history_path);

    eprintln!("gridloom interactive demo (scripted adapter, no real model)");
    eprintln!("Type /help for commands, or \"calc 2 + 3\" to exercise the math tool. Ctrl+D to exit");
    eprintln!();

    loop {
        let readline = rl.readline("you> ");
        match readline {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();

                if trimmed.starts_with('/') {
                    if handle_slash_command(trimmed, &mut session) {
                        break;
                    }
                    continue;
                }

                send_message(&runner, &adapter, &session, agent.clone(), agent_name, trimmed).await;
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or /exit to quit)");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    rl.save_history(&history_path).ok();
    eprintln!("Goodbye!");
    Ok(())
}

/// Returns `true` if the REPL should exit.
fn handle_slash_command(input: &str, session: &mut Session) -> bool {
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    match parts[0] {
        "/exit" | "/quit" => return true,
        "/reset" => {
            *session = Session::new();
            eprintln!("Session reset.");
        }
        "/status" => {
            eprintln!("Session {} — {} events", session.session_id(), session.event_count());
        }
        "/help" => {
            eprintln!("Commands:");
            eprintln!("  /reset    Start a fresh session");
            eprintln!("  /status   Show the current session id and event count");
            eprintln!("  /exit     Exit the chat");
        }
        other => eprintln!("Unknown command: {other} (type /help for a list)"),
    }
    false
}

/// Scripts the next scripted-adapter turn for this line of input, runs
/// the agent, and prints the streamed output.
async fn send_message(runner: &Runner, adapter: &ScriptedAdapter, session: &Session, agent: Runnable, agent_name: &str, text: &str) {
    session.add_message(text, None);
    adapter.push_steps(agent_name, script_for(text));

    let result = runner.run(agent, session.clone()).await;
    for event in &result.events {
        print_event(event);
    }
    if !matches!(result.outcome, Outcome::Completed { .. }) {
        eprintln!("\x1B[33m[outcome: {:?}]\x1B[0m", result.outcome);
    }
    println!();
}

/// Parses `"calc a + b"` into a `math.add` tool call followed by a text
/// reply; anything else is echoed straight back.
fn script_for(text: &str) -> Vec<ScriptedStep> {
    if let Some(rest) = text.strip_prefix("calc ") {
        if let Some((a, b)) = rest.split_once('+') {
            if let (Ok(a), Ok(b)) = (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
                return vec![
                    ScriptedStep::tool_call("c1", "math.add", serde_json::json!({"a": a, "b": b})),
                    ScriptedStep::text(format!("{a} + {b} = {}", a + b)),
                ];
            }
        }
    }
    vec![
        ScriptedStep::tool_call("c1", "echo", serde_json::json!({"value": text})),
        ScriptedStep::text(format!("you said: {text}")),
    ]
}

fn print_event(event: &Event) {
    match event {
        Event::Assistant { text, .. } => {
            print!("{text}");
            std::io::stdout().flush().ok();
        }
        Event::Thought { text, .. } => {
            eprint!("\x1B[2m{text}\x1B[0m");
        }
        Event::ToolCall { name, .. } => {
            eprintln!("\x1B[2m[tool: {name}]\x1B[0m");
        }
        _ => {}
    }
}
