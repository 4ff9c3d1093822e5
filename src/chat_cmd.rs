//! Terminal chat client and transcript commands.
//!
//! `nexus chat` drives a [`SessionController`] from stdin and renders each
//! reply incrementally as fragments arrive. `nexus history` and
//! `nexus clear` operate on the transcript directly.
//!
//! All three commands use the local SQLite database by default, or a running
//! server's `/api/messages` surface when `--remote` is given. Replies are
//! always requested from the provider by this process, with the API key read
//! from the local environment.

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Config;
use crate::controller::{
    format_failure, Rejection, SessionController, SyncError, TurnOutcome, TurnPhase, TurnResult,
};
use crate::models::{clamp_temperature, AgentConfig, Role};
use crate::provider::GeminiProvider;
use crate::store::{HttpTranscriptStore, SqliteTranscriptStore, TranscriptStore};
use crate::{db, migrate};

/// Overrides for the agent settings taken from the command line.
#[derive(Debug, Default, Clone)]
pub struct AgentOverrides {
    pub name: Option<String>,
    pub model: Option<String>,
    pub system: Option<String>,
    pub temperature: Option<f32>,
}

impl AgentOverrides {
    fn apply(&self, mut agent: AgentConfig) -> AgentConfig {
        if let Some(name) = &self.name {
            agent.name = name.clone();
        }
        if let Some(model) = &self.model {
            agent.model = model.clone();
        }
        if let Some(system) = &self.system {
            agent.system_instruction = system.clone();
        }
        if let Some(temperature) = self.temperature {
            agent.temperature = clamp_temperature(temperature);
        }
        agent
    }
}

async fn open_store(config: &Config, remote: Option<&str>) -> Result<Arc<dyn TranscriptStore>> {
    match remote {
        Some(url) => Ok(Arc::new(HttpTranscriptStore::new(url))),
        None => {
            let pool = db::connect(config).await?;
            migrate::apply(&pool).await?;
            Ok(Arc::new(SqliteTranscriptStore::new(pool)))
        }
    }
}

/// Print the stored transcript, oldest first.
pub async fn run_history(config: &Config, remote: Option<&str>) -> Result<()> {
    let store = open_store(config, remote).await?;
    let turns = store.list_turns().await?;

    if turns.is_empty() {
        println!("No messages.");
        return Ok(());
    }

    let agent_name = &config.agent.name;
    for turn in &turns {
        let speaker = match turn.role {
            Role::User => "you",
            Role::Model => agent_name.as_str(),
        };
        println!("{}> {}", speaker, turn.content);
        println!();
    }
    println!("{} messages", turns.len());
    Ok(())
}

/// Delete every stored turn.
pub async fn run_clear(config: &Config, remote: Option<&str>) -> Result<()> {
    let store = open_store(config, remote).await?;
    store.clear_all().await?;
    println!("Conversation cleared.");
    Ok(())
}

/// Interactive chat loop.
pub async fn run_chat(
    config: &Config,
    remote: Option<&str>,
    overrides: &AgentOverrides,
) -> Result<()> {
    let store = open_store(config, remote).await?;
    let provider = Arc::new(GeminiProvider::new(config.provider.base_url.clone()));
    let agent = overrides.apply(config.agent.to_agent_config());

    let controller = SessionController::new(
        store,
        provider,
        config.provider.credential_source(),
        agent,
    );

    match controller.load().await {
        Ok(0) => {}
        Ok(count) => println!("Loaded {} previous messages. Type /clear to start over.", count),
        Err(err) => eprintln!("warning: could not load history: {}", err),
    }
    println!(
        "Chatting with {} ({}). Type /help for commands.",
        controller.agent().name,
        controller.agent().effective_model()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('/') {
            match parse_command(line) {
                Ok(Command::Quit) => break,
                Ok(command) => run_command(&controller, command).await,
                Err(message) => eprintln!("{}", message),
            }
            continue;
        }

        let outcome = run_turn(&controller, line).await;
        for err in &outcome.storage_errors {
            eprintln!("warning: not saved: {}", err);
        }
    }

    Ok(())
}

/// Submit one message and print the reply as it streams in.
async fn run_turn(controller: &SessionController, input: &str) -> TurnOutcome {
    let reply_index = controller.turns().len() + 1;
    let mut updates = controller.subscribe();
    drop(updates.borrow_and_update());

    print!("{}> ", controller.agent().name);
    let _ = std::io::stdout().flush();

    let submit = controller.submit(input);
    tokio::pin!(submit);

    let mut printed = 0;
    let mut watching = true;
    let outcome = loop {
        tokio::select! {
            outcome = &mut submit => break outcome,
            changed = updates.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.phase == TurnPhase::Streaming {
                    if let Some(turn) = snapshot.turns.get(reply_index) {
                        print_suffix(&turn.content, &mut printed);
                    }
                }
            }
        }
    };

    match &outcome.result {
        TurnResult::Completed { reply } => {
            print_suffix(reply, &mut printed);
            if reply.is_empty() {
                print!("(empty reply)");
            }
            println!();
        }
        TurnResult::Failed { error, partial } => {
            print_suffix(partial, &mut printed);
            if !partial.is_empty() {
                println!();
            }
            println!("{}", format_failure(error));
        }
        TurnResult::Rejected(Rejection::Busy) => println!("(still answering the previous message)"),
        TurnResult::Rejected(Rejection::Empty) => println!(),
    }
    println!();
    outcome
}

fn print_suffix(content: &str, printed: &mut usize) {
    if let Some(rest) = content.get(*printed..) {
        if !rest.is_empty() {
            print!("{}", rest);
            let _ = std::io::stdout().flush();
            *printed = content.len();
        }
    }
}

/// Slash commands understood by the chat loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Clear,
    Agent,
    Model(String),
    Temperature(f32),
    Name(String),
    System(String),
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (line, ""),
    };

    let require = |what: &str| -> Result<String, String> {
        if arg.is_empty() {
            Err(format!("usage: {} <{}>", name, what))
        } else {
            Ok(arg.to_string())
        }
    };

    match name {
        "/clear" => Ok(Command::Clear),
        "/agent" => Ok(Command::Agent),
        "/model" => require("model id").map(Command::Model),
        "/name" => require("name").map(Command::Name),
        "/system" => require("instruction").map(Command::System),
        "/temperature" | "/temp" => {
            let value = require("0.0-1.0")?;
            value
                .parse::<f32>()
                .map(Command::Temperature)
                .map_err(|_| format!("not a number: {}", value))
        }
        "/help" | "/?" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("unknown command {}; type /help", other)),
    }
}

async fn run_command(controller: &SessionController, command: Command) {
    match command {
        Command::Clear => match controller.clear_all().await {
            Ok(()) => println!("Conversation cleared."),
            Err(SyncError::Busy) => println!("A reply is still streaming."),
            Err(err @ SyncError::Storage(_)) => eprintln!("warning: {}", err),
        },
        Command::Agent => print_agent(&controller.agent()),
        Command::Model(model) => {
            controller.update_agent(|agent| agent.model = model);
            println!("Model set to {}.", controller.agent().effective_model());
        }
        Command::Temperature(temperature) => {
            controller.update_agent(|agent| agent.temperature = temperature);
            println!("Temperature set to {}.", controller.agent().temperature);
        }
        Command::Name(name) => {
            controller.update_agent(|agent| agent.name = name);
            println!("Agent renamed to {}.", controller.agent().name);
        }
        Command::System(system) => {
            controller.update_agent(|agent| agent.system_instruction = system);
            println!("System instruction updated.");
        }
        Command::Help => print_help(),
        Command::Quit => {}
    }
}

fn print_agent(agent: &AgentConfig) {
    println!("name:        {}", agent.name);
    println!("model:       {}", agent.effective_model());
    println!("temperature: {}", agent.temperature);
    println!("system:      {}", agent.system_instruction);
}

fn print_help() {
    println!("Commands:");
    println!("  /clear               delete the whole conversation");
    println!("  /agent               show the current agent settings");
    println!("  /model <id>          switch model for the next messages");
    println!("  /temperature <0-1>   set sampling temperature");
    println!("  /name <text>         rename the agent");
    println!("  /system <text>       replace the system instruction");
    println!("  /quit                leave");
}

/// Fails when a `--temperature` flag is outside `[0, 1]`.
pub fn validate_temperature(temperature: Option<f32>) -> Result<()> {
    if let Some(value) = temperature {
        if !(0.0..=1.0).contains(&value) {
            bail!("--temperature must be between 0.0 and 1.0, got {}", value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slash_commands() {
        assert_eq!(parse_command("/clear"), Ok(Command::Clear));
        assert_eq!(
            parse_command("/model gemini-2.5-pro"),
            Ok(Command::Model("gemini-2.5-pro".into()))
        );
        assert_eq!(
            parse_command("/temperature 0.25"),
            Ok(Command::Temperature(0.25))
        );
        assert_eq!(
            parse_command("/system  Answer in French. "),
            Ok(Command::System("Answer in French.".into()))
        );
        assert_eq!(parse_command("/exit"), Ok(Command::Quit));
    }

    #[test]
    fn rejects_bad_commands() {
        assert!(parse_command("/model").unwrap_err().contains("usage"));
        assert!(parse_command("/temperature warm")
            .unwrap_err()
            .contains("not a number"));
        assert!(parse_command("/dance").unwrap_err().contains("unknown"));
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let overrides = AgentOverrides {
            model: Some("gemini-2.5-flash".into()),
            temperature: Some(4.0),
            ..AgentOverrides::default()
        };
        let agent = overrides.apply(AgentConfig::default());
        assert_eq!(agent.model, "gemini-2.5-flash");
        assert_eq!(agent.temperature, 1.0);
        assert_eq!(agent.name, AgentConfig::default().name);
    }

    #[test]
    fn suffix_printing_tracks_position() {
        let mut printed = 0;
        print_suffix("Hel", &mut printed);
        assert_eq!(printed, 3);
        print_suffix("Hello", &mut printed);
        assert_eq!(printed, 5);
        print_suffix("Hello", &mut printed);
        assert_eq!(printed, 5);
    }

    #[test]
    fn temperature_flag_is_range_checked() {
        assert!(validate_temperature(None).is_ok());
        assert!(validate_temperature(Some(0.5)).is_ok());
        assert!(validate_temperature(Some(1.5)).is_err());
    }
}
