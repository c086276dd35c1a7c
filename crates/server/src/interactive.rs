//! Terminal mode for filing stories without a voice agent in the loop.

use crate::server;
use regex::Regex;
use std::io::Write as _;
use tokio::io::{AsyncBufReadExt as _, BufReader};

const PROMPT_HELP: &str = "Enter commands like: create story with title \
\"Story title\" and description \"Story details\".";

fn command_pattern() -> Regex {
    // Trailing sentence punctuation is tolerated since commands often come
    // from dictation.
    Regex::new(
        r#"^\s*create\s+story\s+with\s+title\s+"(?P<title>.+?)"\s+and\s+description\s+"(?P<description>.+?)"\s*[.!?]?\s*$"#,
    )
    .unwrap()
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    CreateStory { title: String, description: String },
    Quit,
    Empty,
    Unrecognised,
}

fn parse_command(pattern: &Regex, line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
        return Command::Quit;
    }
    match pattern.captures(line) {
        Some(captures) => Command::CreateStory {
            title: captures["title"].to_string(),
            description: captures["description"].to_string(),
        },
        None => Command::Unrecognised,
    }
}

/// Read commands from stdin until EOF or a quit command.
///
/// # Errors
///
/// Returns an error only when reading stdin or writing stdout fails; story
/// creation failures are reported to the user and the loop continues.
pub async fn run() -> anyhow::Result<()> {
    println!("storybridge interactive mode");
    println!("{PROMPT_HELP}");
    println!("Type 'quit' or 'exit' to leave.\n");

    let pattern = command_pattern();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        match parse_command(&pattern, &line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::Unrecognised => {
                println!("Unrecognised command.");
                println!("{PROMPT_HELP}");
            }
            Command::CreateStory { title, description } => {
                match server::create_story(&title, &description).await {
                    Ok(confirmation) => println!("{confirmation}"),
                    Err(e) => println!("Error: {e}"),
                }
            }
        }
    }

    Ok(())
}
