use rustyline::error::ReadlineError;
use rustyline::{history::DefaultHistory, Editor};
use rustyline_derive::{Completer, Helper, Highlighter, Hinter, Validator};

use leasekv::config::ClusterConfig;
use leasekv::error::{Error, Result};
use leasekv::raft::client::KvClient;
use leasekv::raft::message::ClientResponse;

#[tokio::main]
async fn main() -> Result<()> {
    let mut shell = KvShell::new()?;
    shell.run().await
}

/// The interactive leasekv shell.
struct KvShell {
    editor: Editor<ShellHelper, DefaultHistory>,
    client: KvClient,
}

impl KvShell {
    fn new() -> Result<Self> {
        let config_path =
            std::env::args().nth(1).unwrap_or_else(|| "config/cluster.yaml".to_string());
        let config = ClusterConfig::load(&config_path)?;
        Ok(Self { editor: Editor::new()?, client: KvClient::new(&config) })
    }

    /// Runs the REPL until EOF, interrupt, or `!quit`.
    async fn run(&mut self) -> Result<()> {
        self.editor.set_helper(Some(ShellHelper));
        println!("Connected to leasekv. Enter !help for instructions.");

        while let Some(input) = self.prompt()? {
            match self.execute(&input).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => println!("  Error: {}", err),
            }
        }
        Ok(())
    }

    /// Prompts for one line of input.
    fn prompt(&mut self) -> Result<Option<String>> {
        match self.editor.readline("leasekv> ") {
            Ok(input) => {
                self.editor.add_history_entry(&input)?;
                Ok(Some(input.trim().to_string()))
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Executes one input line; returns false when the shell should exit.
    async fn execute(&mut self, input: &str) -> Result<bool> {
        if input.is_empty() {
            return Ok(true);
        }
        if input.starts_with('!') {
            return self.execute_command(input);
        }

        let mut parts = input.split_whitespace();
        let response = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("GET"), Some(key), None, None) => self.client.get(key).await?,
            (Some("SET"), Some(key), Some(value), None) => self.client.set(key, value).await?,
            _ => return Err(Error::Parse("expected GET <key> or SET <key> <value>".to_string())),
        };
        self.print(&response);
        Ok(true)
    }

    /// Prints a reply as its wire code: `1 value`, `1`, `2`, or `0 leader`.
    fn print(&self, response: &ClientResponse) {
        println!("  {}", response);
    }

    /// Handles a REPL command (prefixed by !, e.g. !help).
    fn execute_command(&mut self, input: &str) -> Result<bool> {
        match input {
            "!help" => {
                println!(
                    r#"
Enter a command to run it against the cluster leader:

    GET <key>           Look up a key
    SET <key> <value>   Write a key

The following commands are also available:

    !help               This help message
    !quit               Exit the shell
"#
                );
                Ok(true)
            }
            "!quit" => Ok(false),
            c => Err(Error::Parse(format!("Unknown command {}", c))),
        }
    }
}

/// A rustyline helper; all inputs are single-line commands.
#[derive(Completer, Helper, Highlighter, Hinter, Validator)]
struct ShellHelper;
