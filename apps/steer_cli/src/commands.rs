//! Line commands typed at the steering prompt.

use shared::domain::ParameterEdit;

pub const HELP: &str = "\
commands:
  start              open a session
  stop               end the current session
  prompt <text>      change the prompt
  seed <n>           change the seed
  guidance <x>       change the guidance scale (clamped to 1..30)
  snapshot           save the current frame
  status             show session state and parameters
  help               show this list
  quit               stop any session and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Edit(ParameterEdit),
    Snapshot,
    Status,
    Help,
    Quit,
}

impl Command {
    /// Parses one input line. `Ok(None)` for blank lines.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "snapshot" | "snap" => Self::Snapshot,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            // An empty prompt is a legitimate edit.
            "prompt" => Self::Edit(ParameterEdit::Prompt(rest.to_string())),
            "seed" => {
                let seed = rest
                    .parse()
                    .map_err(|_| format!("seed must be a non-negative integer, got '{rest}'"))?;
                Self::Edit(ParameterEdit::Seed(seed))
            }
            "guidance" | "guidance_scale" => {
                let value: f64 = rest
                    .parse()
                    .map_err(|_| format!("guidance must be a number, got '{rest}'"))?;
                Self::Edit(ParameterEdit::GuidanceScale(value))
            }
            other => return Err(format!("unknown command '{other}', type 'help'")),
        };
        Ok(Some(command))
    }
}
