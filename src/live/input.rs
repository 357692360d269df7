//! Line commands typed into a live chat session

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Reply(String),
    CancelReply,
    File(PathBuf),
    Delete { id: String, everyone: bool },
    Room(String),
    Rooms,
    Retry,
    Read,
    Media,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  <text>               send a message (start with // to send a literal /)
  /reply <id>          reply to a message, next line is the reply
  /cancel              drop the pending reply
  /file <path>         upload and send a file (max 10MB)
  /delete <id> [all]   delete for you, or for everyone with 'all'
  /room <id>           switch room
  /rooms               list rooms
  /retry               reload history after a failure
  /read                mark the room read
  /media               list shared files
  /help                this text
  /quit                leave";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(literal) = line.strip_prefix("//") {
        return Ok(Some(Command::Say(format!("/{}", literal))));
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or("");
    let arg = |words: &mut std::str::SplitWhitespace<'_>, what: &str| {
        words
            .next()
            .map(String::from)
            .ok_or_else(|| format!("/{} needs {}", name, what))
    };

    let cmd = match name {
        "reply" | "r" => Command::Reply(arg(&mut words, "a message id")?),
        "cancel" => Command::CancelReply,
        "file" | "f" => {
            // Paths may contain spaces.
            let path = rest.trim_start()[name.len()..].trim();
            if path.is_empty() {
                return Err("/file needs a path".to_string());
            }
            Command::File(PathBuf::from(path))
        }
        "delete" | "del" => {
            let id = arg(&mut words, "a message id")?;
            let everyone = matches!(words.next(), Some("all") | Some("everyone"));
            Command::Delete { id, everyone }
        }
        "room" => Command::Room(arg(&mut words, "a room id")?),
        "rooms" => Command::Rooms,
        "retry" => Command::Retry,
        "read" => Command::Read,
        "media" => Command::Media,
        "help" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command /{} (try /help)", other)),
    };
    Ok(Some(cmd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        assert_eq!(parse("  hello there "), Ok(Some(Command::Say("hello there".into()))));
        assert_eq!(parse("   "), Ok(None));
        assert_eq!(parse("//shrug"), Ok(Some(Command::Say("/shrug".into()))));
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse("/reply m1"), Ok(Some(Command::Reply("m1".into()))));
        assert_eq!(parse("/q"), Ok(Some(Command::Quit)));
        assert_eq!(
            parse("/delete m2 all"),
            Ok(Some(Command::Delete {
                id: "m2".into(),
                everyone: true
            }))
        );
        assert_eq!(
            parse("/del m2"),
            Ok(Some(Command::Delete {
                id: "m2".into(),
                everyone: false
            }))
        );
        assert_eq!(
            parse("/file /tmp/my photo.png"),
            Ok(Some(Command::File(PathBuf::from("/tmp/my photo.png"))))
        );
    }

    #[test]
    fn test_space_after_slash() {
        assert_eq!(parse("/ file a b"), Ok(Some(Command::File(PathBuf::from("a b")))));
        assert_eq!(parse("/  f  x.png"), Ok(Some(Command::File(PathBuf::from("x.png")))));
        assert_eq!(parse("/ reply m1"), Ok(Some(Command::Reply("m1".into()))));
    }

    #[test]
    fn test_errors() {
        assert!(parse("/reply").unwrap_err().contains("message id"));
        assert!(parse("/file").is_err());
        assert!(parse("/bogus").unwrap_err().contains("Unknown command"));
    }
}
