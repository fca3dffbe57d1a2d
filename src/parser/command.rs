use std::time::Duration;

use super::resp::parse_buffer;
use super::resp::ParseError;
use super::resp::Token;

/// One dispatchable command, already validated for arity and keyword shape.
/// `Invalid` carries an already-formatted `-ERR` message body for commands
/// that framed correctly as RESP but failed arity/keyword checks — these are
/// argument errors (spec-level "reply `-ERR`, do not close"), as opposed to
/// `ParseError` from the RESP layer which are protocol errors (close the
/// connection).
#[derive(Debug, PartialEq)]
pub enum Command {
    Ping,
    Echo(Vec<u8>),
    Get(Vec<u8>),
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
        expiry: Option<Duration>,
    },
    ConfigGet(Vec<u8>),
    Keys(Vec<u8>),
    Info(Option<Vec<u8>>),
    ReplConf {
        name: Vec<u8>,
        value: Vec<u8>,
    },
    Psync {
        replid: Vec<u8>,
        offset: Vec<u8>,
    },
    Unknown(Vec<u8>),
    Invalid(String),
}

pub struct CommandResult {
    pub command: Command,
    pub len: usize,
}

fn bulk_arg<'a>(tokens: &mut std::slice::Iter<'a, Token>) -> Option<&'a Vec<u8>> {
    tokens.next().and_then(|t| t.get_bulk_string_data().ok())
}

fn arity_error(name: &str) -> Command {
    Command::Invalid(format!("few arguments provided for {} command", name.to_uppercase()))
}

fn compile_set(tokens: &mut std::slice::Iter<Token>) -> Command {
    let (Some(key), Some(value)) = (bulk_arg(tokens), bulk_arg(tokens)) else {
        return arity_error("SET");
    };
    let (key, value) = (key.clone(), value.clone());

    let Some(modifier) = bulk_arg(tokens) else {
        return Command::Set {
            key,
            value,
            expiry: None,
        };
    };
    let Ok(modifier) = std::str::from_utf8(modifier) else {
        return Command::Invalid("invalid SET option".to_string());
    };
    if !modifier.eq_ignore_ascii_case("px") {
        return Command::Invalid(format!("unsupported SET option {modifier}"));
    }
    let Some(millis) = bulk_arg(tokens) else {
        return arity_error("SET");
    };
    let Ok(millis) = std::str::from_utf8(millis).unwrap_or_default().parse::<u64>() else {
        return Command::Invalid("PX value must be an integer".to_string());
    };
    Command::Set {
        key,
        value,
        expiry: Some(Duration::from_millis(millis)),
    }
}

fn compile_replconf(tokens: &mut std::slice::Iter<Token>) -> Command {
    let (Some(name), Some(value)) = (bulk_arg(tokens), bulk_arg(tokens)) else {
        return arity_error("REPLCONF");
    };
    Command::ReplConf {
        name: name.clone(),
        value: value.clone(),
    }
}

fn compile_psync(tokens: &mut std::slice::Iter<Token>) -> Command {
    let (Some(replid), Some(offset)) = (bulk_arg(tokens), bulk_arg(tokens)) else {
        return arity_error("PSYNC");
    };
    Command::Psync {
        replid: replid.clone(),
        offset: offset.clone(),
    }
}

fn compile_and_get_command(tokens: &[Token]) -> super::resp::Result<Command> {
    let mut tokens = tokens.iter();
    let command = match tokens.next() {
        Some(Token::BulkString(command)) => {
            let command = std::str::from_utf8(command)
                .map_err(|e| ParseError::Invalid(e.to_string()))?
                .to_string();
            match command.to_lowercase().as_ref() {
                "ping" => Command::Ping,
                "echo" => match bulk_arg(&mut tokens) {
                    Some(data) => Command::Echo(data.clone()),
                    None => arity_error("ECHO"),
                },
                "get" => match bulk_arg(&mut tokens) {
                    Some(key) => Command::Get(key.clone()),
                    None => arity_error("GET"),
                },
                "set" => compile_set(&mut tokens),
                "config" => match bulk_arg(&mut tokens) {
                    Some(sub) if sub.eq_ignore_ascii_case(b"get") => match bulk_arg(&mut tokens) {
                        Some(name) => Command::ConfigGet(name.clone()),
                        None => arity_error("CONFIG GET"),
                    },
                    Some(sub) => Command::Invalid(format!(
                        "unsupported CONFIG subcommand {}",
                        String::from_utf8_lossy(sub)
                    )),
                    None => arity_error("CONFIG"),
                },
                "keys" => match bulk_arg(&mut tokens) {
                    Some(pattern) => Command::Keys(pattern.clone()),
                    None => arity_error("KEYS"),
                },
                "info" => Command::Info(bulk_arg(&mut tokens).cloned()),
                "replconf" => compile_replconf(&mut tokens),
                "psync" => compile_psync(&mut tokens),
                _ => Command::Unknown(command.into_bytes()),
            }
        }
        Some(_) => {
            return Err(ParseError::Invalid(
                "command frame must be an array of bulk strings".to_string(),
            ))
        }
        None => return Err(ParseError::Invalid("empty command frame".to_string())),
    };
    Ok(command)
}

pub fn parse_message(message: &[u8]) -> super::resp::Result<CommandResult> {
    let result = parse_buffer(message)?;
    let command = compile_and_get_command(result.tokens.as_slice())?;
    Ok(CommandResult {
        command,
        len: result.len,
    })
}
