//! Command Handlers
//!
//! One function per command. Every handler receives the whole request (the
//! command name first, then its arguments) and returns `None` when the
//! request is not its command, so a caller can try handlers in turn. When the
//! name matches, the handler always produces a reply; argument, type and
//! persistence failures become `Message::Error` replies and never escape.
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `ECHO message`
//! - `GET key`
//! - `SET key value [NX|XX] [GET] [EX s|PX ms|EXAT unix-s|PXAT unix-ms|KEEPTTL]`
//! - `INCR key`, `DECR key`
//! - `EXISTS key [key ...]`, `DEL key [key ...]`
//! - `LPUSH key value [value ...]`, `RPUSH key value [value ...]`
//! - `LRANGE key start stop`, `LLEN key`
//! - `SAVE`

use crate::protocol::Message;
use crate::storage::{ExpiryPolicy, Item, ItemError, SetCondition, SetOptions, Store};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, warn};

/// A command handler. Returns `None` when `commands` is not its command.
pub type Handler = fn(&Store, &[String]) -> Option<Message>;

/// Every command with its handler, keyed by lower-case name.
pub const COMMANDS: &[(&str, Handler)] = &[
    ("ping", ping),
    ("echo", echo),
    ("get", get),
    ("set", set),
    ("incr", incr),
    ("decr", decr),
    ("exists", exists),
    ("del", del),
    ("lpush", lpush),
    ("rpush", rpush),
    ("lrange", lrange),
    ("llen", llen),
    ("save", save),
];

// ============================================================================
// Replies
// ============================================================================

fn wrong_arg_count() -> Message {
    Message::error("ERR wrong number of arguments for command")
}

pub(crate) fn internal_error() -> Message {
    Message::error("ERR internal server error (check server logs)")
}

fn syntax_error() -> Message {
    Message::error("ERR syntax error")
}

fn not_an_integer() -> Message {
    Message::error(ItemError::NotAnInteger.to_string())
}

fn item_error(key: &str, err: ItemError) -> Message {
    warn!(key, error = %err, "Command rejected by item");
    Message::error(err.to_string())
}

/// Case-insensitive check that `commands` begins with `prefix`.
fn commands_start_with(commands: &[String], prefix: &[&str]) -> bool {
    commands.len() >= prefix.len()
        && prefix
            .iter()
            .zip(commands)
            .all(|(want, got)| got.eq_ignore_ascii_case(want))
}

fn parse_integer(arg: &str) -> Option<i64> {
    arg.parse().ok()
}

// ============================================================================
// Connection Commands
// ============================================================================

/// PING [message]
pub fn ping(_store: &Store, commands: &[String]) -> Option<Message> {
    if !commands_start_with(commands, &["PING"]) {
        return None;
    }

    Some(match commands {
        [_] => Message::pong(),
        [_, message] => Message::bulk_string(message.clone()),
        _ => wrong_arg_count(),
    })
}

/// ECHO message
pub fn echo(_store: &Store, commands: &[String]) -> Option<Message> {
    if !commands_start_with(commands, &["ECHO"]) {
        return None;
    }

    Some(match commands {
        [_, message] => Message::bulk_string(message.clone()),
        _ => wrong_arg_count(),
    })
}

// ============================================================================
// String Commands
// ============================================================================

/// GET key
pub fn get(store: &Store, commands: &[String]) -> Option<Message> {
    if !commands_start_with(commands, &["GET"]) {
        return None;
    }

    let [_, key] = commands else {
        return Some(wrong_arg_count());
    };

    Some(match store.get(key) {
        None => Message::null(),
        Some(item) => match item.get() {
            Ok(value) => Message::bulk_string(value),
            Err(err) => item_error(key, err),
        },
    })
}

/// Reads the numeric argument that follows an expiry flag.
fn expiry_argument(arg: Option<&String>) -> Result<u64, Message> {
    let arg = arg.ok_or_else(syntax_error)?;
    let value = parse_integer(arg).ok_or_else(not_an_integer)?;
    u64::try_from(value)
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| Message::error("ERR invalid expire time in 'set' command"))
}

fn expiry_instant(base: SystemTime, offset: Duration) -> Result<SystemTime, Message> {
    base.checked_add(offset)
        .ok_or_else(|| Message::error("ERR invalid expire time in 'set' command"))
}

/// Parses the flags after `SET key value`.
///
/// Flags may come in any order and are case-insensitive. NX and XX exclude
/// each other, and at most one of EX, PX, EXAT, PXAT and KEEPTTL may appear.
fn parse_set_options(flags: &[String], now: SystemTime) -> Result<SetOptions, Message> {
    let mut options = SetOptions::default();
    let mut condition_seen = false;
    let mut expiry_seen = false;

    let mut iter = flags.iter();
    while let Some(flag) = iter.next() {
        let flag = flag.to_ascii_uppercase();

        let condition = match flag.as_str() {
            "NX" => Some(SetCondition::IfAbsent),
            "XX" => Some(SetCondition::IfPresent),
            _ => None,
        };
        if let Some(condition) = condition {
            if condition_seen {
                return Err(syntax_error());
            }
            condition_seen = true;
            options.condition = condition;
            continue;
        }

        if flag == "GET" {
            options.return_previous = true;
            continue;
        }

        let expiry = match flag.as_str() {
            "EX" => {
                let secs = expiry_argument(iter.next())?;
                ExpiryPolicy::At(expiry_instant(now, Duration::from_secs(secs))?)
            }
            "PX" => {
                let ms = expiry_argument(iter.next())?;
                ExpiryPolicy::At(expiry_instant(now, Duration::from_millis(ms))?)
            }
            "EXAT" => {
                let secs = expiry_argument(iter.next())?;
                ExpiryPolicy::At(expiry_instant(UNIX_EPOCH, Duration::from_secs(secs))?)
            }
            "PXAT" => {
                let ms = expiry_argument(iter.next())?;
                ExpiryPolicy::At(expiry_instant(UNIX_EPOCH, Duration::from_millis(ms))?)
            }
            "KEEPTTL" => ExpiryPolicy::Keep,
            _ => return Err(syntax_error()),
        };
        if expiry_seen {
            return Err(syntax_error());
        }
        expiry_seen = true;
        options.expiry = expiry;
    }

    Ok(options)
}

/// SET key value [NX|XX] [GET] [EX seconds|PX milliseconds|EXAT unix-time-seconds|PXAT unix-time-milliseconds|KEEPTTL]
pub fn set(store: &Store, commands: &[String]) -> Option<Message> {
    if !commands_start_with(commands, &["SET"]) {
        return None;
    }

    let [_, key, value, flags @ ..] = commands else {
        return Some(wrong_arg_count());
    };

    let options = match parse_set_options(flags, SystemTime::now()) {
        Ok(options) => options,
        Err(reply) => return Some(reply),
    };

    let item = Item::string(value.as_str());
    let outcome = match store.set_with_options(key.as_str(), item, options) {
        Ok(outcome) => outcome,
        Err(err) => return Some(item_error(key, err)),
    };

    Some(if !outcome.applied {
        Message::null()
    } else if options.return_previous {
        outcome
            .previous
            .map_or_else(Message::null, Message::bulk_string)
    } else {
        Message::ok()
    })
}

fn step(store: &Store, commands: &[String], name: &str, up: bool) -> Option<Message> {
    if !commands_start_with(commands, &[name]) {
        return None;
    }

    let [_, key] = commands else {
        return Some(wrong_arg_count());
    };

    let item = store.get_or_insert_with(key, || Item::string("0"));
    let result = if up { item.incr() } else { item.decr() };

    Some(match result {
        Ok(n) => Message::integer(n),
        Err(err) => item_error(key, err),
    })
}

/// INCR key
pub fn incr(store: &Store, commands: &[String]) -> Option<Message> {
    step(store, commands, "INCR", true)
}

/// DECR key
pub fn decr(store: &Store, commands: &[String]) -> Option<Message> {
    step(store, commands, "DECR", false)
}

// ============================================================================
// Key Commands
// ============================================================================

/// EXISTS key [key ...]
///
/// Repeated keys are counted once per mention.
pub fn exists(store: &Store, commands: &[String]) -> Option<Message> {
    if !commands_start_with(commands, &["EXISTS"]) {
        return None;
    }

    let keys = &commands[1..];
    if keys.is_empty() {
        return Some(wrong_arg_count());
    }

    let count = keys.iter().filter(|key| store.exists(key)).count();
    Some(Message::integer(count as i64))
}

/// DEL key [key ...]
pub fn del(store: &Store, commands: &[String]) -> Option<Message> {
    if !commands_start_with(commands, &["DEL"]) {
        return None;
    }

    if commands.len() < 2 {
        return Some(wrong_arg_count());
    }

    let deleted = store.delete_many(commands[1..].iter().map(String::as_str));
    Some(Message::integer(deleted as i64))
}

// ============================================================================
// List Commands
// ============================================================================

fn push(store: &Store, commands: &[String], name: &str, front: bool) -> Option<Message> {
    if !commands_start_with(commands, &[name]) {
        return None;
    }

    let [_, key, values @ ..] = commands else {
        return Some(wrong_arg_count());
    };
    if values.is_empty() {
        return Some(wrong_arg_count());
    }

    let item = store.get_or_insert_with(key, Item::list);
    let result = if front {
        item.lpush(values)
    } else {
        item.rpush(values)
    };

    Some(match result {
        Ok(len) => Message::integer(len as i64),
        Err(err) => item_error(key, err),
    })
}

/// LPUSH key value [value ...]
pub fn lpush(store: &Store, commands: &[String]) -> Option<Message> {
    push(store, commands, "LPUSH", true)
}

/// RPUSH key value [value ...]
pub fn rpush(store: &Store, commands: &[String]) -> Option<Message> {
    push(store, commands, "RPUSH", false)
}

/// LRANGE key start stop
pub fn lrange(store: &Store, commands: &[String]) -> Option<Message> {
    if !commands_start_with(commands, &["LRANGE"]) {
        return None;
    }

    let [_, key, start, stop] = commands else {
        return Some(wrong_arg_count());
    };

    let (Some(start), Some(stop)) = (parse_integer(start), parse_integer(stop)) else {
        return Some(not_an_integer());
    };

    let Some(item) = store.get(key) else {
        return Some(Message::array(Vec::new()));
    };

    Some(match item.lrange(start, stop) {
        Ok(values) => Message::bulk_array(values),
        Err(err) => item_error(key, err),
    })
}

/// LLEN key
pub fn llen(store: &Store, commands: &[String]) -> Option<Message> {
    if !commands_start_with(commands, &["LLEN"]) {
        return None;
    }

    let [_, key] = commands else {
        return Some(wrong_arg_count());
    };

    let Some(item) = store.get(key) else {
        return Some(Message::integer(0));
    };

    Some(match item.llen() {
        Ok(len) => Message::integer(len as i64),
        Err(err) => item_error(key, err),
    })
}

// ============================================================================
// Server Commands
// ============================================================================

/// SAVE
pub fn save(store: &Store, commands: &[String]) -> Option<Message> {
    if !commands_start_with(commands, &["SAVE"]) {
        return None;
    }

    if commands.len() != 1 {
        return Some(wrong_arg_count());
    }

    Some(match store.save_to_disk() {
        Ok(()) => Message::ok(),
        Err(err) => {
            error!(error = %err, "SAVE failed");
            Message::error(format!("ERR {err}"))
        }
    })
}
