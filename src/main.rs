//! Purpose: `srcctl` CLI entry point for the Source configuration item store.
//! Role: Binary crate root; parses args, runs one client call, emits JSON on stdout.
//! Invariants: Every command prints exactly one JSON value on stdout on success.
//! Invariants: Errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{Value, json};
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

use source_client::api::{
    Client, ClientOptions, Error, ErrorKind, Item, ItemList, QueueEnd, RetryPolicy,
    TypeDescriptor, Validate, ValidationIssue, to_exit_code,
};

#[derive(Parser, Debug)]
#[command(name = "srcctl", version, about = "Work with items in a Source configuration store")]
struct Cli {
    /// Base URL of the Source service.
    #[arg(long, env = "SOURCE_HOST", default_value = "http://127.0.0.1:8080")]
    host: String,
    #[arg(long, env = "SOURCE_USER", default_value = "admin")]
    user: String,
    #[arg(long, env = "SOURCE_PWD", default_value = "", hide_env_values = true)]
    pwd: String,
    /// Budget for each call including retries (e.g. 30s, 2m).
    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    timeout: Duration,
    /// Skip TLS certificate verification.
    #[arg(long)]
    insecure: bool,
    /// Retries for transient failures.
    #[arg(long, default_value_t = 20)]
    retries: u32,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register an item type from a JSON example.
    SetType {
        key: String,
        #[arg(long)]
        example_json: String,
    },
    /// Save a JSON value; a `?` in KEY becomes a timestamp sequence.
    Save {
        key: String,
        #[arg(long = "type")]
        item_type: String,
        #[arg(long)]
        data_json: String,
    },
    Load {
        key: String,
    },
    Delete {
        key: String,
    },
    /// Remove and print the oldest or newest item of a type.
    Pop {
        #[arg(value_enum)]
        end: PopEnd,
        item_type: String,
    },
    ByType {
        item_type: String,
    },
    ByTag {
        #[arg(required = true)]
        tags: Vec<String>,
    },
    Children {
        key: String,
    },
    Parents {
        key: String,
    },
    Tag {
        key: String,
        name: String,
        value: Option<String>,
    },
    Untag {
        key: String,
        name: String,
    },
    Link {
        from: String,
        to: String,
    },
    Unlink {
        from: String,
        to: String,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PopEnd {
    Oldest,
    Newest,
}

impl From<PopEnd> for QueueEnd {
    fn from(end: PopEnd) -> Self {
        match end {
            PopEnd::Oldest => QueueEnd::Oldest,
            PopEnd::Newest => QueueEnd::Newest,
        }
    }
}

/// Untyped JSON item; only `null` is rejected.
#[derive(Serialize)]
#[serde(transparent)]
struct JsonItem(Value);

impl Validate for JsonItem {
    fn validate(&self) -> Result<(), ValidationIssue> {
        if self.0.is_null() {
            return Err(ValidationIssue::new("item value must not be null"));
        }
        Ok(())
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(output) => {
            println!("{output}");
            0
        }
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<Value, Error> {
    let options = ClientOptions::default()
        .with_insecure_transport(cli.insecure)
        .with_request_timeout(cli.timeout)
        .with_retry(RetryPolicy {
            max_retries: cli.retries,
            ..RetryPolicy::default()
        });
    let client = Client::new(cli.host, &cli.user, &cli.pwd, Some(options))?;

    match cli.command {
        Command::SetType { key, example_json } => {
            let example = parse_json_arg("--example-json", &example_json)?;
            client.put_type(&TypeDescriptor::from_json_example(&key, &example)?)?;
            Ok(json!({"type": key}))
        }
        Command::Save {
            key,
            item_type,
            data_json,
        } => {
            let data = parse_json_arg("--data-json", &data_json)?;
            let key = client.save(&key, &item_type, JsonItem(data))?;
            Ok(json!({"key": key, "type": item_type}))
        }
        Command::Load { key } => item_json(&client.load_raw(&key)?),
        Command::Delete { key } => {
            client.delete(&key)?;
            Ok(json!({"deleted": key}))
        }
        Command::Pop { end, item_type } => match client.pop_raw(end.into(), &item_type)? {
            Some(item) => item_json(&item),
            None => Ok(Value::Null),
        },
        Command::ByType { item_type } => list_json(&client.load_items_by_type_raw(&item_type)?),
        Command::ByTag { tags } => {
            let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
            list_json(&client.load_items_by_tag_raw(&tags)?)
        }
        Command::Children { key } => list_json(&client.load_children_raw(&key)?),
        Command::Parents { key } => list_json(&client.load_parents_raw(&key)?),
        Command::Tag { key, name, value } => {
            client.tag(&key, &name, value.as_deref())?;
            Ok(json!({"key": key, "tag": name, "value": value}))
        }
        Command::Untag { key, name } => {
            client.untag(&key, &name)?;
            Ok(json!({"key": key, "untagged": name}))
        }
        Command::Link { from, to } => {
            client.link(&from, &to)?;
            Ok(json!({"linked": {"from": from, "to": to}}))
        }
        Command::Unlink { from, to } => {
            client.unlink(&from, &to)?;
            Ok(json!({"unlinked": {"from": from, "to": to}}))
        }
    }
}

fn parse_json_arg(flag: &str, raw: &str) -> Result<Value, Error> {
    serde_json::from_str(raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("{flag} is not valid json"))
            .with_source(err)
    })
}

fn item_json(item: &Item) -> Result<Value, Error> {
    let updated = item.updated().format(&Rfc3339).map_err(|err| {
        Error::new(ErrorKind::Encode)
            .with_message("cannot format item timestamp")
            .with_key(item.key())
            .with_source(err)
    })?;
    let value = item
        .value_json()
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(item.value()).into_owned()));
    Ok(json!({
        "key": item.key(),
        "type": item.item_type(),
        "updated": updated,
        "value": value,
    }))
}

fn list_json(items: &ItemList) -> Result<Value, Error> {
    items
        .iter()
        .map(item_json)
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

fn emit_error(err: &Error) {
    let mut inner = serde_json::Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(err.to_string()));
    if let Some(status) = err.status() {
        inner.insert("status".to_string(), json!(status));
    }
    if let Some(key) = err.key() {
        inner.insert("key".to_string(), json!(key));
    }
    eprintln!("{}", json!({"error": Value::Object(inner)}));
}

fn parse_duration(input: &str) -> Result<Duration, Error> {
    let trimmed = input.trim();
    let split = trimmed.char_indices().find(|(_, ch)| !ch.is_ascii_digit());
    let (num_str, unit) = match split {
        Some((idx, _)) => trimmed.split_at(idx),
        None => ("", ""),
    };
    let invalid = || {
        Error::new(ErrorKind::Usage)
            .with_message("invalid duration; use a number plus ms|s|m|h (e.g. 30s)")
    };
    if num_str.is_empty() || unit.is_empty() {
        return Err(invalid());
    }
    let value: u64 = num_str.parse().map_err(|_| invalid())?;
    let millis = match unit {
        "ms" => value,
        "s" => value.saturating_mul(1_000),
        "m" => value.saturating_mul(60_000),
        "h" => value.saturating_mul(3_600_000),
        _ => return Err(invalid()),
    };
    Ok(Duration::from_millis(millis))
}
