use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use serde_json::Value;
use slotwire_frame::{MessageKind, DEFAULT_MAX_SLOT_BYTES, MIN_FRAME_OVERHEAD};

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod decode;
pub mod demo;
pub mod encode;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a request/response exchange between two in-process endpoints.
    Demo(DemoArgs),
    /// Print the frames a JSON message is split into.
    Encode(EncodeArgs),
    /// Parse one frame and print its fields.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Demo(args) => demo::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// JSON request to send.
    #[arg(long, default_value = r#"{"op":"ping"}"#)]
    pub json: String,
    /// Hard ceiling for one slot value, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_SLOT_BYTES)]
    pub max_slot_bytes: usize,
    /// Negotiate a session secret before sending.
    #[arg(long)]
    pub handshake: bool,
    /// Request timeout (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
    /// Also print every frame written to each slot.
    #[arg(long)]
    pub trace: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Req,
    Res,
}

impl From<KindArg> for MessageKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Req => MessageKind::Request,
            KindArg::Res => MessageKind::Response,
        }
    }
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// JSON message to encode.
    pub json: String,
    /// Message id placed in every frame.
    #[arg(long, default_value = "req-1")]
    pub id: String,
    /// Message kind.
    #[arg(long, value_enum, default_value = "req")]
    pub kind: KindArg,
    /// Session secret to embed.
    #[arg(long, env = "SLOTWIRE_SECRET", hide_env_values = true)]
    pub secret: Option<String>,
    /// Hard ceiling for one slot value, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_SLOT_BYTES)]
    pub max_slot_bytes: usize,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Frame text, e.g. `MSG:REQ:req-1:0/1:e30`.
    pub frame: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_json(input: &str, flag: &str) -> CliResult<Value> {
    serde_json::from_str(input)
        .map_err(|err| CliError::usage(format!("{flag} is not valid JSON: {err}")))
}

pub(crate) fn check_slot_size(max_slot_bytes: usize) -> CliResult<()> {
    if max_slot_bytes <= MIN_FRAME_OVERHEAD {
        return Err(CliError::usage(format!(
            "--max-slot-bytes must be greater than {MIN_FRAME_OVERHEAD}"
        )));
    }
    Ok(())
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
