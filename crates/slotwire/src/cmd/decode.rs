use serde::Serialize;
use serde_json::Value;
use slotwire_frame::{decode_message, parse_frame, Frame};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_json, print_raw_lines, table, OutputFormat};

#[derive(Debug, Default, Serialize, PartialEq)]
struct DecodedFrame {
    frame_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    /// Decoded message, for single-chunk messages only.
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<Value>,
}

impl DecodedFrame {
    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("type", self.frame_type.to_string())];
        if let Some(len) = self.secret_len {
            fields.push(("secret", format!("<redacted:{len} bytes>")));
        }
        if let Some(kind) = self.kind {
            fields.push(("kind", kind.to_string()));
        }
        if let Some(id) = &self.id {
            fields.push(("id", id.clone()));
        }
        if let Some(index) = self.index {
            fields.push(("index", index.to_string()));
        }
        if let Some(total) = self.total {
            fields.push(("total", total.to_string()));
        }
        if let Some(payload) = &self.payload {
            fields.push(("payload", payload.clone()));
        }
        if let Some(message) = &self.message {
            fields.push(("message", message.to_string()));
        }
        fields
    }
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let decoded = decode(&args.frame)?;

    match format {
        OutputFormat::Json => print_json(&decoded),
        OutputFormat::Table => {
            let mut out = table(&["FIELD", "VALUE"]);
            for (name, value) in decoded.fields() {
                out.add_row(vec![name.to_string(), value]);
            }
            println!("{out}");
        }
        OutputFormat::Pretty => {
            let line: Vec<String> = decoded
                .fields()
                .into_iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            println!("{}", line.join(" "));
        }
        OutputFormat::Raw => {
            let body = match (&decoded.message, &decoded.payload) {
                (Some(message), _) => message.to_string(),
                (None, Some(payload)) => payload.clone(),
                (None, None) => decoded.frame_type.to_string(),
            };
            print_raw_lines([body]);
        }
    }
    Ok(SUCCESS)
}

fn decode(text: &str) -> CliResult<DecodedFrame> {
    let frame = parse_frame(text.trim()).map_err(|err| frame_error("invalid frame", err))?;
    let secret_len = frame.secret().map(str::len);

    Ok(match frame {
        Frame::Init { .. } => DecodedFrame {
            frame_type: "INIT",
            secret_len,
            ..DecodedFrame::default()
        },
        Frame::InitAck { .. } => DecodedFrame {
            frame_type: "ACK-INIT",
            secret_len,
            ..DecodedFrame::default()
        },
        Frame::Ack(ack) => DecodedFrame {
            frame_type: "ACK",
            secret_len,
            id: Some(ack.id),
            index: Some(ack.index),
            ..DecodedFrame::default()
        },
        Frame::Chunk(chunk) => {
            let message = if chunk.total == 1 {
                let message = decode_message([chunk.payload.as_str()])
                    .map_err(|err| frame_error("invalid payload", err))?;
                Some(message)
            } else {
                None
            };
            DecodedFrame {
                frame_type: "MSG",
                secret_len,
                kind: Some(chunk.kind.tag()),
                id: Some(chunk.id),
                index: Some(chunk.index),
                total: Some(chunk.total),
                payload: Some(chunk.payload),
                message,
            }
        }
    })
}
