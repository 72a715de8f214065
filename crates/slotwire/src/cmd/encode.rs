use serde::Serialize;
use slotwire_frame::{fragment, Frame, FrameConfig, MessageKind};

use crate::cmd::{check_slot_size, parse_json, EncodeArgs};
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{preview, print_json, print_raw_lines, table, OutputFormat};

#[derive(Serialize)]
struct EncodeOutput<'a> {
    id: &'a str,
    kind: &'static str,
    total: usize,
    frames: &'a [String],
}

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let message = parse_json(&args.json, "message")?;
    check_slot_size(args.max_slot_bytes)?;

    let kind = MessageKind::from(args.kind);
    let config = FrameConfig {
        max_slot_bytes: args.max_slot_bytes,
        ..FrameConfig::default()
    };
    let frames = encode(kind, &args.id, args.secret.as_deref(), &message, &config)?;

    match format {
        OutputFormat::Json => print_json(&EncodeOutput {
            id: &args.id,
            kind: kind.tag(),
            total: frames.len(),
            frames: &frames,
        }),
        OutputFormat::Table => {
            let mut out = table(&["INDEX", "BYTES", "FRAME"]);
            for (index, frame) in frames.iter().enumerate() {
                out.add_row(vec![
                    format!("{index}/{}", frames.len()),
                    frame.len().to_string(),
                    preview(frame, 80),
                ]);
            }
            println!("{out}");
        }
        OutputFormat::Pretty => {
            println!("{} {} in {} frame(s)", kind, args.id, frames.len());
            for frame in &frames {
                println!("  {frame}");
            }
        }
        OutputFormat::Raw => print_raw_lines(&frames),
    }
    Ok(SUCCESS)
}

fn encode(
    kind: MessageKind,
    id: &str,
    secret: Option<&str>,
    message: &serde_json::Value,
    config: &FrameConfig,
) -> CliResult<Vec<String>> {
    let chunks =
        fragment(kind, id, secret, message, config).map_err(|err| frame_error("encode failed", err))?;
    Ok(chunks
        .into_iter()
        .map(|chunk| Frame::Chunk(chunk).encode())
        .collect())
}
