use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use slotwire_peer::{
    HandshakeConfig, MultiplexerBuilder, PeerConfig, RequestContext, SequentialIds,
};
use slotwire_transport::MemorySlot;

use crate::cmd::{check_slot_size, parse_duration, parse_json, DemoArgs};
use crate::exit::{peer_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{preview, print_json, print_raw_lines, table, OutputFormat};

const CLIENT_TO_SERVER: &str = "client->server";
const SERVER_TO_CLIENT: &str = "server->client";

struct Report {
    response: Value,
    elapsed: Duration,
    client_frames: Vec<String>,
    server_frames: Vec<String>,
}

impl Report {
    fn chunks(frames: &[String]) -> usize {
        frames.iter().filter(|f| f.contains(":REQ:") || f.contains(":RES:")).count()
    }

    fn frames(&self) -> impl Iterator<Item = FrameRecord<'_>> {
        tagged(CLIENT_TO_SERVER, &self.client_frames)
            .chain(tagged(SERVER_TO_CLIENT, &self.server_frames))
    }
}

fn tagged<'a>(
    slot: &'static str,
    frames: &'a [String],
) -> impl Iterator<Item = FrameRecord<'a>> + 'a {
    frames.iter().enumerate().map(move |(seq, frame)| FrameRecord {
        slot,
        seq,
        frame: frame.as_str(),
    })
}

#[derive(Serialize)]
struct FrameRecord<'a> {
    slot: &'static str,
    seq: usize,
    frame: &'a str,
}

#[derive(Serialize)]
struct DemoOutput<'a> {
    response: &'a Value,
    elapsed_ms: u128,
    request_chunks: usize,
    response_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    frames: Option<Vec<FrameRecord<'a>>>,
}

pub fn run(args: DemoArgs, format: OutputFormat) -> CliResult<i32> {
    let message = parse_json(&args.json, "--json")?;
    let timeout = parse_duration(&args.timeout)?;
    check_slot_size(args.max_slot_bytes)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start runtime: {err}")))?;
    let report = runtime.block_on(exchange(&args, message, timeout))?;

    print_report(&report, args.trace, format);
    Ok(SUCCESS)
}

async fn exchange(args: &DemoArgs, message: Value, timeout: Duration) -> CliResult<Report> {
    let to_server = MemorySlot::new(args.max_slot_bytes);
    let to_client = MemorySlot::new(args.max_slot_bytes);

    let (client_handshake, server_handshake) = if args.handshake {
        (HandshakeConfig::initiator(), HandshakeConfig::responder())
    } else {
        (HandshakeConfig::default(), HandshakeConfig::default())
    };
    let base = PeerConfig::default()
        .with_request_timeout(timeout)
        .with_max_slot_bytes(args.max_slot_bytes);

    let server = MultiplexerBuilder::new(base.clone().with_handshake(server_handshake))
        .on_message(|msg: Value, ctx: RequestContext| async move {
            tracing::info!(id = ctx.request_id(), "echoing request");
            Some(msg)
        })
        .connect(to_client.link_with(&to_server))
        .await
        .map_err(|err| peer_error("server setup failed", err))?;
    let client = MultiplexerBuilder::new(base.with_handshake(client_handshake))
        .id_generator(SequentialIds::new("req"))
        .connect(to_server.link_with(&to_client))
        .await
        .map_err(|err| peer_error("client setup failed", err))?;

    let started = Instant::now();
    let response = client
        .send(message)
        .await
        .map_err(|err| peer_error("request failed", err))?;
    let elapsed = started.elapsed();

    for (side, closed) in [("client", client.close().await), ("server", server.close().await)] {
        if let Err(err) = closed {
            tracing::debug!(side, error = %err, "endpoint shutdown failed");
        }
    }

    Ok(Report {
        response,
        elapsed,
        client_frames: to_server.history(),
        server_frames: to_client.history(),
    })
}

fn print_report(report: &Report, trace: bool, format: OutputFormat) {
    let request_chunks = Report::chunks(&report.client_frames);
    let response_chunks = Report::chunks(&report.server_frames);

    match format {
        OutputFormat::Json => print_json(&DemoOutput {
            response: &report.response,
            elapsed_ms: report.elapsed.as_millis(),
            request_chunks,
            response_chunks,
            frames: trace.then(|| report.frames().collect()),
        }),
        OutputFormat::Table => {
            let mut summary = table(&["RESPONSE", "REQUEST CHUNKS", "RESPONSE CHUNKS", "ELAPSED"]);
            summary.add_row(vec![
                preview(&report.response.to_string(), 60),
                request_chunks.to_string(),
                response_chunks.to_string(),
                format!("{}ms", report.elapsed.as_millis()),
            ]);
            println!("{summary}");

            if trace {
                let mut frames = table(&["SLOT", "SEQ", "FRAME"]);
                for record in report.frames() {
                    frames.add_row(vec![
                        record.slot.to_string(),
                        record.seq.to_string(),
                        preview(record.frame, 60),
                    ]);
                }
                println!("{frames}");
            }
        }
        OutputFormat::Pretty => {
            println!(
                "response={} request_chunks={} response_chunks={} elapsed={}ms",
                report.response,
                request_chunks,
                response_chunks,
                report.elapsed.as_millis()
            );
            if trace {
                for record in report.frames() {
                    println!("  {} #{} {}", record.slot, record.seq, record.frame);
                }
            }
        }
        OutputFormat::Raw => {
            let mut lines = vec![report.response.to_string()];
            if trace {
                lines.extend(report.frames().map(|record| record.frame.to_string()));
            }
            print_raw_lines(lines);
        }
    }
}
