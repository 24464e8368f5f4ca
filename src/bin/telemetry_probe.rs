//! Telemetry probe: connects to a running server and prints one line per
//! received pose message.
//!
//! Usage: `telemetry_probe [ws://127.0.0.1:8765] [count]`

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;

use posecast::protocol::{decode_message, PoseTelemetry, Segment, ServerMessage};

const DEFAULT_URL: &str = "ws://127.0.0.1:8765";

fn summary(t: &PoseTelemetry) -> String {
    let hip = t.segment(Segment::Hip).map(|s| s.angle).unwrap_or(f64::NAN);
    let head = t.segment(Segment::Head).map(|s| s.angle).unwrap_or(f64::NAN);
    format!(
        "t={:.3} color={} root=({:.3},{:.3}) hip={:.1} head={:.1} joints={}",
        t.timestamp,
        t.detected_color.as_deref().unwrap_or("-"),
        t.root_position.x,
        t.root_position.y,
        hip,
        head,
        t.joint_positions.len(),
    )
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| DEFAULT_URL.to_string());
    let limit: Option<usize> = args.next().map(|s| s.parse()).transpose().context("invalid count")?;

    let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    eprintln!("Connected: {}", url);

    let (_, mut reader) = ws.split();
    let mut received = 0usize;
    while let Some(msg) = reader.next().await {
        match msg.context("read failed")? {
            Message::Text(text) => match decode_message(text.as_str()) {
                Ok(ServerMessage::Pose(t)) => {
                    println!("{}", summary(&t));
                    received += 1;
                }
                Err(e) => eprintln!("decode error: {:#}", e),
            },
            Message::Close(_) => break,
            _ => {}
        }
        if limit.is_some_and(|n| received >= n) {
            break;
        }
    }
    eprintln!("Received {} messages", received);
    Ok(())
}
