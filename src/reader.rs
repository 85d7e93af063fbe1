//! Simulated tag reader.
//!
//! Each non-empty stdin line is one tag presentation. Lines of
//! whitespace- or colon-separated hex bytes (`04 A1 B2 C3`, `04:a1:b2:c3`) are
//! treated as a raw UID and formatted the way the hardware reader reports it;
//! anything else is used verbatim as the tag identifier.

use gatecore::protocol::access::tag_id_from_uid;
use log::{debug, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const READING_CHANNEL_CAPACITY: usize = 16;

/// Normalises one input line into a tag identifier.
pub fn parse_reading(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let parts: Vec<&str> = line
        .split(|c: char| c.is_whitespace() || c == ':')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() > 1 && parts.iter().all(|p| p.len() == 2) {
        let uid: Option<Vec<u8>> = parts
            .iter()
            .map(|p| u8::from_str_radix(p, 16).ok())
            .collect();
        if let Some(uid) = uid {
            return Some(tag_id_from_uid(&uid));
        }
    }

    Some(line.to_string())
}

/// Spawns a task forwarding every reading from `input` into the returned
/// channel. The channel closes at end of input.
pub fn spawn_line_reader<R>(input: R) -> mpsc::Receiver<String>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(READING_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut lines = input.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Some(tag_id) = parse_reading(&line) else {
                        continue;
                    };
                    debug!(target: "Reader", "Tag presented: {tag_id}");
                    if tx.send(tag_id).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(target: "Reader", "Input closed");
                    break;
                }
                Err(e) => {
                    warn!(target: "Reader", "Failed to read input: {e}");
                    break;
                }
            }
        }
    });
    rx
}

pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    spawn_line_reader(BufReader::new(tokio::io::stdin()))
}
