//! Helper to handle the workload's stdout/stderr
//!
//! Under the capture policy each output line is forwarded to the log tagged as
//! the workload and scanned for known-error markers. Under the inherit policy
//! the child writes straight to the supervisor's terminal.

use std::process::Stdio;

use shared::{component_debug, component_info, component_warn, ComponentId, StdioPolicy};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::traits::ProcessEvent;

/// Configure stdio for the workload according to the policy
pub fn configure_child_stdio(cmd: &mut Command, policy: StdioPolicy) {
    match policy {
        StdioPolicy::Capture => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).stdin(Stdio::null());
        }
        StdioPolicy::Inherit => {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit()).stdin(Stdio::null());
        }
    }

    component_debug!(ComponentId::current(), "🔗 Workload stdio policy: {}", policy);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Spawn one scanner task per piped stream
///
/// Returns nothing to wait on when output is inherited.
pub fn spawn_output_scanners(
    child: &mut Child,
    record_id: Uuid,
    markers: Vec<String>,
    events: mpsc::Sender<ProcessEvent>,
) -> Vec<JoinHandle<()>> {
    let mut scanners = Vec::new();

    if let Some(stdout) = child.stdout.take() {
        scanners.push(tokio::spawn(scan_lines(
            stdout,
            Stream::Stdout,
            record_id,
            markers.clone(),
            events.clone(),
        )));
    }

    if let Some(stderr) = child.stderr.take() {
        scanners.push(tokio::spawn(scan_lines(stderr, Stream::Stderr, record_id, markers, events)));
    }

    scanners
}

async fn scan_lines<R>(
    reader: R,
    stream: Stream,
    record_id: Uuid,
    markers: Vec<String>,
    events: mpsc::Sender<ProcessEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                component_warn!(ComponentId::current(), "Workload {:?} read error: {}", stream, e);
                break;
            }
        }

        // Lossy decode: the pipe must be drained until EOF
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);

        match stream {
            Stream::Stdout => {
                component_info!(ComponentId::Workload, "{}", line);
            }
            Stream::Stderr => {
                component_warn!(ComponentId::Workload, "{}", line);
            }
        }

        for marker in markers.iter().filter(|marker| line.contains(marker.as_str())) {
            let _ = events
                .send(ProcessEvent::MarkerDetected {
                    record_id,
                    marker: marker.clone(),
                    line: line.to_string(),
                })
                .await;
        }
    }
}

/// Parse the comma separated marker list, dropping blanks
pub fn parse_markers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|marker| !marker.is_empty())
        .map(str::to_string)
        .collect()
}
