// ===============================
// src/recorder.rs
// ===============================
//
// Append-only JSONL event log:
// - one `Record { ts, event }` per line, ts is wall-clock RFC 3339
// - BufWriter, flushed every second or every 1000 events
// - parent directory created on open
// - on a write error the file is reopened once before the event is dropped
//
// Enabled with `--record-file` / `RECORD_FILE` (see main.rs).
//
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::path::Path;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

#[derive(Debug, Serialize)]
struct Record<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a Event,
}

async fn open_writer(path: &str) -> std::io::Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

fn encode(ev: &Event) -> serde_json::Result<String> {
    let rec = Record { ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true), event: ev };
    let mut line = serde_json::to_string(&rec)?;
    line.push('\n');
    Ok(line)
}

async fn write_line(writer: &mut BufWriter<File>, path: &str, line: &str) -> std::io::Result<()> {
    if let Err(e) = writer.write_all(line.as_bytes()).await {
        error!(?e, %path, "recorder: write failed, reopening");
        *writer = open_writer(path).await?;
        writer.write_all(line.as_bytes()).await?;
    }
    Ok(())
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, %path, "recorder: cannot open file, recording disabled");
            // keep draining so senders never block on a full channel
            while rx.recv().await.is_some() {}
            return;
        }
    };
    info!(%path, "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                };
                let line = match encode(&ev) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, "recorder: serialize error, skip event");
                        continue;
                    }
                };
                if let Err(e) = write_line(&mut writer, &path, &line).await {
                    error!(?e, "recorder: event dropped");
                    continue;
                }
                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }
            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Fill;

    #[tokio::test]
    async fn writes_one_line_per_event() {
        let dir = std::env::temp_dir().join(format!("recorder_{}", std::process::id()));
        let path = dir.join("events.jsonl").to_string_lossy().into_owned();
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run(rx, path.clone()));

        tx.send(Event::Note("hello".into())).await.unwrap();
        tx.send(Event::Fill(Fill { timestamp: 100, symbol: "ROSES".into(), price: 14_500, quantity: -3 }))
            .await
            .unwrap();
        drop(tx);
        task.await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["Note"], "hello");
        assert_eq!(lines[1]["Fill"]["quantity"], -3);
        assert!(lines[1]["ts"].is_string());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
