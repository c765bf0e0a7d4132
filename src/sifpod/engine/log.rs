/*
 * Copyright (C) 2026 The Sifpod Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Splices payload stdout/stderr into the CRI log file. The kubelet
//! parses each line as `RFC3339Nano STREAM F CONTENT`, so every captured
//! line is stamped at arrival.

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::runtime::Builder as TokioRuntimeBuilder;
use tokio::sync::mpsc;
use tokio::task;

use crate::sifpod::logger::log_error;
use crate::sifpod::util::{with_context, BoxError};

#[derive(Copy, Clone, Debug)]
enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

struct CapturedLine {
    stream: StreamKind,
    when: DateTime<Utc>,
    line: String,
}

/// Runs the pump on its own thread with a current-thread runtime so the
/// caller stays synchronous. The pump ends when both pipes hit EOF.
pub fn spawn_log_pump(
    stdout: std::fs::File,
    stderr: std::fs::File,
    log_path: PathBuf,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let rt = match TokioRuntimeBuilder::new_current_thread().build() {
            Ok(rt) => rt,
            Err(err) => {
                log_error(
                    "log",
                    "Failed to build log pump runtime",
                    &[("error", &err.to_string())],
                );
                return;
            }
        };
        rt.block_on(async move {
            let stdout = tokio::fs::File::from_std(stdout);
            let stderr = tokio::fs::File::from_std(stderr);
            if let Err(err) = write_cri_logs(stdout, stderr, &log_path).await {
                log_error("log", "Logger error", &[("error", &err.to_string())]);
            }
        });
    })
}

/// Reads both streams to EOF, appending CRI-formatted lines to
/// `log_path` in arrival order.
pub async fn write_cri_logs<R1, R2, P>(stdout: R1, stderr: R2, log_path: P) -> Result<(), BoxError>
where
    R1: AsyncRead + Unpin + Send + 'static,
    R2: AsyncRead + Unpin + Send + 'static,
    P: AsRef<Path>,
{
    let log_path = log_path.as_ref().to_path_buf();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            with_context(
                e,
                format!("failed to create log directory {}", parent.display()),
            )
        })?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await
        .map_err(|e| with_context(e, format!("failed to open log file {}", log_path.display())))?;
    let mut writer = BufWriter::new(file);

    let (tx, mut rx) = mpsc::channel::<CapturedLine>(1024);

    {
        let tx = tx.clone();
        task::spawn(async move {
            read_stream_lines(BufReader::new(stdout), StreamKind::Stdout, tx).await;
        });
    }
    {
        let tx = tx.clone();
        task::spawn(async move {
            read_stream_lines(BufReader::new(stderr), StreamKind::Stderr, tx).await;
        });
    }
    drop(tx);

    while let Some(item) = rx.recv().await {
        let line = format_line(item.when, item.stream.as_str(), &item.line);
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| with_context(e, format!("failed to write {}", log_path.display())))?;
    }

    writer
        .flush()
        .await
        .map_err(|e| with_context(e, format!("failed to flush {}", log_path.display())))?;
    Ok(())
}

async fn read_stream_lines<R>(
    reader: BufReader<R>,
    stream: StreamKind,
    tx: mpsc::Sender<CapturedLine>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let item = CapturedLine {
                    stream,
                    when: Utc::now(),
                    line,
                };
                if tx.send(item).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                log_error(
                    "log",
                    "Failed to read captured stream",
                    &[("stream", stream.as_str()), ("error", &err.to_string())],
                );
                return;
            }
        }
    }
}

/// One CRI log line: `RFC3339Nano STREAM F CONTENT`. The `F` tag marks a
/// full line; partial-line tagging is not produced here.
fn format_line(when: DateTime<Utc>, stream: &str, content: &str) -> String {
    format!(
        "{} {} F {}\n",
        when.to_rfc3339_opts(SecondsFormat::Nanos, true),
        stream,
        content
    )
}
