//! Child-process agent transport.
//!
//! Each connection spawns the executable for the requested service and
//! talks to it over stdio, one JSON frame per line:
//!
//! ```text
//! {"frame":"request","id":1,"request":{"kind":"create",...},"attachments":0}
//! {"frame":"reply","id":1,"reply":{"kind":"create","result":"success"},"attachments":0}
//! {"frame":"interrupt_request"}
//! {"frame":"attachment","data":[...]}
//! ```
//!
//! A request or reply announcing `n` attachments is followed by exactly
//! `n` attachment frames, in slot order. Frame buffers holding attachment
//! bytes are zeroed after writing and after parsing.

use super::channel::{AgentChannel, AgentConnector, ConnectRequest};
use super::message::{AgentReply, AgentRequest, InboundEvent, OutboundMessage};
use super::wire::Attachments;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace, warn};
use warden_core::error::TransportError;
use warden_core::utils::AgentConfig;
use zeroize::Zeroizing;

#[derive(Serialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
enum OutFrame<'a> {
    Request {
        id: u64,
        request: &'a AgentRequest,
        attachments: usize,
    },
    Reply {
        id: u64,
        reply: &'a AgentReply,
        attachments: usize,
    },
    InterruptRequest,
    Attachment {
        data: &'a [u8],
    },
}

#[derive(Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
enum InFrame {
    Request {
        id: u64,
        request: AgentRequest,
        attachments: usize,
    },
    Reply {
        id: u64,
        reply: AgentReply,
        attachments: usize,
    },
    InterruptRequest,
    Attachment {
        data: Vec<u8>,
    },
}

impl InFrame {
    fn name(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Reply { .. } => "reply",
            Self::InterruptRequest => "interrupt_request",
            Self::Attachment { .. } => "attachment",
        }
    }
}

fn write_frame<W: Write>(writer: &mut W, frame: &OutFrame<'_>) -> Result<(), TransportError> {
    let mut line = Zeroizing::new(
        serde_json::to_vec(frame).map_err(|e| TransportError::Protocol(e.to_string()))?,
    );
    line.push(b'\n');
    writer
        .write_all(&line)
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<InFrame>, TransportError> {
    let mut line = Zeroizing::new(String::new());
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        if read == 0 {
            return Ok(None);
        }
        if line.trim().is_empty() {
            continue;
        }
        return serde_json::from_str(&line)
            .map(Some)
            .map_err(|e| TransportError::Protocol(format!("malformed frame: {}", e)));
    }
}

fn read_attachments<R: BufRead>(
    reader: &mut R,
    count: usize,
) -> Result<Attachments, TransportError> {
    let mut attachments = Attachments::with_capacity(count);
    for _ in 0..count {
        match read_frame(reader)? {
            Some(InFrame::Attachment { data }) => attachments.push(Zeroizing::new(data)),
            Some(other) => {
                return Err(TransportError::Protocol(format!(
                    "expected attachment frame, got {}",
                    other.name()
                )))
            }
            None => return Err(TransportError::Closed),
        }
    }
    Ok(attachments)
}

fn write_attachments<W: Write>(
    writer: &mut W,
    attachments: &Attachments,
) -> Result<(), TransportError> {
    for data in attachments {
        write_frame(writer, &OutFrame::Attachment { data: data.as_slice() })?;
    }
    Ok(())
}

/// Write a request and its attachments.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &OutboundMessage,
) -> Result<(), TransportError> {
    write_frame(
        writer,
        &OutFrame::Request {
            id: message.id,
            request: &message.request,
            attachments: message.attachments.len(),
        },
    )?;
    write_attachments(writer, &message.attachments)?;
    writer
        .flush()
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

/// Write a reply and its attachments. Used by agent executables.
pub fn write_reply<W: Write>(
    writer: &mut W,
    id: u64,
    reply: &AgentReply,
    attachments: &Attachments,
) -> Result<(), TransportError> {
    write_frame(
        writer,
        &OutFrame::Reply {
            id,
            reply,
            attachments: attachments.len(),
        },
    )?;
    write_attachments(writer, attachments)?;
    writer
        .flush()
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

/// Write an unsolicited interrupt request. Used by agent executables.
pub fn write_interrupt_request<W: Write>(writer: &mut W) -> Result<(), TransportError> {
    write_frame(writer, &OutFrame::InterruptRequest)?;
    writer
        .flush()
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

/// Read a request and its attachments. Used by agent executables.
///
/// Returns `Ok(None)` at end of input.
pub fn read_message<R: BufRead>(reader: &mut R) -> Result<Option<OutboundMessage>, TransportError> {
    match read_frame(reader)? {
        Some(InFrame::Request {
            id,
            request,
            attachments,
        }) => {
            let attachments = read_attachments(reader, attachments)?;
            Ok(Some(OutboundMessage {
                id,
                request,
                attachments,
            }))
        }
        Some(other) => Err(TransportError::Protocol(format!(
            "expected request frame, got {}",
            other.name()
        ))),
        None => Ok(None),
    }
}

/// Read the next event sent by an agent.
///
/// Returns `Ok(None)` at end of input.
pub fn read_event<R: BufRead>(reader: &mut R) -> Result<Option<InboundEvent>, TransportError> {
    match read_frame(reader)? {
        Some(InFrame::Reply {
            id,
            reply,
            attachments,
        }) => {
            let attachments = read_attachments(reader, attachments)?;
            Ok(Some(InboundEvent::Reply {
                id,
                reply,
                attachments,
            }))
        }
        Some(InFrame::InterruptRequest) => {
            Ok(Some(InboundEvent::InterruptRequested { applied: None }))
        }
        Some(other) => Err(TransportError::Protocol(format!(
            "unexpected {} frame from agent",
            other.name()
        ))),
        None => Ok(None),
    }
}

/// Connector spawning one agent executable per connection.
///
/// The executable is `<executable_dir>/<service executable name>`, started
/// with `--plugin <plugin> --param <param>`.
#[derive(Debug, Clone)]
pub struct ProcessConnector {
    executable_dir: PathBuf,
}

impl ProcessConnector {
    /// Create a connector looking for agents in `executable_dir`.
    pub fn new(executable_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable_dir: executable_dir.into(),
        }
    }

    /// Create a connector from the agent configuration.
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.executable_dir.clone())
    }
}

impl AgentConnector for ProcessConnector {
    fn connect(
        &self,
        request: &ConnectRequest,
        events: Sender<InboundEvent>,
    ) -> Result<Arc<dyn AgentChannel>, TransportError> {
        let path = self
            .executable_dir
            .join(request.service.executable_name());

        let mut child = Command::new(&path)
            .arg("--plugin")
            .arg(&request.plugin)
            .arg("--param")
            .arg(&request.param)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| TransportError::ConnectFailed(format!("{}: {}", path.display(), e)))?;

        let pid = child.id();
        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                reap(&mut child);
                return Err(TransportError::ConnectFailed(
                    "agent stdio not captured".to_string(),
                ));
            }
        };

        let spawned = thread::Builder::new()
            .name(format!("warden-agent-reader-{}", pid))
            .spawn(move || {
                let mut reader = BufReader::new(stdout);
                loop {
                    match read_event(&mut reader) {
                        Ok(Some(event)) => {
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = events.send(InboundEvent::Failed(e));
                            break;
                        }
                    }
                }
                trace!(pid, "Agent output closed");
            });
        if let Err(e) = spawned {
            reap(&mut child);
            return Err(TransportError::ConnectFailed(e.to_string()));
        }

        debug!(pid, service = %request.service, plugin = %request.plugin, "Agent process started");
        Ok(Arc::new(ProcessChannel {
            pid,
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
        }))
    }
}

fn reap(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(_)) => {}
        _ => {
            if let Err(e) = child.kill() {
                warn!(pid = child.id(), "Failed to kill agent process: {}", e);
            }
            let _ = child.wait();
        }
    }
}

struct ProcessChannel {
    pid: u32,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
}

impl AgentChannel for ProcessChannel {
    fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let mut guard = self.stdin.lock();
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
        write_message(stdin, &message)
    }

    /// Closes the agent's input, then reaps it. An agent still running at
    /// that point is killed.
    fn close(&self) {
        drop(self.stdin.lock().take());
        if let Some(mut child) = self.child.lock().take() {
            reap(&mut child);
            debug!(pid = self.pid, "Agent process closed");
        }
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ProcessChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessChannel")
            .field("pid", &self.pid)
            .field("open", &self.stdin.lock().is_some())
            .finish()
    }
}
