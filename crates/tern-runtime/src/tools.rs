use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tern_core::{
    ContentBlock, Message, Result, TernError, Tool, ToolCall, ToolExecutor, image_media_type,
};
use tern_llm::{LlmProvider, search_trigger_tool};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::undo::{UndoJournal, journal_key, read_previous};

const NO_OUTPUT: &str = "(Command executed successfully with no output)";

/// Bytes a child process may write (stdout and stderr together) before it
/// is killed.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

const SEARCH_PROMPT: &str = "Search the web and provide a detailed answer.";
const DESCRIBE_PROMPT: &str = "Describe these images in detail.";

/// Built-in tools that ship with the Tern runtime.
#[derive(Clone)]
pub struct BuiltinTools {
    shell_timeout: Duration,
    read_file_max_lines: usize,
    max_output_bytes: usize,
    undo: Option<Arc<Mutex<UndoJournal>>>,
    /// Backend for `google_search` and `describe_image`; those tools are
    /// offered only when one is attached.
    llm: Option<Arc<dyn LlmProvider>>,
}

impl Default for BuiltinTools {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 500)
    }
}

impl BuiltinTools {
    pub fn new(shell_timeout: Duration, read_file_max_lines: usize) -> Self {
        Self {
            shell_timeout,
            read_file_max_lines,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            undo: None,
            llm: None,
        }
    }

    /// Kill child processes once they have written `bytes` of output.
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes.max(1);
        self
    }

    /// Enable the tools that make a nested model request.
    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Record files before `update_file` changes them.
    pub fn with_undo(mut self, undo: Arc<Mutex<UndoJournal>>) -> Self {
        self.undo = Some(undo);
        self
    }

    async fn exec_bash(&self, call: &ToolCall) -> Result<String> {
        let command = required_str(call, "command")?;
        info!(command, "executing shell command");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        Ok(run_process(cmd, self.shell_timeout, self.max_output_bytes).await)
    }

    async fn exec_search_files(&self, call: &ToolCall) -> Result<String> {
        let pattern = required_str(call, "pattern")?;
        let mut cmd = Command::new("fd");
        cmd.arg(pattern);
        Ok(run_process(cmd, self.shell_timeout, self.max_output_bytes).await)
    }

    async fn exec_search_string(&self, call: &ToolCall) -> Result<String> {
        let query = required_str(call, "query")?;
        let mut cmd = Command::new("rg");
        cmd.args(["-n", "-C", "5", "--", query, "."]);
        Ok(run_process(cmd, self.shell_timeout, self.max_output_bytes).await)
    }

    async fn exec_read_file(&self, call: &ToolCall) -> Result<String> {
        let path = required_str(call, "path")?;
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => return Ok(format!("Error reading file: {e}")),
        };

        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        let start = call.arguments["start_line"]
            .as_u64()
            .map(|n| n.max(1) as usize - 1)
            .unwrap_or(0);
        let end = call.arguments["end_line"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(lines.len())
            .min(lines.len())
            .min(start.saturating_add(self.read_file_max_lines));

        let body = if start < end {
            lines[start..end].concat()
        } else {
            String::new()
        };
        Ok(format!("(Total lines: {})\n{body}", lines.len()))
    }

    async fn exec_update_file(&self, call: &ToolCall) -> Result<String> {
        let path = required_str(call, "path")?;
        let content = required_str(call, "content")?;

        let new_content = match call.arguments["old_content"].as_str().filter(|s| !s.is_empty()) {
            Some(old) => {
                let current = match tokio::fs::read_to_string(path).await {
                    Ok(current) => current,
                    Err(e) => return Ok(format!("Error updating file: {e}")),
                };
                if !current.contains(old) {
                    return Ok("Error: 'old_content' text block not found in file. \
                               Ensure exact match (including whitespace)."
                        .into());
                }
                current.replace(old, content)
            }
            None => content.to_string(),
        };

        if let Some(undo) = &self.undo {
            let key = journal_key(Path::new(path));
            let wanted = undo.lock().wants_file(&key);
            if wanted {
                match read_previous(&key).await {
                    Ok(previous) => undo.lock().record_file(key, previous),
                    Err(e) => {
                        warn!(path = %key.display(), error = %e, "cannot snapshot file for undo")
                    }
                }
            }
        }

        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.ok();
        }

        match tokio::fs::write(path, new_content).await {
            Ok(()) => Ok(format!("Successfully updated {path}.")),
            Err(e) => Ok(format!("Error updating file: {e}")),
        }
    }

    async fn exec_google_search(&self, llm: &dyn LlmProvider, call: &ToolCall) -> Result<String> {
        let query = required_str(call, "query")?;
        info!(query, "web search");
        let log = [Message::system(SEARCH_PROMPT), Message::user(query)];
        match llm.complete(&log, &[search_trigger_tool()]).await {
            Ok(rt) => Ok(rt.reply.text_content()),
            Err(e) => Ok(format!("Error performing google search: {e}")),
        }
    }

    async fn exec_describe_image(&self, llm: &dyn LlmProvider, call: &ToolCall) -> Result<String> {
        let paths: Vec<&str> = match &call.arguments["paths"] {
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            Value::String(one) => vec![one.as_str()],
            _ => vec![],
        };
        if paths.is_empty() {
            return Err(TernError::tool(&call.tool_name, "missing 'paths' argument"));
        }

        let mut blocks = vec![ContentBlock::text(DESCRIBE_PROMPT)];
        for p in paths {
            let Some(media_type) = image_media_type(Path::new(p)) else {
                return Ok(format!("Error reading image {p}: unsupported image type"));
            };
            let bytes = match tokio::fs::read(p).await {
                Ok(bytes) => bytes,
                Err(e) => return Ok(format!("Error reading image {p}: {e}")),
            };
            let data = base64::engine::general_purpose::STANDARD.encode(bytes);
            blocks.push(ContentBlock::image(media_type, data));
        }

        match llm.complete(&[Message::user(blocks)], &[]).await {
            Ok(rt) => Ok(rt.reply.text_content()),
            Err(e) => Ok(format!("Error describing images: {e}")),
        }
    }
}

fn required_str<'a>(call: &'a ToolCall, key: &str) -> Result<&'a str> {
    call.arguments[key]
        .as_str()
        .ok_or_else(|| TernError::tool(&call.tool_name, format!("missing '{key}' argument")))
}

/// Run a process with stdin closed. It is killed when the timeout fires or
/// once it has written more than `max_bytes` of output.
async fn run_process(mut cmd: Command, timeout: Duration, max_bytes: usize) -> String {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return format!("Error executing command: {e}"),
    };

    let mut captured = match tokio::time::timeout(timeout, capture(&mut child, max_bytes)).await {
        Ok(captured) => captured,
        Err(_) => {
            return format!("Error: Command timed out after {} seconds.", timeout.as_secs());
        }
    };

    if captured.cut_off {
        captured.stdout.truncate(max_bytes);
        captured.stderr.truncate(max_bytes - captured.stdout.len());
    }

    let mut text = String::from_utf8_lossy(&captured.stdout).into_owned();
    if !captured.stderr.is_empty() {
        text.push_str("\nSTDERR:\n");
        text.push_str(&String::from_utf8_lossy(&captured.stderr));
    }
    if captured.cut_off {
        text.push_str(&format!(
            "\n... (Output exceeded {max_bytes} bytes; the command was stopped.)"
        ));
    }

    if text.trim().is_empty() {
        NO_OUTPUT.to_string()
    } else {
        text
    }
}

#[derive(Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    cut_off: bool,
}

/// Drain both pipes until they close or the byte ceiling is crossed, then
/// reap the child.
async fn capture(child: &mut Child, max_bytes: usize) -> Captured {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = [0u8; 8192];
    let mut err_buf = [0u8; 8192];
    let mut captured = Captured::default();

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            n = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => match n {
                Some(n) => captured.stdout.extend_from_slice(&out_buf[..n]),
                None => stdout = None,
            },
            n = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => match n {
                Some(n) => captured.stderr.extend_from_slice(&err_buf[..n]),
                None => stderr = None,
            },
        }
        if captured.stdout.len() + captured.stderr.len() > max_bytes {
            captured.cut_off = true;
            break;
        }
    }

    if captured.cut_off {
        warn!(max_bytes, "process output ceiling reached, killing it");
        child.start_kill().ok();
    }
    child.wait().await.ok();
    captured
}

/// One read from `reader`; `None` at end of stream or on error.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut Option<R>, buf: &mut [u8]) -> Option<usize> {
    match reader.as_mut()?.read(buf).await {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n),
    }
}

#[async_trait]
impl ToolExecutor for BuiltinTools {
    fn tools(&self) -> Vec<Tool> {
        let mut tools = vec![
            Tool {
                name: "bash".into(),
                description: format!(
                    "Execute a non-interactive bash command and return stdout/stderr. \
                     Stdin is closed. Times out after {} seconds.",
                    self.shell_timeout.as_secs()
                ),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "command": { "type": "string", "description": "The bash command to execute." }
                    },
                    "required": ["command"]
                }),
            },
            Tool {
                name: "search_files".into(),
                description: "Search for files by name pattern (uses fd).".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "pattern": { "type": "string", "description": "The filename pattern to search for." }
                    },
                    "required": ["pattern"]
                }),
            },
            Tool {
                name: "search_string".into(),
                description: "Search file contents for a string, with 5 lines of context (uses ripgrep).".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "The string to search for." }
                    },
                    "required": ["query"]
                }),
            },
            Tool {
                name: "read_file".into(),
                description: format!(
                    "Read a file, optionally a 1-based inclusive line range. At most {} lines are returned.",
                    self.read_file_max_lines
                ),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "The path to the file." },
                        "start_line": { "type": "integer", "description": "First line to return (1-based)." },
                        "end_line": { "type": "integer", "description": "Last line to return (inclusive)." }
                    },
                    "required": ["path"]
                }),
            },
            Tool {
                name: "update_file".into(),
                description: "Write a file. With old_content, replace every occurrence of that exact \
                              text block instead of overwriting the whole file."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "The path to the file." },
                        "content": { "type": "string", "description": "The new content." },
                        "old_content": { "type": "string", "description": "Optional text block to replace." }
                    },
                    "required": ["path", "content"]
                }),
            },
        ];

        if self.llm.is_some() {
            tools.push(Tool {
                name: "google_search".into(),
                description: "Perform a web search using Google Search Grounding.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "The search query." }
                    },
                    "required": ["query"]
                }),
            });
            tools.push(Tool {
                name: "describe_image".into(),
                description: "Describe one or more images (png, jpeg, gif or webp).".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "paths": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Paths to the image files."
                        }
                    },
                    "required": ["paths"]
                }),
            });
        }
        tools
    }

    fn has_tool(&self, name: &str) -> bool {
        match name {
            "bash" | "search_files" | "search_string" | "read_file" | "update_file" => true,
            "google_search" | "describe_image" => self.llm.is_some(),
            _ => false,
        }
    }

    async fn execute(&self, call: &ToolCall) -> Result<String> {
        match (call.tool_name.as_str(), self.llm.as_deref()) {
            ("bash", _) => self.exec_bash(call).await,
            ("search_files", _) => self.exec_search_files(call).await,
            ("search_string", _) => self.exec_search_string(call).await,
            ("read_file", _) => self.exec_read_file(call).await,
            ("update_file", _) => self.exec_update_file(call).await,
            ("google_search", Some(llm)) => self.exec_google_search(llm, call).await,
            ("describe_image", Some(llm)) => self.exec_describe_image(llm, call).await,
            (other, _) => Err(TernError::ToolNotFound(other.to_string())),
        }
    }
}
