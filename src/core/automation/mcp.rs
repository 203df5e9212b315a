//! Browser automation through an MCP server (for example a Playwright MCP
//! server) spawned as a child process and spoken to over JSON-RPC on stdio.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{
    ActionOutput, AutomationBackend, AutomationError, BackendSession, BrowserAction, Capability,
    CapabilitySet,
};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct McpTool {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

pub struct McpClient {
    server_name: String,
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
    pending_requests: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
    tx_req: mpsc::Sender<String>,
    stderr: Arc<Mutex<String>>,
    alive: Arc<AtomicBool>,
}

impl McpClient {
    pub async fn spawn(
        server_name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Arc<Self>> {
        info!("Starting MCP browser server: {} ({})", server_name, command);

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Failed to open MCP stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Failed to open MCP stdout"))?;
        let stderr_pipe = child.stderr.take();

        let (tx_req, mut rx_req) = mpsc::channel::<String>(100);
        let pending_requests = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let client = Arc::new(Self {
            server_name: server_name.to_string(),
            child: Mutex::new(Some(child)),
            next_id: AtomicU64::new(1),
            pending_requests: pending_requests.clone(),
            tx_req,
            stderr: Arc::new(Mutex::new(String::new())),
            alive: alive.clone(),
        });

        let mut stdin_writer = tokio::io::BufWriter::new(stdin);
        tokio::spawn(async move {
            while let Some(msg) = rx_req.recv().await {
                debug!("MCP TX: {}", msg);
                if let Err(e) = stdin_writer
                    .write_all(format!("{}\n", msg).as_bytes())
                    .await
                {
                    error!("Failed to write to MCP stdin: {}", e);
                    break;
                }
                let _ = stdin_writer.flush().await;
            }
        });

        let pending = pending_requests.clone();
        let server = server_name.to_string();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                debug!("MCP RX [{}]: {}", server, line);
                match serde_json::from_str::<JsonRpcResponse>(&line) {
                    Ok(resp) => {
                        if let Some(tx) = pending.lock().await.remove(&resp.id) {
                            let _ = tx.send(resp);
                        }
                    }
                    // Notifications and log lines carry no id.
                    Err(_) => debug!("Unparsed MCP RX [{}]: {}", server, line),
                }
            }
            warn!("MCP stdout closed for server [{}]", server);
            alive.store(false, Ordering::SeqCst);
            pending.lock().await.clear();
        });

        if let Some(stderr_pipe) = stderr_pipe {
            let stderr_log = client.stderr.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr_pipe).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    let mut s = stderr_log.lock().await;
                    if s.len() < 2000 {
                        s.push_str(&line);
                        s.push('\n');
                    }
                    debug!("MCP STDERR: {}", line);
                }
            });
        }

        if let Err(e) = client.initialize().await {
            let err_log = client.stderr.lock().await.clone();
            error!(
                "MCP server [{}] failed to initialize: {}. Stderr: {}",
                server_name, e, err_log
            );
            client.shutdown().await;
            return Err(anyhow!(
                "MCP initialization failed for [{}]: {}",
                server_name,
                e
            ));
        }
        info!("MCP server [{}] initialized", server_name);

        Ok(client)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        };

        let req_str = serde_json::to_string(&req)?;
        let (tx, rx) = oneshot::channel();
        self.pending_requests.lock().await.insert(id, tx);

        self.tx_req.send(req_str).await?;

        let resp = rx
            .await
            .map_err(|_| anyhow!("MCP server [{}] went away", self.server_name))?;
        if let Some(error) = resp.error {
            return Err(anyhow!("MCP RPC error: {}", error));
        }

        resp.result.ok_or_else(|| anyhow!("MCP RPC missing result"))
    }

    async fn initialize(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "jobpilot",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let resp = self.call("initialize", Some(params)).await?;
        debug!("MCP initialized: {:?}", resp);

        let notif = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        })
        .to_string();
        self.tx_req.send(notif).await?;

        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let result = self.call("tools/list", None).await?;
        Ok(result
            .get("tools")
            .and_then(|t| t.as_array())
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| serde_json::from_value(t.clone()).ok())
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let params = json!({
            "name": name,
            "arguments": arguments
        });
        self.call("tools/call", Some(params)).await
    }

    pub async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
    }
}

/// Tool names accepted for each capability, most specific first.
const TOOL_ALIASES: [(Capability, &[&str]); 5] = [
    (Capability::Navigate, &["browser_navigate", "navigate"]),
    (Capability::Type, &["browser_type", "browser_fill", "type"]),
    (Capability::Upload, &["browser_file_upload", "upload"]),
    (Capability::Click, &["browser_click", "click"]),
    (
        Capability::Screenshot,
        &["browser_take_screenshot", "browser_screenshot", "screenshot"],
    ),
];

/// Resolve which advertised tool services each capability.
pub fn map_tools(tools: &[McpTool]) -> HashMap<Capability, String> {
    let mut mapping = HashMap::new();
    for (capability, aliases) in TOOL_ALIASES {
        if let Some(alias) = aliases
            .iter()
            .find(|alias| tools.iter().any(|t| t.name == **alias))
        {
            mapping.insert(capability, alias.to_string());
        }
    }
    mapping
}

fn tool_arguments(action: &BrowserAction) -> Value {
    match action {
        BrowserAction::Navigate { url } => json!({ "url": url }),
        BrowserAction::Type { selector, text } => {
            json!({ "element": selector, "selector": selector, "text": text })
        }
        BrowserAction::Upload { selector, path } => {
            json!({ "element": selector, "selector": selector, "paths": [path] })
        }
        BrowserAction::Click { selector } => json!({ "element": selector, "selector": selector }),
        BrowserAction::Screenshot { label } => json!({ "filename": format!("{}.png", label) }),
    }
}

fn error_text(result: &Value) -> String {
    result
        .get("content")
        .and_then(|c| c.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "tool reported an error".to_string())
}

pub struct McpBrowserBackend {
    server_name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl McpBrowserBackend {
    pub fn new(
        server_name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            command: command.into(),
            args,
            env,
        }
    }
}

#[async_trait]
impl AutomationBackend for McpBrowserBackend {
    fn kind(&self) -> &'static str {
        "mcp"
    }

    async fn init(&self) -> Result<Box<dyn BackendSession>, AutomationError> {
        let client = McpClient::spawn(&self.server_name, &self.command, &self.args, &self.env)
            .await
            .map_err(|e| AutomationError::Unavailable(format!("{:#}", e)))?;
        let tools = match client.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                client.shutdown().await;
                return Err(AutomationError::Unavailable(format!(
                    "tools/list failed: {:#}",
                    e
                )));
            }
        };
        let tool_map = map_tools(&tools);
        debug!(server = %self.server_name, tools = tools.len(), mapped = tool_map.len(), "MCP browser tools resolved");

        Ok(Box::new(McpBrowserSession {
            server_name: self.server_name.clone(),
            client,
            tool_map,
        }))
    }
}

struct McpBrowserSession {
    server_name: String,
    client: Arc<McpClient>,
    tool_map: HashMap<Capability, String>,
}

#[async_trait]
impl BackendSession for McpBrowserSession {
    fn capabilities(&self) -> CapabilitySet {
        self.tool_map.keys().copied().collect()
    }

    async fn perform(&mut self, action: &BrowserAction) -> Result<ActionOutput, AutomationError> {
        let capability = action.capability();
        let tool = self
            .tool_map
            .get(&capability)
            .ok_or_else(|| AutomationError::Unsupported(capability.as_str().to_string()))?;

        let result = match self.client.call_tool(tool, tool_arguments(action)).await {
            Ok(result) => result,
            Err(e) if !self.client.is_alive() => {
                return Err(AutomationError::Unavailable(format!("{:#}", e)));
            }
            Err(e) => return Err(AutomationError::Rejected(format!("{:#}", e))),
        };

        if result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(AutomationError::Rejected(error_text(&result)));
        }

        let artifact = match action {
            BrowserAction::Screenshot { label } => {
                Some(format!("mcp://{}/{}.png", self.server_name, label))
            }
            _ => None,
        };
        Ok(ActionOutput { artifact })
    }

    async fn close(&mut self) {
        self.client.shutdown().await;
    }
}
