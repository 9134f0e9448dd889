//! `archscope-mcp init`: register this binary in the project-scoped config
//! of every MCP client found on `PATH`.

use std::path::{Path, PathBuf};

use archscope_core::write_atomic;
use thiserror::Error;
use tracing::{info, warn};

const SERVER_NAME: &str = "archscope";

#[derive(Error, Debug)]
pub enum InitError {
    #[error("no MCP client found in PATH (looked for {0}); install one and re-run `archscope-mcp init`")]
    NoClient(String),

    #[error("cannot locate the archscope-mcp binary: {0}")]
    Binary(#[source] std::io::Error),

    #[error("{} exists but is not valid {format}; fix or remove it first", path.display())]
    Unreadable { path: PathBuf, format: &'static str },

    #[error(transparent)]
    Write(#[from] archscope_core::Error),
}

/// An MCP client we know how to register with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Client {
    ClaudeCode,
    Codex,
}

impl Client {
    pub const ALL: [Client; 2] = [Client::ClaudeCode, Client::Codex];

    fn executable(self) -> &'static str {
        match self {
            Client::ClaudeCode => "claude",
            Client::Codex => "codex",
        }
    }

    /// Project-scoped config file this client reads.
    pub fn config_path(self, project: &Path) -> PathBuf {
        match self {
            Client::ClaudeCode => project.join(".mcp.json"),
            Client::Codex => project.join(".codex").join("config.toml"),
        }
    }

    /// Merge our server entry into the client's config under `project`,
    /// keeping everything else in the file. An existing file that does not
    /// parse is left alone.
    pub fn register(self, project: &Path, command: &str) -> Result<PathBuf, InitError> {
        let path = self.config_path(project);
        let existing = std::fs::read_to_string(&path).ok();
        let contents = match self {
            Client::ClaudeCode => mcp_json_with_server(existing.as_deref(), command)
                .ok_or_else(|| InitError::Unreadable { path: path.clone(), format: "JSON" })?,
            Client::Codex => codex_toml_with_server(existing.as_deref(), command)
                .ok_or_else(|| InitError::Unreadable { path: path.clone(), format: "TOML" })?,
        };
        write_atomic(&path, &contents)?;
        Ok(path)
    }
}

/// Clients whose executable is on `PATH`.
pub fn detect_clients() -> Vec<Client> {
    Client::ALL
        .into_iter()
        .filter(|c| on_path(c.executable()))
        .collect()
}

fn on_path(name: &str) -> bool {
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths)
            .any(|dir| dir.join(name).is_file() || dir.join(format!("{name}.exe")).is_file())
    })
}

fn mcp_json_with_server(existing: Option<&str>, command: &str) -> Option<String> {
    let mut root = match existing.filter(|s| !s.trim().is_empty()) {
        Some(raw) => serde_json::from_str::<serde_json::Value>(raw).ok()?,
        None => serde_json::json!({}),
    };
    let servers = root
        .as_object_mut()?
        .entry("mcpServers")
        .or_insert_with(|| serde_json::json!({}))
        .as_object_mut()?;
    servers.insert(
        SERVER_NAME.to_string(),
        serde_json::json!({ "type": "stdio", "command": command, "args": [] }),
    );
    serde_json::to_string_pretty(&root).ok()
}

fn codex_toml_with_server(existing: Option<&str>, command: &str) -> Option<String> {
    let mut doc: toml_edit::DocumentMut = match existing {
        Some(raw) => raw.parse().ok()?,
        None => toml_edit::DocumentMut::new(),
    };
    let servers = doc
        .entry("mcp_servers")
        .or_insert(toml_edit::Item::Table(toml_edit::Table::new()))
        .as_table_mut()?;
    servers.set_implicit(true);
    let mut server = toml_edit::Table::new();
    server.insert("command", toml_edit::value(command));
    server.insert("args", toml_edit::value(toml_edit::Array::new()));
    servers.insert(SERVER_NAME, toml_edit::Item::Table(server));
    Some(doc.to_string())
}

/// Register with every detected client in `project`. Returns the files written.
pub fn init_project(project: &Path) -> Result<Vec<PathBuf>, InitError> {
    let clients = detect_clients();
    if clients.is_empty() {
        let names: Vec<&str> = Client::ALL.iter().map(|c| c.executable()).collect();
        return Err(InitError::NoClient(names.join(", ")));
    }
    let binary = std::env::current_exe()
        .and_then(|p| p.canonicalize())
        .map_err(InitError::Binary)?;
    let command = binary.to_string_lossy();

    let mut written = Vec::new();
    for client in clients {
        match client.register(project, &command) {
            Ok(path) => {
                info!(client = ?client, path = %path.display(), "registered archscope server");
                written.push(path);
            }
            Err(e) => warn!(client = ?client, error = %e, "could not register"),
        }
    }
    Ok(written)
}
