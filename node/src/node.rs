//! Dev node: state backend, executor and API server wired together

use crate::api::start_api_server;
use crate::runtime::NodeRuntime;
use keyledger_core::{KeyledgerResult, NodeConfig};
use keyledger_state::{MemoryStateStore, PersistentStateStore, StateStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

/// KEYLEDGER dev node
pub struct KeyledgerNode {
    runtime: Arc<NodeRuntime>,
}

impl KeyledgerNode {
    /// Create a node, opening the sled store when `data_dir` is set
    pub fn new(config: NodeConfig) -> KeyledgerResult<Self> {
        let state: Arc<dyn StateStore> = match &config.data_dir {
            Some(dir) => {
                info!("Using persistent state in {}", dir.display());
                Arc::new(PersistentStateStore::open(dir)?)
            }
            None => {
                info!("Using in-memory state");
                Arc::new(MemoryStateStore::new())
            }
        };

        Ok(Self {
            runtime: NodeRuntime::new(config, state),
        })
    }

    /// Run until ctrl-c
    pub async fn start(&self) -> anyhow::Result<()> {
        let config = self.runtime.config();
        info!("Starting KEYLEDGER node {}...", config.name);

        let executor = self.runtime.spawn_executor()?;
        let listener = TcpListener::bind(&config.listen_addr).await?;

        let shutdown = async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received, stopping node..."),
                Err(e) => error!("Error waiting for shutdown signal: {}", e),
            }
        };

        let result = start_api_server(self.runtime.clone(), listener, shutdown).await;

        executor.abort();
        info!("Node stopped");

        result
    }

    /// Get runtime reference
    pub fn runtime(&self) -> &Arc<NodeRuntime> {
        &self.runtime
    }
}

/// Node builder layering flag overrides on a base config
pub struct NodeBuilder {
    config: NodeConfig,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn listen_addr(mut self, addr: &str) -> Self {
        self.config.listen_addr = addr.to_string();
        self
    }

    pub fn data_dir(mut self, dir: PathBuf) -> Self {
        self.config.data_dir = Some(dir);
        self
    }

    pub fn auth(mut self, user: &str, password: Option<&str>) -> Self {
        self.config.auth_user = Some(user.to_string());
        self.config.auth_password = password.map(str::to_string);
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.log_level = level.to_string();
        self
    }

    pub fn build_config(self) -> NodeConfig {
        self.config
    }

    pub fn build(self) -> KeyledgerResult<KeyledgerNode> {
        KeyledgerNode::new(self.config)
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
