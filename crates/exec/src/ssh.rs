//! SSH transport built on russh
//!
//! Public-key authentication only. Every `connect` reads the key file, dials,
//! handshakes and authenticates from scratch; nothing is pooled.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::Node;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use tracing::{debug, warn};

use crate::error::ExecError;
use crate::transport::{CommandOutput, Connector, RemoteSession};

/// How server host keys are checked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept whatever key the server presents (open to interception)
    #[default]
    AcceptAny,
    /// Require the key to match an entry in an OpenSSH known_hosts file
    KnownHosts(PathBuf),
}

/// Production `Connector`
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    host_keys: HostKeyPolicy,
    warned: Arc<AtomicBool>,
}

impl SshConnector {
    pub fn new(host_keys: HostKeyPolicy) -> Self {
        Self {
            host_keys,
            warned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn host_key_policy(&self) -> &HostKeyPolicy {
        &self.host_keys
    }

    async fn load_key(node: &Node) -> Result<key::KeyPair, ExecError> {
        let pem = tokio::fs::read_to_string(&node.key_path)
            .await
            .map_err(|e| ExecError::KeyUnreadable {
                path: node.key_path.clone(),
                reason: e.to_string(),
            })?;
        russh_keys::decode_secret_key(&pem, None).map_err(|e| ExecError::KeyInvalid {
            path: node.key_path.clone(),
            reason: e.to_string(),
        })
    }
}

struct HostKeyCheck {
    policy: HostKeyPolicy,
    host: String,
    port: u16,
    warned: Arc<AtomicBool>,
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::AcceptAny => {
                if !self.warned.swap(true, Ordering::Relaxed) {
                    warn!("SSH host key verification is disabled; any server key is accepted");
                }
                Ok(true)
            }
            HostKeyPolicy::KnownHosts(path) => {
                match russh_keys::check_known_hosts_path(
                    &self.host,
                    self.port,
                    server_public_key,
                    path,
                ) {
                    Ok(known) => {
                        if !known {
                            warn!(host = %self.host, "Host key not present in {}", path.display());
                        }
                        Ok(known)
                    }
                    Err(e) => {
                        warn!(host = %self.host, "Host key check failed: {}", e);
                        Ok(false)
                    }
                }
            }
        }
    }
}

struct SshSession {
    handle: Handle<HostKeyCheck>,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, ExecError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::Session(format!("open channel: {}", e)))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| ExecError::Session(format!("exec: {}", e)))?;

        let mut output = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        Ok(CommandOutput {
            output: String::from_utf8_lossy(&output).into_owned(),
            exit_status,
        })
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("SSH disconnect failed: {}", e);
        }
    }
}

fn map_connect_error(addr: &str, e: russh::Error) -> ExecError {
    match e {
        russh::Error::UnknownKey => ExecError::HostKeyRejected {
            addr: addr.to_string(),
        },
        other => ExecError::Connect {
            addr: addr.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        node: &Node,
        connect_timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, ExecError> {
        let key_pair = Self::load_key(node).await?;
        let addr = node.addr();
        let port = node.effective_port();
        let handler = HostKeyCheck {
            policy: self.host_keys.clone(),
            host: node.host.clone(),
            port,
            warned: self.warned.clone(),
        };
        let config = Arc::new(client::Config::default());

        let dial = async {
            let mut handle = client::connect(config, (node.host.as_str(), port), handler)
                .await
                .map_err(|e| map_connect_error(&addr, e))?;
            let accepted = handle
                .authenticate_publickey(&node.user, Arc::new(key_pair))
                .await
                .map_err(|e| map_connect_error(&addr, e))?;
            if !accepted {
                return Err(ExecError::AuthRejected {
                    user: node.user.clone(),
                    addr: addr.clone(),
                });
            }
            Ok(handle)
        };

        let handle = tokio::time::timeout(connect_timeout, dial)
            .await
            .map_err(|_| ExecError::ConnectTimeout {
                addr: addr.clone(),
                timeout: connect_timeout,
            })??;

        debug!(node = %node.name, "SSH session established to {}", addr);
        Ok(Box::new(SshSession { handle }))
    }
}
