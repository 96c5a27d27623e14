//! Authentication chain.
//!
//! Steps are tried in order: the node's own key, the SSH agent, the
//! default `~/.ssh/id_rsa`, the node's password, then keyboard-interactive
//! with the node's canned answers. A rejected step moves on to the next
//! one; a transport error ends the chain.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use russh::client::{Handle, KeyboardInteractiveAuthResponse};
use russh::keys::agent::client::{AgentClient, AgentStream};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::ssh_key;
use russh::{AgentAuthError, CryptoVec, Signer};
use sshw_core::{KeyboardInteraction, Node};
use tracing::{debug, info, warn};

use crate::dial::ClientHandler;
use crate::error::SshError;
use crate::interactive;

/// Servers asking more rounds than this are refused.
const MAX_INTERACTIVE_ROUNDS: usize = 8;

/// One way of proving identity to the server.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthStep {
    Key {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Agent,
    Password(String),
    KeyboardInteractive(Vec<KeyboardInteraction>),
}

impl AuthStep {
    pub fn label(&self) -> &'static str {
        match self {
            AuthStep::Key { .. } => "publickey",
            AuthStep::Agent => "agent",
            AuthStep::Password(_) => "password",
            AuthStep::KeyboardInteractive(_) => "keyboard-interactive",
        }
    }
}

impl fmt::Debug for AuthStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStep::Key { path, .. } => f
                .debug_struct("Key")
                .field("path", path)
                .finish_non_exhaustive(),
            AuthStep::Agent => f.write_str("Agent"),
            AuthStep::Password(_) => f.write_str("Password(..)"),
            AuthStep::KeyboardInteractive(answers) => {
                write!(f, "KeyboardInteractive({} answers)", answers.len())
            }
        }
    }
}

/// Builds the ordered list of steps for `node`.
///
/// `agent_available` reflects `SSH_AUTH_SOCK`; `default_key` is the
/// default identity file if it exists. The node's explicit key is never
/// tried twice.
pub fn plan(node: &Node, agent_available: bool, default_key: Option<PathBuf>) -> Vec<AuthStep> {
    let mut steps = Vec::new();

    let explicit = (!node.key_path.is_empty()).then(|| resolve_home(&node.key_path));
    if let Some(path) = &explicit {
        steps.push(AuthStep::Key {
            path: path.clone(),
            passphrase: (!node.passphrase.is_empty()).then(|| node.passphrase.clone()),
        });
    }

    if agent_available {
        steps.push(AuthStep::Agent);
    }

    if let Some(path) = default_key {
        if explicit.as_ref() != Some(&path) {
            steps.push(AuthStep::Key {
                path,
                passphrase: None,
            });
        }
    }

    if !node.password.is_empty() {
        steps.push(AuthStep::Password(node.password.clone()));
    }

    if !node.keyboard_interactions.is_empty() {
        steps.push(AuthStep::KeyboardInteractive(
            node.keyboard_interactions.clone(),
        ));
    }
    steps
}

/// Expands a leading `~/` against the home directory.
pub fn resolve_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

fn default_identity() -> Option<PathBuf> {
    let path = dirs::home_dir()?.join(".ssh").join("id_rsa");
    path.is_file().then_some(path)
}

/// Runs the chain for `node` on a freshly handshaken session.
pub async fn authenticate(handle: &mut Handle<ClientHandler>, node: &Node) -> Result<(), SshError> {
    let user = node.user();
    let steps = plan(
        node,
        std::env::var_os("SSH_AUTH_SOCK").is_some(),
        default_identity(),
    );
    let rsa_hash = handle.best_supported_rsa_hash().await?.flatten();

    for step in &steps {
        let accepted = match step {
            AuthStep::Key { path, passphrase } => {
                match load_key(path, passphrase.as_deref()) {
                    Ok(key) => handle
                        .authenticate_publickey(&user, PrivateKeyWithHashAlg::new(key, rsa_hash))
                        .await?
                        .success(),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unusable key");
                        false
                    }
                }
            }
            AuthStep::Agent => authenticate_with_agent(handle, &user, rsa_hash).await?,
            AuthStep::Password(password) => handle
                .authenticate_password(&user, password)
                .await?
                .success(),
            AuthStep::KeyboardInteractive(answers) => {
                authenticate_interactive(handle, &user, answers).await?
            }
        };

        if accepted {
            info!(user = %user, method = step.label(), "Authenticated");
            return Ok(());
        }
        debug!(user = %user, method = step.label(), "Authentication step rejected");
    }

    Err(SshError::AuthenticationFailed(node.identity()))
}

fn load_key(path: &Path, passphrase: Option<&str>) -> Result<Arc<ssh_key::PrivateKey>, SshError> {
    let key = russh::keys::load_secret_key(path, passphrase)?;
    Ok(Arc::new(key))
}

async fn authenticate_with_agent(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    rsa_hash: Option<ssh_key::HashAlg>,
) -> Result<bool, SshError> {
    let mut agent = match AgentClient::connect_env().await {
        Ok(agent) => agent.dynamic(),
        Err(e) => {
            warn!(error = %e, "SSH agent unavailable");
            return Ok(false);
        }
    };

    let keys = agent
        .request_identities()
        .await
        .map_err(|e| SshError::Agent(e.to_string()))?;
    debug!(count = keys.len(), "Agent identities");

    for key in keys {
        let mut signer = AgentSigner { agent: &mut agent };
        match handle
            .authenticate_publickey_with(user, key.clone(), rsa_hash, &mut signer)
            .await
        {
            Ok(result) if result.success() => return Ok(true),
            Ok(_) => debug!(algorithm = %key.algorithm(), "Agent key rejected"),
            Err(e) => warn!(error = %e, "Agent signing failed"),
        }
    }
    Ok(false)
}

async fn authenticate_interactive(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    interactions: &[KeyboardInteraction],
) -> Result<bool, SshError> {
    let mut response = handle
        .authenticate_keyboard_interactive_start(user, None::<String>)
        .await?;

    for _ in 0..MAX_INTERACTIVE_ROUNDS {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                let questions: Vec<&str> = prompts.iter().map(|p| p.prompt.as_str()).collect();
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default();
                let Some(answers) = interactive::answer_prompts(interactions, &questions, now)?
                else {
                    warn!(prompts = ?questions, "No configured answer for prompt");
                    return Ok(false);
                };
                debug!(count = answers.len(), "Answering keyboard-interactive round");
                response = handle
                    .authenticate_keyboard_interactive_respond(answers)
                    .await?;
            }
        }
    }
    warn!("Too many keyboard-interactive rounds");
    Ok(false)
}

/// Signs authentication challenges through the agent so private keys
/// never leave it.
struct AgentSigner<'a> {
    agent: &'a mut AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>,
}

impl Signer for AgentSigner<'_> {
    type Error = AgentAuthError;

    fn auth_publickey_sign(
        &mut self,
        key: &ssh_key::PublicKey,
        hash_alg: Option<ssh_key::HashAlg>,
        to_sign: CryptoVec,
    ) -> impl Future<Output = Result<CryptoVec, Self::Error>> + Send {
        let key = key.clone();
        async move {
            self.agent
                .sign_request(&key, hash_alg, to_sign)
                .await
                .map_err(Into::into)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new("example.com", "deploy")
    }

    #[test]
    fn test_bare_node_with_agent_and_default_key() {
        let default = PathBuf::from("/home/u/.ssh/id_rsa");
        let steps = plan(&node(), true, Some(default.clone()));
        assert_eq!(
            steps,
            vec![
                AuthStep::Agent,
                AuthStep::Key {
                    path: default,
                    passphrase: None
                }
            ]
        );
    }

    #[test]
    fn test_full_chain_order() {
        let mut node = node();
        node.key_path = "/keys/deploy".to_string();
        node.passphrase = "secret".to_string();
        node.password = "hunter2".to_string();

        let steps = plan(&node, true, Some(PathBuf::from("/home/u/.ssh/id_rsa")));
        let labels: Vec<_> = steps.iter().map(AuthStep::label).collect();
        assert_eq!(labels, vec!["publickey", "agent", "publickey", "password"]);
        assert_eq!(
            steps[0],
            AuthStep::Key {
                path: PathBuf::from("/keys/deploy"),
                passphrase: Some("secret".to_string())
            }
        );
    }

    #[test]
    fn test_explicit_default_key_not_repeated() {
        let mut node = node();
        node.key_path = "/home/u/.ssh/id_rsa".to_string();
        let steps = plan(&node, false, Some(PathBuf::from("/home/u/.ssh/id_rsa")));
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn test_keyboard_interactive_comes_last() {
        let mut node = node();
        node.password = "hunter2".to_string();
        node.keyboard_interactions.push(KeyboardInteraction {
            question: "code".to_string(),
            answer: "123456".to_string(),
            google_auth: false,
        });

        let steps = plan(&node, true, None);
        let labels: Vec<_> = steps.iter().map(AuthStep::label).collect();
        assert_eq!(labels, vec!["agent", "password", "keyboard-interactive"]);
        assert!(!format!("{:?}", steps[2]).contains("123456"));
    }

    #[test]
    fn test_nothing_available_gives_empty_plan() {
        assert!(plan(&node(), false, None).is_empty());
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let rendered = format!("{:?}", AuthStep::Password("hunter2".to_string()));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_resolve_home() {
        assert_eq!(resolve_home("/etc/key"), PathBuf::from("/etc/key"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(resolve_home("~/.ssh/k"), home.join(".ssh/k"));
        }
    }
}
