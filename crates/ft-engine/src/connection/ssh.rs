//! SSH transport
//!
//! Opens one authenticated russh session per pooled connection and runs
//! each command on a fresh exec channel.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::{cipher, kex, mac, ChannelMsg, Disconnect, Preferred};
use russh_keys::key::{self, PublicKey};

use ft_core::config::SshConfig;
use ft_core::traits::{Connector, ExecOutput, RemoteChannel};
use ft_core::types::{Credential, HostTarget};
use ft_core::{HostId, TransportError};

/// Byte sent as a best-effort interrupt
const INTERRUPT: &str = "\u{3}";

/// Exit code reported when the remote side sends no exit status
const UNKNOWN_EXIT_CODE: i32 = 255;

/// Connects to hosts over SSH
pub struct SshConnector {
    config: Arc<Config>,
}

impl SshConnector {
    /// Create a connector from the transport settings
    pub fn new(ssh: &SshConfig) -> Self {
        let config = Config {
            keepalive_interval: Some(ssh.keepalive_interval),
            keepalive_max: ssh.keepalive_max,
            preferred: Self::preferred(),
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }

    /// Algorithms acceptable to the security policy, strongest first
    fn preferred() -> Preferred {
        Preferred {
            kex: Cow::Borrowed(&[
                kex::CURVE25519,
                kex::CURVE25519_PRE_RFC_8731,
                kex::DH_G14_SHA256,
            ]),
            key: Cow::Borrowed(&[key::ED25519, key::RSA_SHA2_512, key::RSA_SHA2_256]),
            cipher: Cow::Borrowed(&[
                cipher::CHACHA20_POLY1305,
                cipher::AES_256_GCM,
                cipher::AES_256_CTR,
                cipher::AES_128_CTR,
            ]),
            mac: Cow::Borrowed(&[
                mac::HMAC_SHA512_ETM,
                mac::HMAC_SHA256_ETM,
                mac::HMAC_SHA512,
                mac::HMAC_SHA256,
            ]),
            ..Preferred::default()
        }
    }

    async fn handshake(&self, target: &HostTarget) -> Result<SshChannel, TransportError> {
        let handler = HostKeyCheck {
            host_id: target.id.clone(),
            pinned: target.host_key.clone(),
        };

        tracing::debug!("Connecting to {}:{}", target.address, target.port);
        let mut handle = client::connect(
            Arc::clone(&self.config),
            (target.address.as_str(), target.port),
            handler,
        )
        .await
        .map_err(|e| match e {
            russh::Error::UnknownKey => TransportError::HostKeyRejected(format!(
                "host key of {} does not match the pinned fingerprint",
                target.id
            )),
            other => TransportError::Handshake(format!(
                "{}:{}: {}",
                target.address, target.port, other
            )),
        })?;

        tracing::debug!("Authenticating to {} as '{}'", target.id, target.username);
        let authenticated = match &target.credential {
            Credential::Password(password) => handle
                .authenticate_password(&target.username, password)
                .await
                .map_err(|e| TransportError::Handshake(format!("authentication error: {}", e)))?,
            Credential::PrivateKey { pem, passphrase } => {
                let key_pair = russh_keys::decode_secret_key(pem, passphrase.as_deref())
                    .map_err(|e| TransportError::InvalidCredential(e.to_string()))?;
                handle
                    .authenticate_publickey(&target.username, Arc::new(key_pair))
                    .await
                    .map_err(|e| {
                        TransportError::Handshake(format!("authentication error: {}", e))
                    })?
            }
        };

        if !authenticated {
            return Err(TransportError::AuthenticationFailed);
        }

        Ok(SshChannel {
            host_id: target.id.clone(),
            handle,
        })
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        target: &HostTarget,
        timeout: Duration,
    ) -> Result<Arc<dyn RemoteChannel>, TransportError> {
        let channel = tokio::time::timeout(timeout, self.handshake(target))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        Ok(Arc::new(channel))
    }
}

/// An authenticated SSH session
struct SshChannel {
    host_id: HostId,
    handle: Handle<HostKeyCheck>,
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn exec(&self, command: &str) -> Result<ExecOutput, TransportError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| TransportError::Channel(format!("failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| TransportError::Channel(format!("failed to execute command: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status as i32),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    tracing::debug!("Command on {} killed by {:?}", self.host_id, signal_name);
                    if exit_code.is_none() {
                        exit_code = Some(UNKNOWN_EXIT_CODE);
                    }
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: exit_code.unwrap_or(UNKNOWN_EXIT_CODE),
        })
    }

    async fn send_interrupt(&self) -> Result<(), TransportError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| TransportError::Channel(format!("failed to open channel: {}", e)))?;
        channel
            .exec(false, INTERRUPT)
            .await
            .map_err(|e| TransportError::Channel(format!("failed to send interrupt: {}", e)))?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn close(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "session closed", "en")
            .await
        {
            tracing::debug!("Disconnect from {} failed: {}", self.host_id, e);
        }
    }
}

/// Host key verification against an optional pinned fingerprint
struct HostKeyCheck {
    host_id: HostId,
    pinned: Option<String>,
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();

        match &self.pinned {
            Some(expected) if normalize_fingerprint(expected) != fingerprint => {
                tracing::warn!(
                    "Host key of {} differs from pinned: expected {}, got SHA256:{}",
                    self.host_id,
                    expected,
                    fingerprint
                );
                Ok(false)
            }
            Some(_) => {
                tracing::debug!("Host key of {} verified", self.host_id);
                Ok(true)
            }
            None => {
                tracing::debug!("Host key of {}: SHA256:{}", self.host_id, fingerprint);
                Ok(true)
            }
        }
    }
}

/// Strip the optional `SHA256:` prefix of a pinned fingerprint
fn normalize_fingerprint(pinned: &str) -> &str {
    pinned.trim().strip_prefix("SHA256:").unwrap_or(pinned.trim())
}
