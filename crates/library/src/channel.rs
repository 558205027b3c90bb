//! Checkpoint message channel.
//!
//! When the host is orchestrated, remote library loads and permission
//! requests travel as JSON messages: requests go out through a streaming
//! progress callback, responses come back through the host event channel
//! and are matched to the awaiting request by id. Both exchanges are
//! bounded by timeouts that resolve to structured failures rather than
//! panics or hung futures.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;

/// Wire messages, tagged by the `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelMessage {
    #[serde(rename = "require_request")]
    RequireRequest {
        #[serde(rename = "libraryName")]
        library_name: String,
        #[serde(rename = "requireId")]
        require_id: String,
        timestamp: u64,
    },
    #[serde(rename = "rexx-require-response")]
    RequireResponse {
        #[serde(rename = "requireId")]
        require_id: String,
        success: bool,
        #[serde(rename = "libraryCode", skip_serializing_if = "Option::is_none")]
        library_code: Option<String>,
        #[serde(rename = "libraryName")]
        library_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "rexx-library-permission-request")]
    PermissionRequest {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "libraryName")]
        library_name: String,
        #[serde(rename = "riskLevel")]
        risk_level: String,
        metadata: serde_json::Value,
    },
    #[serde(rename = "rexx-library-permission-response")]
    PermissionResponse {
        #[serde(rename = "requestId")]
        request_id: String,
        approved: bool,
        #[serde(rename = "libraryName")]
        library_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Result of a remote library request. A timeout is a structured failure
/// with `error = "timeout"`, never an Err.
#[derive(Debug, Clone, PartialEq)]
pub struct RequireReply {
    pub success: bool,
    pub library_code: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermissionReply {
    pub approved: bool,
    pub reason: Option<String>,
}

type Outbound = Box<dyn Fn(&ChannelMessage) + Send + Sync>;

/// Pairs outgoing requests with incoming responses.
pub struct ChannelExchange {
    outbound: Outbound,
    pending_requires: Mutex<HashMap<String, oneshot::Sender<RequireReply>>>,
    pending_permissions: Mutex<HashMap<String, oneshot::Sender<PermissionReply>>>,
    next_id: AtomicU64,
}

impl ChannelExchange {
    /// `outbound` is the streaming progress callback supplied by the host.
    pub fn new(outbound: impl Fn(&ChannelMessage) + Send + Sync + 'static) -> Self {
        Self {
            outbound: Box::new(outbound),
            pending_requires: Mutex::new(HashMap::new()),
            pending_permissions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", prefix, now_millis(), n)
    }

    /// Feed a message received from the host event channel. Requests are
    /// ignored; responses complete the matching awaiting exchange.
    pub fn deliver(&self, message: ChannelMessage) {
        match message {
            ChannelMessage::RequireResponse {
                require_id,
                success,
                library_code,
                error,
                ..
            } => {
                let sender = self
                    .pending_requires
                    .lock()
                    .expect("pending requires lock")
                    .remove(&require_id);
                if let Some(sender) = sender {
                    let _ = sender.send(RequireReply {
                        success,
                        library_code,
                        error,
                    });
                } else {
                    tracing::debug!(%require_id, "response for unknown require exchange");
                }
            }
            ChannelMessage::PermissionResponse {
                request_id,
                approved,
                reason,
                ..
            } => {
                let sender = self
                    .pending_permissions
                    .lock()
                    .expect("pending permissions lock")
                    .remove(&request_id);
                if let Some(sender) = sender {
                    let _ = sender.send(PermissionReply { approved, reason });
                } else {
                    tracing::debug!(%request_id, "response for unknown permission exchange");
                }
            }
            _ => {}
        }
    }

    /// Request library source from the host, waiting at most `timeout`.
    pub async fn request_library(&self, library_name: &str, timeout: Duration) -> RequireReply {
        let require_id = self.fresh_id("require");
        let (tx, rx) = oneshot::channel();
        self.pending_requires
            .lock()
            .expect("pending requires lock")
            .insert(require_id.clone(), tx);

        (self.outbound)(&ChannelMessage::RequireRequest {
            library_name: library_name.to_string(),
            require_id: require_id.clone(),
            timestamp: now_millis(),
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            _ => {
                self.pending_requires
                    .lock()
                    .expect("pending requires lock")
                    .remove(&require_id);
                RequireReply {
                    success: false,
                    library_code: None,
                    error: Some("timeout".to_string()),
                }
            }
        }
    }

    /// Ask the host for approval to load a reference.
    pub async fn request_permission(
        &self,
        library_name: &str,
        risk_level: &str,
        metadata: serde_json::Value,
        timeout: Duration,
    ) -> PermissionReply {
        let request_id = self.fresh_id("perm");
        let (tx, rx) = oneshot::channel();
        self.pending_permissions
            .lock()
            .expect("pending permissions lock")
            .insert(request_id.clone(), tx);

        (self.outbound)(&ChannelMessage::PermissionRequest {
            request_id: request_id.clone(),
            library_name: library_name.to_string(),
            risk_level: risk_level.to_string(),
            metadata,
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            _ => {
                self.pending_permissions
                    .lock()
                    .expect("pending permissions lock")
                    .remove(&request_id);
                PermissionReply {
                    approved: false,
                    reason: Some("timeout".to_string()),
                }
            }
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
