//! Worker/dashboard events and error modeling for the console controller.

use client_core::{BackendError, ClientError, ClientEvent, Phase, PhaseKey, Snapshot};
use shared::{
    domain::{CommandAction, CommandId, GroupId, MasterId},
    error::ErrorCode,
    protocol::{PairingCodeResponse, RowChange, Table},
};

#[derive(Debug, Clone)]
pub enum UiEvent {
    Info(String),
    /// Raw line typed at the dashboard prompt.
    Input(String),
    SignedIn {
        email: Option<String>,
    },
    SignedOut,
    SnapshotLoaded(Snapshot),
    Row(RowChange),
    PhaseChanged {
        key: PhaseKey,
        phase: Phase,
    },
    RealtimeSubscribed(Table),
    RealtimeChannelClosed(Table),
    RealtimeClosed(String),
    CommandQueued {
        master_id: MasterId,
        target_mac: Option<String>,
        action: CommandAction,
        command_id: CommandId,
    },
    GroupDispatched {
        group_id: GroupId,
        action: CommandAction,
        queued: usize,
        failed: usize,
    },
    PairingCode(PairingCodeResponse),
    Error(UiError),
}

impl From<ClientEvent> for UiEvent {
    fn from(event: ClientEvent) -> Self {
        match event {
            ClientEvent::SignedIn { email, .. } => Self::SignedIn { email },
            ClientEvent::SignedOut => Self::SignedOut,
            ClientEvent::RowChanged(change) => Self::Row(change),
            ClientEvent::PhaseChanged { key, phase } => Self::PhaseChanged { key, phase },
            ClientEvent::RealtimeSubscribed { table } => Self::RealtimeSubscribed(table),
            ClientEvent::RealtimeChannelClosed { table } => Self::RealtimeChannelClosed(table),
            ClientEvent::RealtimeClosed { reason } => Self::RealtimeClosed(reason),
            ClientEvent::Error(message) => {
                Self::Error(UiError::from_message(UiErrorContext::Realtime, message))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorCategory {
    Auth,
    Transport,
    Validation,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorContext {
    BackendStartup,
    Login,
    InitialLoad,
    Dispatch,
    Realtime,
    Pairing,
    Input,
    General,
}

impl UiErrorContext {
    pub fn label(self) -> &'static str {
        match self {
            Self::BackendStartup => "startup",
            Self::Login => "sign-in",
            Self::InitialLoad => "load",
            Self::Dispatch => "command",
            Self::Realtime => "realtime",
            Self::Pairing => "pairing",
            Self::Input => "input",
            Self::General => "error",
        }
    }
}

pub fn classify_login_failure(message: &str) -> String {
    let lower = message.to_ascii_lowercase();
    if lower.contains("invalid login credentials") || lower.contains("invalid_grant") {
        "Sign-in rejected; check auth.email and auth.password.".to_string()
    } else if lower.contains("failed to reach")
        || lower.contains("connection refused")
        || lower.contains("dns")
        || lower.contains("timed out")
    {
        "Backend unreachable; check backend.url and network.".to_string()
    } else {
        format!("Sign-in failed: {message}")
    }
}

#[derive(Debug, Clone)]
pub struct UiError {
    category: UiErrorCategory,
    context: UiErrorContext,
    message: String,
    reauth: bool,
}

impl UiError {
    pub fn from_message(context: UiErrorContext, message: impl Into<String>) -> Self {
        let message = message.into();
        let message_lower = message.to_ascii_lowercase();
        let category = if context == UiErrorContext::Input {
            UiErrorCategory::Validation
        } else if message_lower.contains("401")
            || message_lower.contains("403")
            || message_lower.contains("unauthorized")
            || message_lower.contains("forbidden")
            || message_lower.contains("row-level security")
            || message_lower.contains("jwt")
            || message_lower.contains("not signed in")
            || message_lower.contains("session expired")
            || message_lower.contains("invalid login credentials")
        {
            UiErrorCategory::Auth
        } else if message_lower.contains("invalid")
            || message_lower.contains("missing")
            || message_lower.contains("must not be empty")
            || message_lower.contains("required")
            || message_lower.contains("unknown")
        {
            UiErrorCategory::Validation
        } else if message_lower.contains("timeout")
            || message_lower.contains("timed out")
            || message_lower.contains("connect")
            || message_lower.contains("network")
            || message_lower.contains("websocket")
            || message_lower.contains("unavailable")
            || message_lower.contains("failed to reach")
        {
            UiErrorCategory::Transport
        } else {
            UiErrorCategory::Unknown
        };
        let reauth = context == UiErrorContext::Login
            || message_lower.contains("401")
            || message_lower.contains("not signed in")
            || message_lower.contains("session expired")
            || message_lower.contains("jwt expired");

        Self {
            category,
            context,
            message,
            reauth,
        }
    }

    /// Renders an `anyhow` chain as one line. Typed client and backend
    /// errors pick the category; anything else falls back to keywords.
    pub fn from_error(context: UiErrorContext, err: &anyhow::Error) -> Self {
        let mut reauth = None;
        let typed = if let Some(backend) = err.downcast_ref::<BackendError>() {
            let api = backend.api_error();
            reauth = Some(api.requires_reauth());
            match api.code {
                ErrorCode::Unauthorized | ErrorCode::Forbidden => Some(UiErrorCategory::Auth),
                // The token endpoint answers bad credentials with 400.
                ErrorCode::Validation if context == UiErrorContext::Login => {
                    Some(UiErrorCategory::Auth)
                }
                ErrorCode::NotFound | ErrorCode::Conflict | ErrorCode::Validation => {
                    Some(UiErrorCategory::Validation)
                }
                ErrorCode::RateLimited | ErrorCode::Unavailable => Some(UiErrorCategory::Transport),
                ErrorCode::Internal => None,
            }
        } else {
            err.downcast_ref::<ClientError>().map(|client| match client {
                ClientError::NotSignedIn => {
                    reauth = Some(true);
                    UiErrorCategory::Auth
                }
                ClientError::InvalidInput(_) => UiErrorCategory::Validation,
                ClientError::Realtime(_) => UiErrorCategory::Transport,
            })
        };
        let mut ui_error = Self::from_message(context, format!("{err:#}"));
        if let Some(category) = typed {
            ui_error.category = category;
        }
        if let Some(reauth) = reauth {
            ui_error.reauth = reauth || context == UiErrorContext::Login;
        }
        ui_error
    }

    /// True when the session itself is the problem and signing in again
    /// can fix it. A row-level security rejection is an auth error that
    /// does not need a new session.
    pub fn requires_reauth(&self) -> bool {
        self.reauth
    }

    pub fn category(&self) -> UiErrorCategory {
        self.category
    }

    pub fn context(&self) -> UiErrorContext {
        self.context
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for UiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context.label(), self.message)
    }
}
