//! Auth collaborator contract.
//!
//! The hub consults this port on every WebSocket upgrade. Login UI,
//! session cookies, and rate limiting all live behind the implementation;
//! the core only sees token-in, verdict-out.

use async_trait::async_trait;

/// Which identity namespace a token belongs to. Browser and tool-pipe
/// tokens may be disjoint sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAudience {
    Browser,
    ToolPipe,
}

impl std::fmt::Display for TokenAudience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Browser => f.write_str("browser"),
            Self::ToolPipe => f.write_str("tool-pipe"),
        }
    }
}

/// Verdict for one presented token.
#[derive(Debug, Clone)]
pub struct TokenValidation {
    pub valid: bool,
    /// Who the token belongs to, when known.
    pub subject: Option<String>,
    /// Why validation failed, for the close frame and the log.
    pub reason: Option<String>,
}

impl TokenValidation {
    #[must_use]
    pub fn ok(subject: Option<String>) -> Self {
        Self {
            valid: true,
            subject,
            reason: None,
        }
    }

    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            subject: None,
            reason: Some(reason.into()),
        }
    }
}

/// Pluggable token validation.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate `token` against `audience`. A missing token is passed as
    /// `None` and is the implementation's call to accept or reject.
    async fn validate_token(
        &self,
        token: Option<&str>,
        audience: TokenAudience,
    ) -> TokenValidation;
}
