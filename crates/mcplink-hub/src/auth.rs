//! Static-token implementation of the auth collaborator.
//!
//! Each audience has one expected token, read from the environment at
//! bootstrap. An unset token admits everyone on that audience, which keeps
//! local development friction-free; production deployments set both.

use async_trait::async_trait;

use mcplink_core::ports::{TokenAudience, TokenValidation, TokenValidator};

/// Token-equality validator with one expected token per audience.
pub struct StaticTokenValidator {
    browser_token: Option<String>,
    tool_token: Option<String>,
}

impl StaticTokenValidator {
    #[must_use]
    pub fn new(browser_token: Option<String>, tool_token: Option<String>) -> Self {
        Self {
            browser_token,
            tool_token,
        }
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate_token(
        &self,
        token: Option<&str>,
        audience: TokenAudience,
    ) -> TokenValidation {
        let expected = match audience {
            TokenAudience::Browser => self.browser_token.as_deref(),
            TokenAudience::ToolPipe => self.tool_token.as_deref(),
        };
        match expected {
            None => TokenValidation::ok(None),
            Some(expected) if token == Some(expected) => TokenValidation::ok(None),
            Some(_) => TokenValidation::rejected("invalid or missing token"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unset_token_admits_everyone() {
        let validator = StaticTokenValidator::new(None, None);
        assert!(
            validator
                .validate_token(None, TokenAudience::Browser)
                .await
                .valid
        );
        assert!(
            validator
                .validate_token(Some("anything"), TokenAudience::ToolPipe)
                .await
                .valid
        );
    }

    #[tokio::test]
    async fn audiences_are_separate_namespaces() {
        let validator =
            StaticTokenValidator::new(Some("browser-tok".into()), Some("pipe-tok".into()));

        assert!(
            validator
                .validate_token(Some("browser-tok"), TokenAudience::Browser)
                .await
                .valid
        );
        // A browser token is not valid on the tool pipe.
        assert!(
            !validator
                .validate_token(Some("browser-tok"), TokenAudience::ToolPipe)
                .await
                .valid
        );
        assert!(
            !validator
                .validate_token(None, TokenAudience::Browser)
                .await
                .valid
        );
    }
}
