use std::sync::{PoisonError, RwLock};

/// Supplies the bearer token the connection authenticates with.
///
/// Issuing and renewing tokens happens elsewhere; the connection only asks for the current one
/// each time it connects.
pub trait TokenSource: Send + Sync {
    fn auth_token(&self) -> Option<String>;
}

/// A token fixed at construction
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenSource for StaticToken {
    fn auth_token(&self) -> Option<String> {
        Some(self.0.clone()).filter(|token| !token.is_empty())
    }
}

/// A token slot that login code fills in (and clears on logout)
#[derive(Debug, Default)]
pub struct TokenCell {
    token: RwLock<Option<String>>,
}

impl TokenCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }
}

impl TokenSource for TokenCell {
    fn auth_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|token| !token.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tokens_read_as_missing() {
        assert_eq!(StaticToken::new("").auth_token(), None);
        assert_eq!(StaticToken::new("abc").auth_token().as_deref(), Some("abc"));
    }

    #[test]
    fn test_token_cell_can_be_filled_later() {
        let cell = TokenCell::new();
        assert_eq!(cell.auth_token(), None);
        cell.set(Some("fresh".into()));
        assert_eq!(cell.auth_token().as_deref(), Some("fresh"));
        cell.set(None);
        assert_eq!(cell.auth_token(), None);
    }
}
