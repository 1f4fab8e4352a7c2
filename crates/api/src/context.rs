/// Scheme and authority the caller used to reach the relay, e.g.
/// `https://relay.example`. Polling URLs are built under it.
///
/// Inserted by the origin middleware for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOrigin {
    base: String,
}

impl RequestOrigin {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.base
    }
}
