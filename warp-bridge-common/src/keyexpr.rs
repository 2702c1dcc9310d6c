use crate::error::{Error, Result};

/// Default key expression prefix for the charger bridge.
pub const KEY_PREFIX: &str = "warp/evcharger";

/// Builder for the key expressions a bridge instance publishes under.
///
/// Property paths use the bus convention of a leading slash
/// (`/Ac/L1/Power`); key expressions never do
/// (`warp/evcharger/http_40/Ac/L1/Power`).
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
}

impl KeyExprBuilder {
    /// Create a builder for the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// The prefix all keys are built under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key expression a property is published on.
    ///
    /// # Example
    /// ```
    /// use warp_bridge_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::new("warp/evcharger/http_40");
    /// let key = builder.property_key("/Ac/L1/Power").unwrap();
    /// assert_eq!(key, "warp/evcharger/http_40/Ac/L1/Power");
    /// ```
    pub fn property_key(&self, path: &str) -> Result<String> {
        let suffix = path_suffix(path)?;
        Ok(format!("{}/{}", self.prefix, suffix))
    }

    /// Key expression external writers put new values on.
    ///
    /// # Example
    /// ```
    /// use warp_bridge_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::new("warp/evcharger/http_40");
    /// let key = builder.write_key("/SetCurrent").unwrap();
    /// assert_eq!(key, "warp/evcharger/http_40/@/write/SetCurrent");
    /// ```
    pub fn write_key(&self, path: &str) -> Result<String> {
        let suffix = path_suffix(path)?;
        Ok(format!("{}/@/write/{}", self.prefix, suffix))
    }

    /// Wildcard matching every write key of this bridge.
    pub fn write_wildcard(&self) -> String {
        format!("{}/@/write/**", self.prefix)
    }

    /// Wildcard matching every published property of this bridge.
    pub fn property_wildcard(&self) -> String {
        format!("{}/**", self.prefix)
    }

    /// Key for bridge status messages.
    pub fn status_key(&self) -> String {
        format!("{}/@/status", self.prefix)
    }

    /// Key for the bridge liveliness token.
    pub fn alive_key(&self) -> String {
        format!("{}/@/alive", self.prefix)
    }

    /// Recover the property path from a write key.
    ///
    /// Returns `None` for keys outside this bridge's write namespace.
    pub fn parse_write_key(&self, key: &str) -> Option<String> {
        let rest = key.strip_prefix(&self.prefix)?.strip_prefix("/@/write/")?;
        if rest.is_empty() {
            return None;
        }
        Some(format!("/{}", rest))
    }

    /// Recover the property path from a published property key.
    ///
    /// Administrative keys (containing an `@` chunk) are not properties.
    pub fn parse_property_key(&self, key: &str) -> Option<String> {
        let rest = key.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        if rest.is_empty() || rest.split('/').any(|chunk| chunk == "@") {
            return None;
        }
        Some(format!("/{}", rest))
    }
}

/// Validate a property path and return it without the leading slash.
pub fn path_suffix(path: &str) -> Result<&str> {
    let suffix = path
        .strip_prefix('/')
        .ok_or_else(|| Error::PropertyPath(format!("'{}' must start with '/'", path)))?;

    if suffix.is_empty() || suffix.split('/').any(|chunk| chunk.is_empty()) {
        return Err(Error::PropertyPath(format!(
            "'{}' contains an empty segment",
            path
        )));
    }

    if suffix
        .chars()
        .any(|c| matches!(c, '*' | '$' | '?' | '#' | '@'))
    {
        return Err(Error::PropertyPath(format!(
            "'{}' contains a reserved character",
            path
        )));
    }

    Ok(suffix)
}
