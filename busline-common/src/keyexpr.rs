//! Key expressions for busline data.
//!
//! Metric names are dot-separated (`room.E4.power`); on the bus every dot
//! becomes a key level, so a subscriber can select `busline/modbus/room/**`.

/// Default key expression prefix for all busline data.
pub const KEY_PREFIX: &str = "busline";

/// Builder for keys under a source's prefix.
///
/// Keys follow the pattern `<prefix>/<metric levels>`, with control data
/// under the reserved `@` level.
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
}

impl KeyExprBuilder {
    /// Create a builder with a custom prefix (e.g. `busline/modbus`).
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// The prefix this builder appends to.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key expression for a dotted metric name.
    ///
    /// # Example
    /// ```
    /// use busline_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::with_prefix("busline/modbus");
    /// assert_eq!(builder.metric("room.E4.power"), "busline/modbus/room/E4/power");
    /// ```
    pub fn metric(&self, metric: &str) -> String {
        format!("{}/{}", self.prefix, metric_key_suffix(metric))
    }

    /// Wildcard matching every metric under this prefix.
    ///
    /// # Example
    /// ```
    /// use busline_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::with_prefix("busline/modbus");
    /// assert_eq!(builder.wildcard(), "busline/modbus/**");
    /// ```
    pub fn wildcard(&self) -> String {
        format!("{}/**", self.prefix)
    }

    /// Key expression for source status.
    ///
    /// # Example
    /// ```
    /// use busline_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::with_prefix("busline/modbus");
    /// assert_eq!(builder.status_key(), "busline/modbus/@/status");
    /// ```
    pub fn status_key(&self) -> String {
        format!("{}/@/status", self.prefix)
    }
}

/// Convert a dotted metric name into a key suffix.
pub fn metric_key_suffix(metric: &str) -> String {
    metric
        .split('.')
        .filter(|level| !level.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Recover the dotted metric name from a full key under `prefix`.
///
/// Returns `None` for keys outside the prefix and for control keys (`@`).
pub fn metric_from_key(prefix: &str, key: &str) -> Option<String> {
    let prefix = prefix.trim_end_matches('/');
    let rest = key.strip_prefix(prefix)?.strip_prefix('/')?;

    if rest.is_empty() || rest.split('/').any(|level| level == "@" || level.is_empty()) {
        return None;
    }

    Some(rest.replace('/', "."))
}
