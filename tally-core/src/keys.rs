//! Key naming for counters, call histories and cached pages.
//!
//! Every key TALLY writes is derived here so the writer and the reader of a
//! key can never disagree on its spelling.

use std::fmt;

/// Qualified name of an instrumented operation, e.g. `Cache.store`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationName(String);

impl OperationName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name of a method on a type: `Owner.method`.
    pub fn method(owner: &str, method: &str) -> Self {
        Self(format!("{}.{}", owner, method))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the call counter.
    pub fn counter_key(&self) -> String {
        self.0.clone()
    }

    /// Key of the list holding rendered argument tuples.
    pub fn inputs_key(&self) -> String {
        format!("{}:inputs", self.0)
    }

    /// Key of the list holding rendered results.
    pub fn outputs_key(&self) -> String {
        format!("{}:outputs", self.0)
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Key of a cached page body.
pub fn page_cache_key(url: &str) -> String {
    format!("cache:{}", url)
}

/// Key of a page's access counter.
pub fn page_count_key(url: &str) -> String {
    format!("count:{}", url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_keys() {
        let name = OperationName::method("Cache", "store");
        assert_eq!(name.as_str(), "Cache.store");
        assert_eq!(name.counter_key(), "Cache.store");
        assert_eq!(name.inputs_key(), "Cache.store:inputs");
        assert_eq!(name.outputs_key(), "Cache.store:outputs");
        assert_eq!(name.to_string(), "Cache.store");
    }

    #[test]
    fn test_page_keys() {
        assert_eq!(page_cache_key("http://a.b/"), "cache:http://a.b/");
        assert_eq!(page_count_key("http://a.b/"), "count:http://a.b/");
    }
}
