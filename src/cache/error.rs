use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache miss for key `{key}`")]
    Miss { key: String },
    #[error("cache is disabled")]
    Disabled,
    #[error("failed to serialize cache value for key `{key}`")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to deserialize cache value for key `{key}`")]
    Deserialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache {operation} failed for key `{key}`: {message}")]
    Backend {
        operation: &'static str,
        key: String,
        message: String,
    },
}

impl CacheError {
    pub fn miss(key: impl Into<String>) -> Self {
        Self::Miss { key: key.into() }
    }

    pub fn backend(
        operation: &'static str,
        key: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::Backend {
            operation,
            key: key.into(),
            message: err.to_string(),
        }
    }

    /// Expected absence, as opposed to an operational failure.
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss { .. } | Self::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_and_disabled_are_misses() {
        assert!(CacheError::miss("faq:1").is_miss());
        assert!(CacheError::Disabled.is_miss());
        assert!(!CacheError::backend("get", "faq:1", "connection reset").is_miss());
    }

    #[test]
    fn backend_error_names_operation_and_key() {
        let err = CacheError::backend("set", "faq:1", "connection reset");
        assert_eq!(
            err.to_string(),
            "cache set failed for key `faq:1`: connection reset"
        );
    }
}
