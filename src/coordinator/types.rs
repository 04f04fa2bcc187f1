//! Public types for the engine facade.

use serde::Serialize;

/// Snapshot of one cached entry, for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct CacheItemInfo {
    /// Namespaced logical key (e.g. "realtime:Gangnam")
    pub key: String,
    /// Serialized envelope size in bytes
    pub size_bytes: usize,
    /// When the entry was written (epoch millis)
    pub stored_at: i64,
    /// When the entry expires (epoch millis)
    pub expires_at: i64,
}

/// Cache contents overview returned by
/// [`super::TransitEngine::cache_info`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub total_items: usize,
    /// Sum of serialized envelope sizes in bytes
    pub total_size: usize,
    /// Per-entry details, least-recently-used first
    pub items: Vec<CacheItemInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_info_serializes() {
        let info = CacheInfo {
            total_items: 1,
            total_size: 64,
            items: vec![CacheItemInfo {
                key: "realtime:Gangnam".to_string(),
                size_bytes: 64,
                stored_at: 1_000,
                expires_at: 31_000,
            }],
        };

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("realtime:Gangnam"));
        assert!(json.contains("\"total_items\":1"));
    }
}
