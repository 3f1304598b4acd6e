//! Per-block metadata cache.
//!
//! Holds `{gas_used, tx_count}` for blocks the input generator has fetched,
//! so notifications can decorate their payloads later. Process-lifetime only;
//! a lookup miss renders as `"unknown"`, never an error.

use std::{fmt, num::NonZeroUsize, sync::Arc};

use lru::LruCache;
use tokio::sync::Mutex;

/// Oldest entries are evicted beyond this; notifications only care about
/// recent blocks.
const CACHE_CAPACITY: usize = 4096;

/// Gas and transaction count of a fetched block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    pub gas_used: u64,
    pub tx_count: u32,
}

impl fmt::Display for BlockMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gas: {}, txs: {}", self.gas_used, self.tx_count)
    }
}

/// Shared handle to the metadata cache.
#[derive(Clone)]
pub struct BlockMetadataCache {
    cache: Arc<Mutex<LruCache<u64, BlockMeta>>>,
}

impl Default for BlockMetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockMetadataCache {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero"),
            ))),
        }
    }

    /// Parse `gasUsed` (hex string) and the `transactions` array length out
    /// of a block JSON document and store them.
    ///
    /// Returns the parsed metadata, or `None` when the document is missing
    /// either field.
    pub async fn insert_from_block_json(
        &self,
        block: u64,
        block_json: &serde_json::Value,
    ) -> Option<BlockMeta> {
        let gas_used = block_json
            .get("gasUsed")
            .and_then(|v| v.as_str())
            .and_then(parse_hex_u64)?;
        let tx_count = block_json
            .get("transactions")
            .and_then(|v| v.as_array())
            .map(|txs| txs.len() as u32)?;

        let meta = BlockMeta { gas_used, tx_count };
        self.cache.lock().await.put(block, meta);
        Some(meta)
    }

    pub async fn get(&self, block: u64) -> Option<BlockMeta> {
        self.cache.lock().await.get(&block).copied()
    }

    /// Formatted gas value for notification fields; `"unknown"` on a miss.
    pub async fn gas_used_display(&self, block: u64) -> String {
        match self.get(block).await {
            Some(meta) => meta.gas_used.to_string(),
            None => "unknown".to_string(),
        }
    }

    /// Formatted transaction count for notification fields; `"unknown"` on a
    /// miss.
    pub async fn tx_count_display(&self, block: u64) -> String {
        match self.get(block).await {
            Some(meta) => meta.tx_count.to_string(),
            None => "unknown".to_string(),
        }
    }
}

/// Parse a `0x`-prefixed (or bare) hex quantity.
pub fn parse_hex_u64(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn parses_gas_and_tx_count() {
        let cache = BlockMetadataCache::new();
        let block = json!({
            "gasUsed": "0x1c9c380",
            "transactions": [{}, {}, {}],
        });

        let meta = cache.insert_from_block_json(21_500_100, &block).await.unwrap();
        assert_eq!(meta.gas_used, 30_000_000);
        assert_eq!(meta.tx_count, 3);
        assert_eq!(cache.get(21_500_100).await, Some(meta));
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let cache = BlockMetadataCache::new();
        assert!(cache
            .insert_from_block_json(1, &json!({"transactions": []}))
            .await
            .is_none());
        assert!(cache
            .insert_from_block_json(2, &json!({"gasUsed": "0x1"}))
            .await
            .is_none());
        assert!(cache
            .insert_from_block_json(3, &json!({"gasUsed": "zz", "transactions": []}))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn miss_formats_as_unknown() {
        let cache = BlockMetadataCache::new();
        assert_eq!(cache.gas_used_display(99).await, "unknown");
        assert_eq!(cache.tx_count_display(99).await, "unknown");
    }
}
