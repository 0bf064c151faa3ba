//! Input validation at the request boundary
//!
//! Every request touching per-user state is rejected before any I/O unless
//! its identifiers match a strict safe-character pattern.

use anyhow::{anyhow, Result};

pub const MAX_USER_ID_LENGTH: usize = 128;
pub const MIN_IDEMPOTENCY_KEY_LENGTH: usize = 8;
pub const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 256;
pub const MAX_CONTENT_LENGTH: usize = 8000;
pub const MAX_QUERY_LENGTH: usize = 2000;
pub const MAX_TOP_K: usize = 12;
pub const MIN_RECALL_TIMEOUT_MS: u32 = 100;
pub const MAX_RECALL_TIMEOUT_MS: u32 = 3000;
pub const MAX_ENTITIES_PER_ATOM: usize = 50;

/// Validate user_id (also used for tenant_id and agent_id)
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(anyhow!("user_id cannot be empty"));
    }

    if user_id.len() > MAX_USER_ID_LENGTH {
        return Err(anyhow!(
            "user_id too long: {} chars (max: {})",
            user_id.len(),
            MAX_USER_ID_LENGTH
        ));
    }

    // Only allow alphanumeric, dash, underscore, at, dot
    if !user_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '@' || c == '.')
    {
        return Err(anyhow!(
            "user_id contains invalid characters (allowed: alphanumeric, -, _, @, .)"
        ));
    }

    Ok(())
}

/// Validate a caller-supplied idempotency key
pub fn validate_idempotency_key(key: &str) -> Result<()> {
    if key.len() < MIN_IDEMPOTENCY_KEY_LENGTH || key.len() > MAX_IDEMPOTENCY_KEY_LENGTH {
        return Err(anyhow!(
            "idempotency_key must be {}-{} chars, got {}",
            MIN_IDEMPOTENCY_KEY_LENGTH,
            MAX_IDEMPOTENCY_KEY_LENGTH,
            key.len()
        ));
    }

    if key.chars().any(|c| c.is_control()) {
        return Err(anyhow!("idempotency_key contains control characters"));
    }

    Ok(())
}

/// Validate memory_id (UUID format)
pub fn validate_memory_id(memory_id: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(memory_id)
        .map_err(|e| anyhow!("Invalid memory_id UUID format: {e}"))
}

/// Validate ingested content
pub fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(anyhow!("content_raw cannot be empty"));
    }

    if content.len() > MAX_CONTENT_LENGTH {
        return Err(anyhow!(
            "content_raw too long: {} chars (max: {})",
            content.len(),
            MAX_CONTENT_LENGTH
        ));
    }

    Ok(())
}

/// Validate a recall query string
pub fn validate_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(anyhow!("query cannot be empty"));
    }

    if query.len() > MAX_QUERY_LENGTH {
        return Err(anyhow!(
            "query too long: {} chars (max: {})",
            query.len(),
            MAX_QUERY_LENGTH
        ));
    }

    Ok(())
}

/// Validate recall top_k
pub fn validate_top_k(top_k: usize) -> Result<()> {
    if top_k == 0 || top_k > MAX_TOP_K {
        return Err(anyhow!("top_k must be 1-{}, got {}", MAX_TOP_K, top_k));
    }
    Ok(())
}

/// Validate a caller-supplied recall timeout
pub fn validate_recall_timeout(timeout_ms: u32) -> Result<()> {
    if !(MIN_RECALL_TIMEOUT_MS..=MAX_RECALL_TIMEOUT_MS).contains(&timeout_ms) {
        return Err(anyhow!(
            "timeout_ms must be {}-{}, got {}",
            MIN_RECALL_TIMEOUT_MS,
            MAX_RECALL_TIMEOUT_MS,
            timeout_ms
        ));
    }
    Ok(())
}

/// Validate entity list attached to an ingest request
pub fn validate_entities(entities: &[String]) -> Result<()> {
    if entities.len() > MAX_ENTITIES_PER_ATOM {
        return Err(anyhow!(
            "too many entities: {} (max: {})",
            entities.len(),
            MAX_ENTITIES_PER_ATOM
        ));
    }

    for entity in entities {
        if entity.is_empty() || entity.len() > 256 {
            return Err(anyhow!("entity name must be 1-256 chars"));
        }
        if entity.chars().any(|c| c.is_control()) {
            return Err(anyhow!("entity name contains control characters"));
        }
    }

    Ok(())
}

/// Clamp a unit-interval score, rejecting non-finite values
pub fn clamp_unit(value: f32, field: &str) -> Result<f32> {
    if !value.is_finite() {
        return Err(anyhow!("{field} must be a finite number"));
    }
    Ok(value.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_user_id() {
        assert!(validate_user_id("alice").is_ok());
        assert!(validate_user_id("user-123").is_ok());
        assert!(validate_user_id("agent@example.com").is_ok());
    }

    #[test]
    fn test_invalid_user_id() {
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("user/123").is_err());
        assert!(validate_user_id("u id").is_err());
        assert!(validate_user_id(&"a".repeat(200)).is_err());
    }

    #[test]
    fn test_idempotency_key_bounds() {
        assert!(validate_idempotency_key("turn_abc1").is_ok());
        assert!(validate_idempotency_key("short").is_err()); // < 8 chars
        assert!(validate_idempotency_key(&"k".repeat(257)).is_err());
        assert!(validate_idempotency_key("key\x00with_null").is_err());
    }

    #[test]
    fn test_content_bounds() {
        assert!(validate_content("I got the job offer!").is_ok());
        assert!(validate_content("   ").is_err());
        assert!(validate_content(&"x".repeat(8001)).is_err());
    }

    #[test]
    fn test_query_bounds() {
        assert!(validate_query("what do I like?").is_ok());
        assert!(validate_query("").is_err());
        assert!(validate_query(&"q".repeat(2001)).is_err());
    }

    #[test]
    fn test_top_k_and_timeout() {
        assert!(validate_top_k(1).is_ok());
        assert!(validate_top_k(12).is_ok());
        assert!(validate_top_k(0).is_err());
        assert!(validate_top_k(13).is_err());
        assert!(validate_recall_timeout(100).is_ok());
        assert!(validate_recall_timeout(3000).is_ok());
        assert!(validate_recall_timeout(99).is_err());
        assert!(validate_recall_timeout(3001).is_err());
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(1.5, "confidence").unwrap(), 1.0);
        assert_eq!(clamp_unit(-0.2, "confidence").unwrap(), 0.0);
        assert!(clamp_unit(f32::NAN, "confidence").is_err());
    }
}
