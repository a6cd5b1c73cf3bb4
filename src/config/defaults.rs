//! Default values for configuration fields.
//!
//! These functions are used by serde for default deserialization.

// ============================================================================
// Common Defaults
// ============================================================================

pub fn r#true() -> bool {
    true
}

pub fn r#false() -> bool {
    false
}

// ============================================================================
// [backend] Section Defaults
// ============================================================================

pub mod backend {
    pub fn url() -> String {
        "http://localhost:3000".into()
    }

    pub fn timeout() -> u64 {
        10
    }

    pub fn cache_ttl() -> u64 {
        60
    }
}

// ============================================================================
// [render] Section Defaults
// ============================================================================

pub mod render {
    use std::path::PathBuf;

    pub fn exclude() -> Vec<PathBuf> {
        vec![".codebook/tasks".into()]
    }
}

// ============================================================================
// [exec] Section Defaults
// ============================================================================

pub mod exec {
    use std::collections::BTreeMap;

    pub fn timeout() -> u64 {
        30
    }

    pub fn languages() -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([("python".into(), vec!["python3".into(), "-".into()])])
    }
}

// ============================================================================
// [explore] Section Defaults
// ============================================================================

pub mod explore {
    pub fn url() -> String {
        "http://localhost:9999".into()
    }

    pub fn timeout() -> u64 {
        30
    }
}

// ============================================================================
// [watch] Section Defaults
// ============================================================================

pub mod watch {
    pub fn debounce_ms() -> u64 {
        500
    }

    pub fn cooldown_ms() -> u64 {
        2000
    }

    pub fn queue_capacity() -> usize {
        1024
    }
}
