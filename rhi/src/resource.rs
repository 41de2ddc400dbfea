//! Refcounted GPU resource convention. The original specification models
//! this as an abstract base class with explicit `add_ref`/`release` and
//! self-destruction at zero. In Rust, `Arc` + `Drop` already give the
//! same guarantee (self-destructs when the last strong reference drops,
//! no manual refcount API, no cyclic references since every dependency
//! edge points strictly downstream - a `Pipeline` holds an `Arc<RootSignature>`,
//! never the reverse). `Resource` exists only to name the convention and
//! give every resource kind a stable identity for lookup/debugging.

use std::sync::atomic::{AtomicU64, Ordering};

pub type ResourceId = u64;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-wide unique id. Every concrete resource
/// (`VulkanBuffer`, `VulkanTexture`, ...) calls this once at construction
/// and returns it from `Resource::id`.
pub fn next_resource_id() -> ResourceId {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

pub trait Resource {
    fn id(&self) -> ResourceId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_ids_are_unique_and_increasing() {
        let a = next_resource_id();
        let b = next_resource_id();
        assert!(b > a);
    }
}
