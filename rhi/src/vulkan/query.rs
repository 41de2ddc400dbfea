//! Vulkan query pool: timestamp and occlusion queries share one
//! `VkQueryPool` of type `TIMESTAMP`, matching how `dispatcher.rs`'s
//! `DispatchBackend` exposes a single `QueryPool` trait for both.

use crate::command_buffer::QueryPool;
use crate::resource::{next_resource_id, Resource, ResourceId};
use crate::{RhiError, RhiResult};
use ash::vk;
use std::sync::Arc;

pub struct VulkanQueryPool {
    pub device: Arc<ash::Device>,
    pub pool: vk::QueryPool,
    pub count: u32,
    id: ResourceId,
}

impl VulkanQueryPool {
    pub fn new(device: Arc<ash::Device>, count: u32) -> RhiResult<Self> {
        let create_info = vk::QueryPoolCreateInfo::default().query_type(vk::QueryType::TIMESTAMP).query_count(count);
        let pool = unsafe { device.create_query_pool(&create_info, None).map_err(RhiError::from)? };
        Ok(Self { device, pool, count, id: next_resource_id() })
    }
}

impl Drop for VulkanQueryPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_query_pool(self.pool, None) };
    }
}

impl std::fmt::Debug for VulkanQueryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanQueryPool").field("count", &self.count).finish()
    }
}

impl Resource for VulkanQueryPool {
    fn id(&self) -> ResourceId {
        self.id
    }
}

impl QueryPool for VulkanQueryPool {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
