mod compact_id;
mod compute;
mod graphics;

pub use compute::VulkanComputePipeline;
pub use graphics::VulkanGraphicsPipeline;
