//! Minimal runnable example: creates a Vulkan device, a buffer, a fence,
//! records an empty command buffer, dispatches and submits it, and exits.

use rhi::{BufferDescriptor, BufferMemoryPreference, BufferUsage, CommandBuffer, Device, DeviceCreateParams};

fn main() {
    env_logger::init();

    let device = rhi::create_device(DeviceCreateParams::default()).expect("create_device");

    let _buffer = device
        .create_buffer(&BufferDescriptor { label: Some("minimal"), size: 256, usage: BufferUsage::Structured { stride: 4 }, memory: BufferMemoryPreference::HostVisible })
        .expect("create_buffer");
    let _fence = device.create_fence(false).expect("create_fence");
    let _sem = device.create_semaphore().expect("create_semaphore");

    let command_buffer = CommandBuffer::new();
    device.dispatch(&command_buffer).expect("dispatch");
    device.wait_idle().expect("wait_idle");

    println!("rhi + Vulkan OK");
}
