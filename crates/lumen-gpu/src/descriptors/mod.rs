//! Descriptor set layouts, pools, sets and writes.

pub mod builder;
pub mod layout_cache;
pub mod pool_allocator;
pub mod set_allocator;
pub mod update_builder;

pub use builder::{DescriptorBuilder, DescriptorInfo};
pub use layout_cache::{BindingKey, DescriptorSetLayoutCache, LayoutKey, LayoutTable};
pub use pool_allocator::DescriptorPoolAllocator;
pub use set_allocator::DescriptorSetAllocator;
pub use update_builder::DescriptorUpdateBuilder;
