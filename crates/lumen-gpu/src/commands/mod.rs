//! Command pools, command buffers, barriers and debug labels.

pub mod barrier;
pub mod buffer;
pub mod debug_label;
pub mod pool;

pub use barrier::{access_masks_for_layout_transition, full_memory_barrier, layout_transition_barrier};
pub use buffer::CommandBuffer;
pub use debug_label::DebugLabelColor;
pub use pool::CommandPool;
