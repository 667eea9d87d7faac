pub mod pending_queue;
pub mod ring_buffer;

pub use pending_queue::*;
pub use ring_buffer::*;
