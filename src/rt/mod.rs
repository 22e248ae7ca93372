//! Runtime primitives: the OS-thread pool carrying all node work, the bounded
//! lock-free queue between producers and node pumps, and the ordered shutdown
//! coordinator.

pub mod queue;
pub mod shutdown;
pub mod thread_pool;

pub use queue::BoundedQueue;
pub use shutdown::ShutdownCoordinator;
pub use thread_pool::ThreadPool;
