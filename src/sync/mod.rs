pub mod spinlock;

pub use spinlock::{SpinMutex, SpinMutexGuard};
