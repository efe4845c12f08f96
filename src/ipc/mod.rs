//! System V–style message queues and keyed shared memory (spec.md §4.4,
//! §4.5), the two "leaf" IPC subsystems built on top of the task table and
//! the sleep/wakeup rendezvous.

pub mod mq;
pub mod shm;
