//! Task-queue clients.

mod memory;
mod redis_queue;

pub use memory::MemoryTaskQueue;
pub use redis_queue::RedisTaskQueue;

/// Key under which workers report the state of one signature.
pub fn task_state_key(uuid: &irgsh_core::TaskUuid, name: &str) -> String {
    format!("task_state:{}:{}", uuid, name)
}
