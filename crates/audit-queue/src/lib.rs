pub mod circuit_breaker;
pub mod dead_letter;
pub mod envelope;
pub mod processor;
pub mod queue;
pub mod retry;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use dead_letter::{DeadLetterConfig, DeadLetterHandler, DeadLetterRecord};
pub use envelope::{AttemptRecord, DeliveryEnvelope, JobId, JobPriority};
pub use processor::{Handler, HealthStatus, ProcessorConfig, ReliableProcessor};
pub use queue::{JobQueue, QueueStats, RedisJobQueue};
pub use retry::{execute_with_retry, RetryPolicy, RetryStrategy};
