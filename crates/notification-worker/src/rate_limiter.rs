//! 令牌桶限流器
//!
//! 所有发送方共享同一个桶，保证传输层调用速率不超过配置上限。
//! 令牌数的读-改-写全部在同一把互斥锁内完成，任意时刻只有一个准入判定在进行。

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use notifier_shared::observability::metrics;

use crate::error::DeliveryError;

/// 浮点比较容差，避免等待恰好 deficit/R 后因舍入再等一轮
const EPSILON: f64 = 1e-9;

/// 单次准入判定结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Admitted,
    /// 还需等待的时长（deficit / R）
    Wait(Duration),
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// 令牌桶限流器
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// 创建满桶
    ///
    /// capacity 至少为 1，refill_per_sec 必须为正（由配置校验保证）。
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    /// 当前可用令牌数（会先按流逝时间补充）
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_sec)
            .min(self.capacity);
        bucket.last_refill = now;
    }

    /// 非阻塞准入：足够则扣减并放行，否则返回需要等待的时长
    pub fn try_acquire(&self, cost: f64) -> Admission {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);

        if bucket.tokens + EPSILON >= cost {
            bucket.tokens = (bucket.tokens - cost).max(0.0);
            Admission::Admitted
        } else {
            let deficit = cost - bucket.tokens;
            Admission::Wait(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    /// 阻塞准入：按提示时长休眠后重试，累计等待不超过 `max_wait`
    ///
    /// 返回实际等待时长。`cost` 超过容量永远无法满足，立即放弃；
    /// `max_wait` 为 0 时等价于非阻塞调用。
    pub async fn acquire(&self, cost: f64, max_wait: Duration) -> Result<Duration, DeliveryError> {
        let start = Instant::now();
        let deadline = start + max_wait;

        loop {
            match self.try_acquire(cost) {
                Admission::Admitted => {
                    let waited = start.elapsed();
                    metrics::record_rate_limit("admitted", waited.as_secs_f64());
                    return Ok(waited);
                }
                Admission::Wait(wait) => {
                    let now = Instant::now();
                    if cost > self.capacity || now + wait > deadline {
                        let waited = now.saturating_duration_since(start);
                        metrics::record_rate_limit("abandoned", waited.as_secs_f64());
                        debug!(
                            cost,
                            wait_ms = wait.as_millis() as u64,
                            max_wait_ms = max_wait.as_millis() as u64,
                            "限流等待超出上限，放弃准入"
                        );
                        return Err(DeliveryError::RateLimitAbandoned {
                            required_wait_ms: (waited + wait).as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
