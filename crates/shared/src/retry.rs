//! 重试策略与状态机
//!
//! 提供指数退避重试机制，用于瞬时故障（网络抖动、平台限流、超时等）的自动恢复。
//! 永久性错误（如接收方无效）不应被重试，由调用方通过 `is_retryable` 闭包控制。
//!
//! 重试过程表达为显式状态机：
//!
//! ```text
//! Attempting ──成功──▶ Succeeded
//!     │ 瞬时失败且未用尽        │ 永久失败 / 已用尽
//!     ▼                        ▼
//! BackingOff ──退避结束──▶ Retrying ──▶ (同 Attempting)   Abandoned
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// RetryPolicy: 重试策略配置
// ---------------------------------------------------------------------------

/// 重试策略配置
///
/// 第 n 次失败后的名义等待为 `base_delay * multiplier^(n-1)`，不超过 `max_delay`。
/// 开启抖动时在名义值上追加 `[0, 名义值/2)` 的随机量，未触顶前退避严格递增。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大执行次数（含首次执行）
    pub max_attempts: u32,
    /// 首次重试前的等待时间
    pub base_delay: Duration,
    /// 退避时间上限
    pub max_delay: Duration,
    /// 每次重试的退避倍数
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    /// 默认策略：最多执行 3 次，初始等待 1 秒，最大等待 30 秒，倍数 2.0，带抖动
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// 第 `failed_attempt` 次失败后的名义退避（不含抖动，failed_attempt 从 1 开始）
    pub fn nominal_delay(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1) as i32;
        let base_ms = self.base_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 第 `failed_attempt` 次失败后的实际退避（含抖动，仍受 max_delay 约束）
    pub fn delay_for_attempt(&self, failed_attempt: u32) -> Duration {
        let nominal = self.nominal_delay(failed_attempt);
        if !self.jitter {
            return nominal;
        }
        let spread_ms = nominal.as_millis() as u64 / 2;
        let extra_ms = if spread_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..spread_ms)
        };
        (nominal + Duration::from_millis(extra_ms)).min(self.max_delay)
    }

    /// 已执行 `attempts` 次后是否还允许再执行
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

// ---------------------------------------------------------------------------
// RetryMachine: 显式重试状态机
// ---------------------------------------------------------------------------

/// 单次执行结果的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Success,
    /// 可重试的失败
    Transient,
    /// 不可重试的失败
    Permanent,
}

/// 重试状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// 正在进行第 `attempt` 次执行（首次）
    Attempting { attempt: u32 },
    /// 第 `attempt` 次执行瞬时失败，等待 `delay` 后重试
    BackingOff { attempt: u32, delay: Duration },
    /// 退避结束，正在进行第 `attempt` 次执行
    Retrying { attempt: u32 },
    Succeeded { attempts: u32 },
    Abandoned { attempts: u32 },
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Abandoned { .. })
    }
}

/// 重试状态机
///
/// 只负责状态迁移与退避计算，不做任何 IO。调用方执行操作后通过
/// [`RetryMachine::record`] 上报结果，退避结束后调用 [`RetryMachine::resume`]。
/// 非法迁移（如在终态上报结果）保持状态不变。
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
    delays: Vec<Duration>,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Attempting { attempt: 1 },
            delays: Vec::new(),
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// 已发生的退避序列
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// 已执行（或正在执行）的次数
    pub fn attempts(&self) -> u32 {
        match self.state {
            RetryState::Attempting { attempt }
            | RetryState::BackingOff { attempt, .. }
            | RetryState::Retrying { attempt } => attempt,
            RetryState::Succeeded { attempts } | RetryState::Abandoned { attempts } => attempts,
        }
    }

    /// 上报当前执行结果
    pub fn record(&mut self, result: AttemptResult) -> RetryState {
        self.record_with_hint(result, None)
    }

    /// 上报执行结果，`min_delay` 为对端要求的最短等待
    ///
    /// 退避取策略计算值与 `min_delay` 的较大者，仍不超过 `max_delay`。
    pub fn record_with_hint(
        &mut self,
        result: AttemptResult,
        min_delay: Option<Duration>,
    ) -> RetryState {
        let attempt = match self.state {
            RetryState::Attempting { attempt } | RetryState::Retrying { attempt } => attempt,
            _ => return self.state,
        };

        self.state = match result {
            AttemptResult::Success => RetryState::Succeeded { attempts: attempt },
            AttemptResult::Permanent => RetryState::Abandoned { attempts: attempt },
            AttemptResult::Transient if self.policy.should_retry(attempt) => {
                let mut delay = self.policy.delay_for_attempt(attempt);
                if let Some(hint) = min_delay {
                    delay = delay.max(hint).min(self.policy.max_delay);
                }
                self.delays.push(delay);
                RetryState::BackingOff { attempt, delay }
            }
            AttemptResult::Transient => RetryState::Abandoned { attempts: attempt },
        };
        self.state
    }

    /// 退避结束，进入下一次执行
    pub fn resume(&mut self) -> RetryState {
        if let RetryState::BackingOff { attempt, .. } = self.state {
            self.state = RetryState::Retrying {
                attempt: attempt + 1,
            };
        }
        self.state
    }
}

// ---------------------------------------------------------------------------
// retry_with_policy: 带重试的异步执行器
// ---------------------------------------------------------------------------

/// 重试执行结果
#[derive(Debug)]
pub struct RetryReport<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    pub delays: Vec<Duration>,
}

/// 带重试的异步执行器
///
/// 用 [`RetryMachine`] 驱动任意异步操作。仅当 `is_retryable` 返回 true 时才重试，
/// 否则立即放弃并返回最后一次错误。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    operation: F,
) -> RetryReport<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_hint(policy, operation_name, is_retryable, |_| None, operation).await
}

/// 同 [`retry_with_policy`]，`retry_hint` 从错误中提取对端要求的最短等待
pub async fn retry_with_hint<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    retry_hint: impl Fn(&E) -> Option<Duration>,
    mut operation: F,
) -> RetryReport<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut machine = RetryMachine::new(policy.clone());

    loop {
        let attempt = machine.attempts();
        let result = operation(attempt).await;

        let classified = match &result {
            Ok(_) => AttemptResult::Success,
            Err(err) if is_retryable(err) => AttemptResult::Transient,
            Err(_) => AttemptResult::Permanent,
        };
        let hint = result.as_ref().err().and_then(&retry_hint);

        match machine.record_with_hint(classified, hint) {
            RetryState::Succeeded { attempts } => {
                if attempts > 1 {
                    info!(operation = operation_name, attempts, "操作在重试后成功");
                }
                return RetryReport {
                    result,
                    attempts,
                    delays: machine.delays,
                };
            }
            RetryState::Abandoned { attempts } => {
                if let Err(err) = &result {
                    warn!(
                        operation = operation_name,
                        attempts,
                        retryable = classified == AttemptResult::Transient,
                        error = %err,
                        "操作失败，放弃重试"
                    );
                }
                return RetryReport {
                    result,
                    attempts,
                    delays: machine.delays,
                };
            }
            RetryState::BackingOff { attempt, delay } => {
                if let Err(err) = &result {
                    warn!(
                        operation = operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "操作失败，将在退避后重试"
                    );
                }
                tokio::time::sleep(delay).await;
                machine.resume();
            }
            RetryState::Attempting { .. } | RetryState::Retrying { .. } => {
                // record 之后不会停留在执行态
                unreachable!("重试状态机在上报结果后仍处于执行态")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(policy.jitter);
    }

    #[test]
    fn test_nominal_delay_exponential_backoff() {
        let policy = RetryPolicy::default();

        // 1s * 2^0, 1s * 2^1, 1s * 2^2
        assert_eq!(policy.nominal_delay(1), Duration::from_secs(1));
        assert_eq!(policy.nominal_delay(2), Duration::from_secs(2));
        assert_eq!(policy.nominal_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        };

        // 8s -> 受限于 max_delay -> 5s，抖动也不能突破上限
        assert_eq!(policy.nominal_delay(4), Duration::from_secs(5));
        for _ in 0..50 {
            assert!(policy.delay_for_attempt(4) <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_jittered_delays_strictly_increase_below_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            ..RetryPolicy::default()
        };

        for _ in 0..100 {
            let d1 = policy.delay_for_attempt(1);
            let d2 = policy.delay_for_attempt(2);
            let d3 = policy.delay_for_attempt(3);
            assert!(d1 >= Duration::from_secs(1) && d1 < Duration::from_millis(1500));
            assert!(d1 < d2, "{d1:?} < {d2:?}");
            assert!(d2 < d3, "{d2:?} < {d3:?}");
        }
    }

    #[test]
    fn test_should_retry() {
        let policy = fixed_policy(3);

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        // 已执行 3 次不再重试
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_machine_permanent_failure_consumes_one_attempt() {
        let mut machine = RetryMachine::new(fixed_policy(3));
        assert_eq!(machine.state(), RetryState::Attempting { attempt: 1 });

        let state = machine.record(AttemptResult::Permanent);
        assert_eq!(state, RetryState::Abandoned { attempts: 1 });
        assert!(machine.delays().is_empty());
    }

    #[test]
    fn test_machine_transient_failures_exhaust_attempts() {
        let mut machine = RetryMachine::new(fixed_policy(3));

        assert_eq!(
            machine.record(AttemptResult::Transient),
            RetryState::BackingOff {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(machine.resume(), RetryState::Retrying { attempt: 2 });
        assert_eq!(
            machine.record(AttemptResult::Transient),
            RetryState::BackingOff {
                attempt: 2,
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(machine.resume(), RetryState::Retrying { attempt: 3 });
        assert_eq!(
            machine.record(AttemptResult::Transient),
            RetryState::Abandoned { attempts: 3 }
        );

        assert_eq!(machine.attempts(), 3);
        assert_eq!(
            machine.delays(),
            &[Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[test]
    fn test_machine_hint_raises_delay_within_cap() {
        let mut machine = RetryMachine::new(fixed_policy(4));

        // 对端要求 3 秒，大于策略的 100ms
        assert_eq!(
            machine.record_with_hint(AttemptResult::Transient, Some(Duration::from_secs(3))),
            RetryState::BackingOff {
                attempt: 1,
                delay: Duration::from_secs(3)
            }
        );
        machine.resume();

        // 超过 max_delay 时按上限等待
        assert_eq!(
            machine.record_with_hint(AttemptResult::Transient, Some(Duration::from_secs(60))),
            RetryState::BackingOff {
                attempt: 2,
                delay: Duration::from_secs(10)
            }
        );
        machine.resume();

        // 小于策略值时不缩短退避
        assert_eq!(
            machine.record_with_hint(AttemptResult::Transient, Some(Duration::from_millis(1))),
            RetryState::BackingOff {
                attempt: 3,
                delay: Duration::from_millis(400)
            }
        );
    }

    #[test]
    fn test_machine_success_after_retry() {
        let mut machine = RetryMachine::new(fixed_policy(3));
        machine.record(AttemptResult::Transient);
        machine.resume();

        let state = machine.record(AttemptResult::Success);
        assert_eq!(state, RetryState::Succeeded { attempts: 2 });
        assert!(state.is_terminal());
    }

    #[test]
    fn test_machine_ignores_invalid_transitions() {
        let mut machine = RetryMachine::new(fixed_policy(3));

        // 执行态不能 resume
        assert_eq!(machine.resume(), RetryState::Attempting { attempt: 1 });

        machine.record(AttemptResult::Success);
        // 终态不再迁移
        assert_eq!(
            machine.record(AttemptResult::Transient),
            RetryState::Succeeded { attempts: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_policy_succeeds_first_try() {
        let policy = fixed_policy(3);
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let report = retry_with_policy(
            &policy,
            "test_op",
            |_: &String| true,
            |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(42)
                }
            },
        )
        .await;

        assert_eq!(report.result.unwrap(), 42);
        assert_eq!(report.attempts, 1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_policy_succeeds_after_retries() {
        let policy = fixed_policy(3);
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let report = retry_with_policy(
            &policy,
            "test_op",
            |_: &String| true,
            |attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err("模拟瞬时故障".to_string())
                    } else {
                        Ok(99)
                    }
                }
            },
        )
        .await;

        assert_eq!(report.result.unwrap(), 99);
        assert_eq!(report.attempts, 3);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
        assert_eq!(
            report.delays,
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_hint_waits_requested_delay() {
        let policy = fixed_policy(3);
        let started = tokio::time::Instant::now();

        let report = retry_with_hint(
            &policy,
            "test_op",
            |_: &String| true,
            |err: &String| {
                err.strip_prefix("retry_after=")
                    .and_then(|s| s.parse().ok())
                    .map(Duration::from_secs)
            },
            |attempt| async move {
                if attempt == 1 {
                    Err("retry_after=2".to_string())
                } else {
                    Ok(attempt)
                }
            },
        )
        .await;

        assert_eq!(report.result.unwrap(), 2);
        assert_eq!(report.delays, vec![Duration::from_secs(2)]);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_policy_stops_on_non_retryable() {
        let policy = fixed_policy(5);
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let report: RetryReport<i32, String> = retry_with_policy(
            &policy,
            "test_op",
            |err: &String| err != "permanent",
            |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("permanent".to_string())
                }
            },
        )
        .await;

        assert_eq!(report.result.unwrap_err(), "permanent");
        assert_eq!(report.attempts, 1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
