//! 定时任务调度器
//!
//! 单个后台驱动循环在最早的触发时间醒来（或在任务集合变化时被唤醒），
//! 将到期任务按 (触发时间, job_id) 升序交给分发器，分发是即发即忘的，
//! 驱动循环不等待投递完成。
//!
//! 任务表的增删与到期扫描共用同一把锁：扫描前已取消的任务不会触发，
//! 已被扫描取走的任务不受随后取消的影响。

mod clock;
mod job;
mod trigger;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

use notifier_shared::observability::metrics;

use crate::error::NotificationError;
use crate::model::{Category, FormatMode, NotificationRequest};

pub use clock::{Clock, ManualClock, SystemClock};
pub use job::{JobContent, JobPayload, JobState, JobSummary};
pub use trigger::{CronExpr, Trigger, TriggerSpec};

use job::ScheduledJob;

/// 没有活动任务时的最长休眠，到点后重新评估
const MAX_IDLE_SLEEP: Duration = Duration::from_secs(60);

/// 任务到期后的分发目标
///
/// 实现方必须立即返回（内部自行 spawn 投递），不得阻塞驱动循环。
pub trait JobDispatcher: Send + Sync {
    fn dispatch(&self, job_id: &str, payload: Arc<JobPayload>);
}

/// 定时任务调度器
pub struct Scheduler {
    jobs: Mutex<BTreeMap<String, ScheduledJob>>,
    wakeup: Notify,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<dyn JobDispatcher>,
}

impl Scheduler {
    pub fn new(dispatcher: Arc<dyn JobDispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Mutex::new(BTreeMap::new()),
            wakeup: Notify::new(),
            clock,
            dispatcher,
        }
    }

    pub fn with_system_clock(dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self::new(dispatcher, Arc::new(SystemClock))
    }

    /// 注册任务
    ///
    /// 触发规则在此校验，非法规则不会入表。同名的存活任务存在时返回
    /// `DuplicateJob` 且原任务保持不变；已取消或已完成的同名任务会被替换。
    pub fn schedule(
        &self,
        job_id: impl Into<String>,
        payload: JobPayload,
        spec: TriggerSpec,
    ) -> Result<JobSummary, NotificationError> {
        let job_id = job_id.into();
        if job_id.trim().is_empty() {
            return Err(NotificationError::InvalidRequest(
                "job_id 不能为空".to_string(),
            ));
        }

        let now = self.clock.now();
        let trigger = Trigger::compile(spec, now)?;
        let next_fire = trigger.first_fire(now);

        let summary = {
            let mut jobs = self.jobs.lock();
            if jobs.get(&job_id).is_some_and(ScheduledJob::is_live) {
                return Err(NotificationError::DuplicateJob { job_id });
            }

            let job = ScheduledJob {
                id: job_id.clone(),
                trigger,
                payload: Arc::new(payload),
                state: JobState::Active,
                next_fire,
                last_fire: None,
                fire_count: 0,
                created_at: now,
            };
            let summary = job.summary();
            jobs.insert(job_id.clone(), job);
            metrics::set_scheduler_jobs(jobs.values().filter(|j| j.is_live()).count());
            summary
        };

        info!(
            job_id = %job_id,
            trigger = %summary.trigger,
            next_fire_time = ?summary.next_fire_time,
            "定时任务已注册"
        );
        self.wakeup.notify_one();
        Ok(summary)
    }

    /// 取消任务，幂等：不存在或已取消时什么也不做
    ///
    /// 返回本次调用是否确实取消了任务。在途的投递不受影响。
    pub fn unschedule(&self, job_id: &str) -> bool {
        let cancelled = {
            let mut jobs = self.jobs.lock();
            match jobs.get_mut(job_id) {
                Some(job) if job.state != JobState::Cancelled => {
                    job.state = JobState::Cancelled;
                    job.next_fire = None;
                    metrics::set_scheduler_jobs(jobs.values().filter(|j| j.is_live()).count());
                    true
                }
                _ => false,
            }
        };

        if cancelled {
            info!(job_id, "定时任务已取消");
            self.wakeup.notify_one();
        } else {
            debug!(job_id, "取消不存在或已取消的任务，忽略");
        }
        cancelled
    }

    /// 暂停任务，已暂停时无操作
    pub fn pause(&self, job_id: &str) -> Result<JobSummary, NotificationError> {
        let summary = self.update_live(job_id, |job, _| {
            if job.state == JobState::Active {
                job.state = JobState::Paused;
            }
        })?;
        info!(job_id, "定时任务已暂停");
        self.wakeup.notify_one();
        Ok(summary)
    }

    /// 恢复任务并按当前时间重新计算下次触发时间
    pub fn resume(&self, job_id: &str) -> Result<JobSummary, NotificationError> {
        let summary = self.update_live(job_id, |job, now| {
            if job.state == JobState::Paused {
                job.state = JobState::Active;
                job.next_fire = job.trigger.resume_fire(job.next_fire, now);
            }
        })?;
        info!(job_id, next_fire_time = ?summary.next_fire_time, "定时任务已恢复");
        self.wakeup.notify_one();
        Ok(summary)
    }

    fn update_live(
        &self,
        job_id: &str,
        update: impl FnOnce(&mut ScheduledJob, DateTime<Utc>),
    ) -> Result<JobSummary, NotificationError> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(job_id)
            .filter(|job| job.is_live())
            .ok_or_else(|| NotificationError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        update(job, now);
        Ok(job.summary())
    }

    pub fn get_job(&self, job_id: &str) -> Option<JobSummary> {
        self.jobs
            .lock()
            .get(job_id)
            .filter(|job| job.state != JobState::Cancelled)
            .map(ScheduledJob::summary)
    }

    /// 全部未取消任务的快照，按 job_id 排序
    pub fn list_jobs(&self) -> Vec<JobSummary> {
        self.jobs
            .lock()
            .values()
            .filter(|job| job.state != JobState::Cancelled)
            .map(ScheduledJob::summary)
            .collect()
    }

    /// 活动任务中最早的触发时间
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.jobs
            .lock()
            .values()
            .filter(|job| job.state == JobState::Active)
            .filter_map(|job| job.next_fire)
            .min()
    }

    /// 执行一轮调度：清理已完成/已取消任务，分发全部到期任务
    ///
    /// 返回本轮按分发顺序触发的 job_id。
    pub fn tick(&self) -> Vec<String> {
        let now = self.clock.now();

        let due = {
            let mut jobs = self.jobs.lock();
            jobs.retain(|_, job| job.is_live());

            let mut due: Vec<(DateTime<Utc>, String)> = jobs
                .values()
                .filter(|job| job.state == JobState::Active)
                .filter_map(|job| job.next_fire.filter(|t| *t <= now).map(|t| (t, job.id.clone())))
                .collect();
            due.sort();

            let mut fired = Vec::with_capacity(due.len());
            for (scheduled, id) in due {
                let Some(job) = jobs.get_mut(&id) else { continue };
                job.last_fire = Some(now);
                job.fire_count += 1;
                job.next_fire = job.trigger.next_fire(scheduled, now);
                if job.next_fire.is_none() {
                    job.state = JobState::Completed;
                }
                fired.push((id, job.payload.clone(), job.trigger.kind(), scheduled));
            }
            metrics::set_scheduler_jobs(jobs.values().filter(|j| j.is_live()).count());
            fired
        };

        let mut fired_ids = Vec::with_capacity(due.len());
        for (id, payload, kind, scheduled) in due {
            info!(job_id = %id, trigger = kind, scheduled = %scheduled, "定时任务触发");
            metrics::record_scheduler_fire(kind);

            let dispatcher = &self.dispatcher;
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                dispatcher.dispatch(&id, payload);
            }));
            if outcome.is_err() {
                error!(job_id = %id, "定时任务分发异常，继续处理其他任务");
            }
            fired_ids.push(id);
        }
        fired_ids
    }

    /// 后台驱动循环，直到 shutdown 变为 true 或发送端关闭
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("调度器驱动循环已启动");

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick();

            let sleep_for = match self.next_wake() {
                Some(next) => (next - self.clock.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(MAX_IDLE_SLEEP),
                None => MAX_IDLE_SLEEP,
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.wakeup.notified() => {
                    debug!("任务集合变化，重新计算唤醒时间");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("调度器关闭信号发送端已释放");
                        break;
                    }
                }
            }
        }

        info!("调度器驱动循环已停止");
    }

    /// 注册内置任务：每日 09:00 系统报告、每周一 10:00 周报
    ///
    /// 已存在的同名任务保持不变。
    pub fn register_default_jobs(&self) -> Result<(), NotificationError> {
        let defaults = [
            (
                "daily_system_report",
                "0 9 * * *",
                JobPayload::system_report(
                    NotificationRequest::builder("Daily system report")
                        .format(FormatMode::Markdown)
                        .category(Category::System)
                        .build()?,
                ),
            ),
            (
                "weekly_summary",
                "0 10 * * 1",
                JobPayload::weekly_summary(
                    NotificationRequest::builder("Weekly summary")
                        .format(FormatMode::Markdown)
                        .category(Category::Scheduled)
                        .build()?,
                ),
            ),
        ];

        for (job_id, cron, payload) in defaults {
            match self.schedule(job_id, payload, TriggerSpec::Cron(cron.to_string())) {
                Ok(_) | Err(NotificationError::DuplicateJob { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use crate::test_utils::rid;

    #[derive(Default)]
    struct RecordingDispatcher {
        fired: Mutex<Vec<String>>,
    }

    impl JobDispatcher for RecordingDispatcher {
        fn dispatch(&self, job_id: &str, _payload: Arc<JobPayload>) {
            self.fired.lock().push(job_id.to_string());
        }
    }

    struct PanickyDispatcher {
        inner: RecordingDispatcher,
    }

    impl JobDispatcher for PanickyDispatcher {
        fn dispatch(&self, job_id: &str, payload: Arc<JobPayload>) {
            if job_id == "boom" {
                panic!("模拟分发异常");
            }
            self.inner.dispatch(job_id, payload);
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 10, 0, 0).unwrap()
    }

    fn payload(body: &str) -> JobPayload {
        JobPayload::notification(
            NotificationRequest::builder(body)
                .recipient(rid("1"))
                .build()
                .unwrap(),
        )
    }

    fn setup() -> (Scheduler, Arc<RecordingDispatcher>, Arc<ManualClock>) {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let clock = Arc::new(ManualClock::new(start()));
        let scheduler = Scheduler::new(dispatcher.clone(), clock.clone());
        (scheduler, dispatcher, clock)
    }

    #[test]
    fn test_duplicate_job_leaves_first_untouched() {
        let (scheduler, _, _) = setup();
        scheduler
            .schedule("report", payload("first"), TriggerSpec::Interval(Duration::from_secs(60)))
            .unwrap();

        let err = scheduler
            .schedule("report", payload("second"), TriggerSpec::Cron("0 9 * * *".into()))
            .unwrap_err();
        assert!(matches!(err, NotificationError::DuplicateJob { .. }));

        let job = scheduler.get_job("report").unwrap();
        assert_eq!(job.message, "first");
        assert_eq!(job.trigger_kind, "interval");
    }

    #[test]
    fn test_unschedule_is_idempotent() {
        let (scheduler, _, _) = setup();
        assert!(!scheduler.unschedule("missing"));

        scheduler
            .schedule("job", payload("x"), TriggerSpec::Interval(Duration::from_secs(5)))
            .unwrap();
        assert!(scheduler.unschedule("job"));
        assert!(!scheduler.unschedule("job"));
        assert!(scheduler.list_jobs().is_empty());

        // 已取消的 job_id 可以复用
        assert!(
            scheduler
                .schedule("job", payload("y"), TriggerSpec::Interval(Duration::from_secs(5)))
                .is_ok()
        );
    }

    #[test]
    fn test_invalid_trigger_is_never_stored() {
        let (scheduler, _, clock) = setup();
        let past = clock.now() - TimeDelta::seconds(1);

        assert!(
            scheduler
                .schedule("a", payload("x"), TriggerSpec::Cron("bad".into()))
                .is_err()
        );
        assert!(
            scheduler
                .schedule("b", payload("x"), TriggerSpec::OneShot(past))
                .is_err()
        );
        let err = scheduler
            .schedule(
                "c",
                payload("x"),
                TriggerSpec::Interval(Duration::from_secs(100_000_000_000_000)),
            )
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRIGGER_SPEC");
        assert!(scheduler.list_jobs().is_empty());
    }

    #[test]
    fn test_list_jobs_sorted_by_id() {
        let (scheduler, _, _) = setup();
        for id in ["charlie", "alpha", "bravo"] {
            scheduler
                .schedule(id, payload(id), TriggerSpec::Interval(Duration::from_secs(60)))
                .unwrap();
        }
        let ids: Vec<_> = scheduler.list_jobs().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["alpha", "bravo", "charlie"]);
    }

    #[test]
    fn test_due_jobs_fire_in_time_then_id_order() {
        let (scheduler, dispatcher, clock) = setup();
        let at = clock.now() + TimeDelta::seconds(30);
        scheduler.schedule("b", payload("b"), TriggerSpec::OneShot(at)).unwrap();
        scheduler.schedule("a", payload("a"), TriggerSpec::OneShot(at)).unwrap();
        scheduler
            .schedule("c", payload("c"), TriggerSpec::OneShot(at - TimeDelta::seconds(10)))
            .unwrap();
        scheduler
            .schedule("later", payload("x"), TriggerSpec::OneShot(at + TimeDelta::hours(1)))
            .unwrap();

        assert!(scheduler.tick().is_empty());

        clock.advance(TimeDelta::seconds(30));
        let fired = scheduler.tick();
        assert_eq!(fired, vec!["c", "a", "b"]);
        assert_eq!(*dispatcher.fired.lock(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_one_shot_completes_then_is_removed() {
        let (scheduler, _, clock) = setup();
        scheduler
            .schedule("once", payload("x"), TriggerSpec::OneShot(clock.now() + TimeDelta::seconds(1)))
            .unwrap();

        clock.advance(TimeDelta::seconds(1));
        assert_eq!(scheduler.tick(), vec!["once"]);
        assert_eq!(scheduler.get_job("once").unwrap().state, JobState::Completed);

        // 下一轮清理
        assert!(scheduler.tick().is_empty());
        assert!(scheduler.get_job("once").is_none());
    }

    #[test]
    fn test_cron_job_reschedules_to_next_hour() {
        let (scheduler, _, clock) = setup();
        clock.set(Utc.with_ymd_and_hms(2024, 3, 10, 10, 20, 0).unwrap());
        let job = scheduler
            .schedule("half", payload("x"), TriggerSpec::Cron("*/30 * * * *".into()))
            .unwrap();
        assert_eq!(
            job.next_fire_time.unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 10, 10, 30, 0).unwrap()
        );

        clock.set(Utc.with_ymd_and_hms(2024, 3, 10, 10, 30, 0).unwrap());
        assert_eq!(scheduler.tick(), vec!["half"]);
        let job = scheduler.get_job("half").unwrap();
        assert_eq!(
            job.next_fire_time.unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 10, 11, 0, 0).unwrap()
        );
        assert_eq!(job.state, JobState::Active);
    }

    #[test]
    fn test_delayed_interval_fires_once() {
        let (scheduler, dispatcher, clock) = setup();
        let job = scheduler
            .schedule("tick", payload("x"), TriggerSpec::Interval(Duration::from_secs(60)))
            .unwrap();
        let scheduled = job.next_fire_time.unwrap();

        clock.set(scheduled + TimeDelta::seconds(185));
        assert_eq!(scheduler.tick(), vec!["tick"]);
        assert_eq!(dispatcher.fired.lock().len(), 1);

        let job = scheduler.get_job("tick").unwrap();
        let next = job.next_fire_time.unwrap();
        assert!(next > clock.now());
        assert_eq!(next, scheduled + TimeDelta::seconds(240));
        assert_eq!(job.fire_count, 1);
    }

    #[test]
    fn test_cancelled_before_scan_does_not_fire() {
        let (scheduler, dispatcher, clock) = setup();
        scheduler
            .schedule("job", payload("x"), TriggerSpec::Interval(Duration::from_secs(10)))
            .unwrap();
        clock.advance(TimeDelta::seconds(10));

        scheduler.unschedule("job");
        assert!(scheduler.tick().is_empty());
        assert!(dispatcher.fired.lock().is_empty());
    }

    #[test]
    fn test_pause_and_resume() {
        let (scheduler, dispatcher, clock) = setup();
        scheduler
            .schedule("job", payload("x"), TriggerSpec::Interval(Duration::from_secs(60)))
            .unwrap();

        assert_eq!(scheduler.pause("job").unwrap().state, JobState::Paused);
        // 重复暂停无副作用
        assert_eq!(scheduler.pause("job").unwrap().state, JobState::Paused);
        clock.advance(TimeDelta::seconds(300));
        assert!(scheduler.tick().is_empty());
        assert!(scheduler.next_wake().is_none());

        let resumed = scheduler.resume("job").unwrap();
        assert_eq!(resumed.state, JobState::Active);
        assert!(resumed.next_fire_time.unwrap() > clock.now());
        assert!(dispatcher.fired.lock().is_empty());

        assert!(matches!(
            scheduler.pause("missing"),
            Err(NotificationError::JobNotFound { .. })
        ));
    }

    #[test]
    fn test_dispatch_panic_does_not_stop_other_jobs() {
        let dispatcher = Arc::new(PanickyDispatcher {
            inner: RecordingDispatcher::default(),
        });
        let clock = Arc::new(ManualClock::new(start()));
        let scheduler = Scheduler::new(dispatcher.clone(), clock.clone());

        for id in ["a", "boom", "c"] {
            scheduler
                .schedule(id, payload(id), TriggerSpec::Interval(Duration::from_secs(10)))
                .unwrap();
        }
        clock.advance(TimeDelta::seconds(10));

        assert_eq!(scheduler.tick(), vec!["a", "boom", "c"]);
        assert_eq!(*dispatcher.inner.fired.lock(), vec!["a", "c"]);
        // 异常任务仍保持活动
        assert_eq!(scheduler.get_job("boom").unwrap().state, JobState::Active);
    }

    #[test]
    fn test_register_default_jobs_is_repeatable() {
        let (scheduler, _, _) = setup();
        scheduler.register_default_jobs().unwrap();
        scheduler.register_default_jobs().unwrap();

        let jobs = scheduler.list_jobs();
        let ids: Vec<_> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["daily_system_report", "weekly_summary"]);
        assert_eq!(jobs[0].content, JobContent::SystemReport);
        assert_eq!(jobs[1].category, Some(Category::Scheduled));
    }

    #[tokio::test]
    async fn test_driver_wakes_on_new_job_and_stops_on_shutdown() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let scheduler = Arc::new(Scheduler::with_system_clock(dispatcher.clone()));
        let (tx, rx) = watch::channel(false);
        let driver = tokio::spawn(scheduler.clone().run(rx));

        // 驱动循环已在空闲休眠中，新任务应唤醒它
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler
            .schedule(
                "soon",
                payload("x"),
                TriggerSpec::OneShot(Utc::now() + TimeDelta::milliseconds(50)),
            )
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.fired.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("任务应在超时前触发");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), driver)
            .await
            .expect("驱动循环应退出")
            .unwrap();
        assert_eq!(*dispatcher.fired.lock(), vec!["soon"]);
    }
}
