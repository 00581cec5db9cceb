//! 运行监管：按键串行 + 有界并发 + 保留任务句柄
//!
//! 每个生成任务先取得所属键的锁，再取 Semaphore 许可；同键排队的运行不占用许可。
//! 句柄按 job id 保留，用于：
//! - `reap`：回收已结束的句柄，panic 的运行把 Job 标记为 failed
//! - `reconcile_orphans`：启动时把台账里没有存活句柄的未完成 Job 标记为 failed
//! - `wait` / `join_all`：测试与演示等待运行结束

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::core::locks::KeyedLocks;
use crate::core::StoreError;
use crate::jobs::{JobId, JobLedger, JobStatus, JobUpdate};
use crate::observability::PipelineObserver;

pub const ORPHANED_BY_RESTART: &str = "orphaned by restart";
pub const RUN_PANICKED: &str = "run aborted unexpectedly";

pub struct RunSupervisor {
    permits: Arc<Semaphore>,
    locks: Arc<KeyedLocks>,
    handles: Mutex<HashMap<JobId, JoinHandle<()>>>,
    ledger: Arc<dyn JobLedger>,
    observer: Arc<dyn PipelineObserver>,
}

impl RunSupervisor {
    pub fn new(
        max_concurrent_runs: usize,
        ledger: Arc<dyn JobLedger>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            locks: Arc::new(KeyedLocks::new()),
            handles: Mutex::new(HashMap::new()),
            ledger,
            observer,
        }
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// 持有 key 的锁并在并发许可下后台运行；立即返回
    pub fn spawn<F>(&self, job_id: JobId, key: impl Into<String>, run: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        let locks = self.locks.clone();
        let key = key.into();
        let handle = tokio::spawn(async move {
            let _guard = locks.acquire(&key).await;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            run.await;
        });
        self.handles().insert(job_id, handle);
    }

    /// 仍在运行（或排队等锁、等许可）的 job id
    pub fn active_runs(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self
            .handles()
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// 回收已结束的句柄；返回因 panic 被标记为 failed 的 job id
    pub async fn reap(&self) -> Vec<JobId> {
        let finished: Vec<(JobId, JoinHandle<()>)> = {
            let mut handles = self.handles();
            let ids: Vec<JobId> = handles
                .iter()
                .filter(|(_, h)| h.is_finished())
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| handles.remove(&id).map(|h| (id, h)))
                .collect()
        };

        let mut failed = Vec::new();
        for (job_id, handle) in finished {
            if let Err(e) = handle.await {
                if self.mark_crashed(&job_id, &e).await {
                    failed.push(job_id);
                }
            }
        }
        failed
    }

    /// 等待指定运行结束
    pub async fn wait(&self, job_id: &str) {
        let handle = self.handles().remove(job_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                self.mark_crashed(job_id, &e).await;
            }
        }
    }

    /// 等待当前全部运行结束
    pub async fn join_all(&self) {
        let drained: Vec<(JobId, JoinHandle<()>)> = self.handles().drain().collect();
        let (ids, handles): (Vec<JobId>, Vec<JoinHandle<()>>) = drained.into_iter().unzip();
        let results = futures_util::future::join_all(handles).await;
        for (job_id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                self.mark_crashed(job_id, &e).await;
            }
        }
    }

    async fn mark_crashed(&self, job_id: &str, error: &JoinError) -> bool {
        if !error.is_panic() {
            return false;
        }
        tracing::error!(job_id, "generation run panicked");
        let job_id = job_id.to_string();
        match self.ledger.update(&job_id, JobUpdate::failed(RUN_PANICKED)).await {
            Ok(_) => {
                self.observer
                    .job_finished(&job_id, JobStatus::Failed, Some(RUN_PANICKED));
                true
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "failed to mark crashed job");
                false
            }
        }
    }

    /// 启动对账：台账中未完成且没有存活句柄的 Job 标记为 failed
    pub async fn reconcile_orphans(&self) -> Result<Vec<JobId>, StoreError> {
        let live = self.active_runs();
        let mut orphaned = Vec::new();
        for job in self.ledger.list_unfinished().await? {
            if live.contains(&job.id) {
                continue;
            }
            self.ledger
                .update(&job.id, JobUpdate::failed(ORPHANED_BY_RESTART))
                .await?;
            self.observer
                .job_finished(&job.id, JobStatus::Failed, Some(ORPHANED_BY_RESTART));
            orphaned.push(job.id);
        }
        if !orphaned.is_empty() {
            tracing::warn!(count = orphaned.len(), "reconciled orphaned jobs");
        }
        Ok(orphaned)
    }

    /// 周期性回收，直到 token 被取消
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let failed = supervisor.reap().await;
                        if !failed.is_empty() {
                            tracing::warn!(?failed, "reaped crashed runs");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{InMemoryJobLedger, Job};
    use crate::observability::TracingObserver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn supervisor(max: usize) -> (Arc<InMemoryJobLedger>, RunSupervisor) {
        let (ledger, _rx) = InMemoryJobLedger::new();
        let ledger = Arc::new(ledger);
        let sup = RunSupervisor::new(max, ledger.clone(), Arc::new(TracingObserver));
        (ledger, sup)
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let (_ledger, sup) = supervisor(2);
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for i in 0..6 {
            let inside = inside.clone();
            let peak = peak.clone();
            sup.spawn(format!("job_{i}"), format!("key_{i}"), async move {
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            });
        }
        sup.join_all().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(sup.active_runs().is_empty());
    }

    #[tokio::test]
    async fn test_same_key_backlog_does_not_hold_permits() {
        let (_ledger, sup) = supervisor(2);
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        sup.spawn("job_a".into(), "u1/Frontend", async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        });
        started_rx.await.unwrap();

        let same_key_ran = Arc::new(AtomicUsize::new(0));
        let flag = same_key_ran.clone();
        sup.spawn("job_b".into(), "u1/Frontend", async move {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        sup.spawn("job_c".into(), "u2/Backend", async move {
            let _ = done_tx.send(());
        });

        // job_a 仍占着一个许可，job_b 在等锁，job_c 必须拿到另一个许可
        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .expect("other key should not wait behind the same-key backlog")
            .unwrap();
        assert_eq!(same_key_ran.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        sup.join_all().await;
        assert_eq!(same_key_ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reap_marks_panicked_run_failed() {
        let (ledger, sup) = supervisor(1);
        let job = ledger.create(Job::new("u1", "c1", "Frontend")).await.unwrap();
        sup.spawn(job.id.clone(), "k1", async { panic!("boom") });
        sup.spawn("job_ok".into(), "k2", async {});

        // 等两个任务都结束
        while !sup.active_runs().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let failed = sup.reap().await;
        assert_eq!(failed, vec![job.id.clone()]);

        let stored = ledger.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some(RUN_PANICKED));
    }

    #[tokio::test]
    async fn test_reconcile_orphans() {
        let (ledger, sup) = supervisor(1);
        let orphan = ledger.create(Job::new("u1", "c1", "Frontend")).await.unwrap();
        let done = ledger.create(Job::new("u2", "c1", "Backend")).await.unwrap();
        ledger
            .update(&done.id, JobUpdate::completed(serde_json::json!({})))
            .await
            .unwrap();

        let orphaned = sup.reconcile_orphans().await.unwrap();
        assert_eq!(orphaned, vec![orphan.id.clone()]);
        let stored = ledger.get(&orphan.id).await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some(ORPHANED_BY_RESTART));
        assert_eq!(
            ledger.get(&done.id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_reaper_stops_on_cancel() {
        let (_ledger, sup) = supervisor(1);
        let sup = Arc::new(sup);
        let token = CancellationToken::new();
        let reaper = sup.spawn_reaper(Duration::from_millis(5), token.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        reaper.await.unwrap();
    }
}
