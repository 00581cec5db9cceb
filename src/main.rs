//! pathgen 演示入口
//!
//! 初始化日志与配置，装配内存协作方，提交一次生成请求（JSON 文件参数或内置示例），
//! 轮询台账直到 Job 结束，然后打印 Job。

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use pathgen::config::load_config_or_default;
use pathgen::core::PipelineBuilder;
use pathgen::path::SkillsGap;
use tokio_util::sync::CancellationToken;

fn sample_gap() -> SkillsGap {
    SkillsGap::new("learner-001", "company-001", "Frontend Development")
        .with_micro_skills(["React Hooks", "State Management", "CSS Grid"])
        .with_nano_skills(["JavaScript Variables", "Performance Optimization"])
}

/// 设置了 PATHGEN_JOBS_DB 时使用 SQLite 台账，重启后可对账
#[cfg(feature = "async-sqlite")]
async fn with_job_ledger(builder: PipelineBuilder) -> anyhow::Result<PipelineBuilder> {
    let Ok(db_path) = std::env::var("PATHGEN_JOBS_DB") else {
        return Ok(builder);
    };
    let ledger = pathgen::jobs::SqliteJobLedger::open(&db_path)
        .await
        .with_context(|| format!("Failed to open job ledger {db_path}"))?;
    Ok(builder.with_ledger(std::sync::Arc::new(ledger)))
}

#[cfg(not(feature = "async-sqlite"))]
async fn with_job_ledger(builder: PipelineBuilder) -> anyhow::Result<PipelineBuilder> {
    Ok(builder)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pathgen::observability::init();

    let gap = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&text).context("Invalid skills gap JSON")?
        }
        None => sample_gap(),
    };

    let cfg = load_config_or_default(std::env::var("PATHGEN_CONFIG").ok().map(PathBuf::from));
    let generator = with_job_ledger(PipelineBuilder::from_config(&cfg)).await?.build();

    let supervisor = generator.supervisor().clone();
    supervisor
        .reconcile_orphans()
        .await
        .context("Failed to reconcile unfinished jobs")?;
    let shutdown = CancellationToken::new();
    let reaper = supervisor.spawn_reaper(
        Duration::from_secs(cfg.pipeline.reap_interval_secs.max(1)),
        shutdown.clone(),
    );

    let receipt = generator.generate(gap).await?;
    println!("accepted job {} ({})", receipt.job_id, receipt.status);

    let job = loop {
        let job = generator
            .ledger()
            .get(&receipt.job_id)
            .await?
            .context("Job disappeared from ledger")?;
        if job.is_finished() {
            break job;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    shutdown.cancel();
    let _ = reaper.await;

    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}
