//! 学习路径生成编排器
//!
//! `PathGenerator::generate` 同步校验输入、创建 pending Job，然后把 `Pipeline::run`
//! 交给 RunSupervisor 在后台执行并立即返回。`run` 依次推进：
//!
//! | 阶段 | currentStage | 完成后进度 |
//! |---|---|---|
//! | 模式判定 | skill-expansion | 10 |
//! | 1 技能扩展（AI） | competency-identification | 30 |
//! | 2 能力识别（AI） | skill-breakdown | 50 |
//! | 3 技能拆解（分类服务） | path-creation | 70 |
//! | 4 路径生成（AI）+ 校验重试 | - | - |
//! | 5 持久化 + 审批交接 | completed | 100 |
//!
//! 更新模式跳过 1、2 阶段，直接复用缓存输出，进度从 10 跳到 50。
//! 任何阶段的错误只在 `run` 顶层捕获一次：Job 标记为 failed，不再向外传播。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::approval::ApprovalDecision;
use crate::core::locks::run_key;
use crate::core::supervisor::RunSupervisor;
use crate::core::PipelineError;
use crate::jobs::{Job, JobId, JobLedger, JobStage, JobStatus, JobUpdate};
use crate::llm::{CompletionClient, CompletionContext, CompletionOptions, CompletionOutput};
use crate::observability::PipelineObserver;
use crate::path::{
    canonicalize_path, extract_competencies, filter_breakdown, summarize_violations,
    validate_path, CanonicalLearningPath, CanonicalizeContext, CompetencyRecord, RawSkillData,
    SkillBreakdownMap, SkillsGap,
};
use crate::prompts::{
    render_template, PromptSource, COMPETENCY_IDENTIFICATION, PATH_CREATION, SKILL_EXPANSION,
};
use crate::services::{
    fallback_breakdown, ApprovalPolicy, ApprovalRequester, BreakdownOptions, ExamStatus,
    ExpansionRecord, ExpansionStore, ExpansionUpdate, GapRecord, LearningPathRecord,
    LearningPathStore, PathStatus, SkillsGapStore, SkillsTaxonomy,
};

/// generate 的同步返回
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReceipt {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Full,
    Update,
}

/// 写入 Job.result 的运行摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub learning_path_id: String,
    pub mode: RunMode,
    pub path_status: PathStatus,
    pub approval: String,
    pub competencies: Vec<String>,
    pub used_fallback_breakdown: bool,
    /// 校验重试耗尽时为 false，路径仍会被保存
    pub validation_passed: bool,
    pub validation_attempts: u32,
    pub validation_errors: Vec<String>,
    pub learning_path: CanonicalLearningPath,
}

/// 流水线参数
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_validation_attempts: u32,
    pub completion: CompletionOptions,
    pub breakdown: BreakdownOptions,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_validation_attempts: 3,
            completion: CompletionOptions::default(),
            breakdown: BreakdownOptions::default(),
        }
    }
}

/// 编排器依赖的全部协作方
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn JobLedger>,
    pub llm: Arc<dyn CompletionClient>,
    pub prompts: Arc<dyn PromptSource>,
    pub taxonomy: Arc<dyn SkillsTaxonomy>,
    pub paths: Arc<dyn LearningPathStore>,
    pub gaps: Arc<dyn SkillsGapStore>,
    pub expansions: Arc<dyn ExpansionStore>,
    pub policy: Arc<dyn ApprovalPolicy>,
    pub approvals: Arc<dyn ApprovalRequester>,
    pub observer: Arc<dyn PipelineObserver>,
}

/// 模式判定结果
enum Plan {
    Full,
    Update {
        expansion_id: String,
        stage1: Value,
        stage2: Value,
    },
}

/// 模式判定阶段读到的最新数据
struct Snapshot {
    gap_id: String,
    raw: RawSkillData,
    exam_status: Option<ExamStatus>,
    has_existing_path: bool,
    plan: Plan,
}

/// 路径生成 + 校验循环的结果
struct Generated {
    path: CanonicalLearningPath,
    attempts: u32,
    errors: Vec<String>,
}

pub struct Pipeline {
    c: Collaborators,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        Self {
            c: collaborators,
            settings,
        }
    }

    /// 执行一次生成；错误在这里被吸收并写入 Job
    pub async fn run(&self, job_id: &JobId, gap: &SkillsGap) {
        match self.execute(job_id, gap).await {
            Ok(_) => self.c.observer.job_finished(job_id, JobStatus::Completed, None),
            Err(e) => {
                let message = e.to_string();
                if let Err(store_err) = self
                    .c
                    .ledger
                    .update(job_id, JobUpdate::failed(message.clone()))
                    .await
                {
                    tracing::error!(job_id = %job_id, error = %store_err, "failed to record job failure");
                }
                self.c
                    .observer
                    .job_finished(job_id, JobStatus::Failed, Some(&message));
            }
        }
    }

    pub async fn execute(&self, job_id: &JobId, gap: &SkillsGap) -> Result<RunSummary, PipelineError> {
        let observer = &self.c.observer;

        observer.stage_started(job_id, JobStage::SkillExpansion);
        let snapshot = self.decide_mode(gap).await?;
        self.c
            .ledger
            .update(
                job_id,
                JobUpdate::stage(JobStage::SkillExpansion, 10).with_status(JobStatus::Processing),
            )
            .await?;

        let (mode, stage1, stage2) = match snapshot.plan {
            Plan::Update {
                ref expansion_id,
                ref stage1,
                ref stage2,
            } => {
                // 沿用的第 1 阶段输出原样回写
                self.c
                    .expansions
                    .update(expansion_id, ExpansionUpdate::stage1(stage1.clone()))
                    .await?;
                self.advance(job_id, JobStage::CompetencyIdentification, JobStage::SkillBreakdown, 50)
                    .await?;
                (RunMode::Update, stage1.clone(), stage2.clone())
            }
            Plan::Full => {
                let (stage1, stage2) = self.expand_and_identify(job_id, gap, &snapshot).await?;
                (RunMode::Full, stage1, stage2)
            }
        };

        let mut competencies = competencies_from(&stage1, &stage2, &gap.competency_target_name);

        // 阶段 3
        let (mut breakdown, used_fallback) = self.break_down(job_id, &competencies).await;
        if mode == RunMode::Update {
            breakdown = filter_breakdown(&breakdown, &snapshot.raw.skill_names());
            competencies.retain(|c| {
                breakdown
                    .keys()
                    .any(|name| name.eq_ignore_ascii_case(&c.name))
            });
        }
        self.advance(job_id, JobStage::SkillBreakdown, JobStage::PathCreation, 70)
            .await?;

        // 阶段 4
        let generated = self
            .create_path(job_id, gap, &snapshot.raw, &competencies, &breakdown)
            .await?;
        observer.stage_completed(job_id, JobStage::PathCreation, 70);

        // 阶段 5
        let decision = ApprovalDecision::decide(
            self.c.policy.as_ref(),
            &gap.company_id,
            snapshot.has_existing_path,
            snapshot.exam_status,
        )
        .await?;
        let record = self
            .c
            .paths
            .save(LearningPathRecord::new(
                gap.competency_target_name.clone(),
                gap.user_id.clone(),
                gap.company_id.clone(),
                generated.path.clone(),
                decision.path_status(),
            ))
            .await?;

        let summary = RunSummary {
            learning_path_id: record.id.clone(),
            mode,
            path_status: record.status,
            approval: decision.as_str().to_string(),
            competencies: competencies.iter().map(|c| c.name.clone()).collect(),
            used_fallback_breakdown: used_fallback,
            validation_passed: generated.errors.is_empty(),
            validation_attempts: generated.attempts,
            validation_errors: generated.errors,
            learning_path: generated.path,
        };
        self.c
            .ledger
            .update(job_id, JobUpdate::completed(serde_json::to_value(&summary)?))
            .await?;
        observer.stage_completed(job_id, JobStage::Completed, 100);

        if let Err(e) = decision.hand_off(self.c.approvals.as_ref(), &record).await {
            observer.handoff_failed(job_id, &e.to_string());
        }
        Ok(summary)
    }

    /// 重新读取原始技能数据，判定全量 / 更新模式
    async fn decide_mode(&self, gap: &SkillsGap) -> Result<Snapshot, PipelineError> {
        let fresh: Option<GapRecord> = self
            .c
            .gaps
            .get_by_user(&gap.user_id)
            .await?
            .into_iter()
            .rev()
            .find(|r| r.competency_target_name == gap.competency_target_name);

        let (gap_id, raw, exam_status) = match fresh {
            Some(record) => (record.gap_id, record.raw_skill_data, record.exam_status),
            None => (
                gap.competency_target_name.clone(),
                RawSkillData::from(gap),
                None,
            ),
        };

        let has_existing_path = self
            .c
            .paths
            .get_by_id(&gap.competency_target_name)
            .await?
            .is_some();

        let plan = if has_existing_path {
            match self
                .c
                .expansions
                .get_latest_by_user_and_gap(&gap.user_id, &gap_id)
                .await?
            {
                Some(ExpansionRecord {
                    expansion_id,
                    stage1_output: Some(stage1),
                    stage2_output: Some(stage2),
                    ..
                }) => Plan::Update {
                    expansion_id,
                    stage1,
                    stage2,
                },
                _ => Plan::Full,
            }
        } else {
            Plan::Full
        };

        Ok(Snapshot {
            gap_id,
            raw,
            exam_status,
            has_existing_path,
            plan,
        })
    }

    /// 阶段 1、2：新建扩展缓存，逐阶段调用 AI 并写回
    async fn expand_and_identify(
        &self,
        job_id: &JobId,
        gap: &SkillsGap,
        snapshot: &Snapshot,
    ) -> Result<(Value, Value), PipelineError> {
        let record = self
            .c
            .expansions
            .create(ExpansionRecord::new(&snapshot.gap_id, &gap.user_id))
            .await?;

        let template = self.c.prompts.load(SKILL_EXPANSION).await?;
        let prompt = render_template(
            &template,
            &[
                ("learnerId", gap.user_id.clone()),
                ("competencyTargetName", gap.competency_target_name.clone()),
                ("microSkills", snapshot.raw.micro_skills.join(", ")),
                ("nanoSkills", snapshot.raw.nano_skills.join(", ")),
            ],
        );
        let stage1 = self
            .complete(job_id, &gap.user_id, JobStage::SkillExpansion, 1, &prompt)
            .await?
            .into_value();
        self.c
            .expansions
            .update(&record.expansion_id, ExpansionUpdate::stage1(stage1.clone()))
            .await?;
        self.advance(job_id, JobStage::SkillExpansion, JobStage::CompetencyIdentification, 30)
            .await?;

        let template = self.c.prompts.load(COMPETENCY_IDENTIFICATION).await?;
        let prompt = render_template(
            &template,
            &[
                ("learnerId", gap.user_id.clone()),
                ("competencyTargetName", gap.competency_target_name.clone()),
                ("expandedCompetencies", serde_json::to_string_pretty(&stage1)?),
            ],
        );
        let stage2 = self
            .complete(job_id, &gap.user_id, JobStage::CompetencyIdentification, 1, &prompt)
            .await?
            .into_value();
        self.c
            .expansions
            .update(&record.expansion_id, ExpansionUpdate::stage2(stage2.clone()))
            .await?;
        self.advance(job_id, JobStage::CompetencyIdentification, JobStage::SkillBreakdown, 50)
            .await?;

        Ok((stage1, stage2))
    }

    /// 阶段 3：分类服务失败时强制回退，回退也失败则用本地确定性数据
    async fn break_down(
        &self,
        job_id: &JobId,
        competencies: &[CompetencyRecord],
    ) -> (SkillBreakdownMap, bool) {
        let options = self.settings.breakdown;
        match self.c.taxonomy.breakdown(competencies, &options).await {
            Ok(map) => (map, false),
            Err(e) => {
                self.c.observer.fallback_used(job_id, &e.to_string());
                let forced = BreakdownOptions {
                    use_fallback: true,
                    ..options
                };
                match self.c.taxonomy.breakdown(competencies, &forced).await {
                    Ok(map) => (map, true),
                    Err(e) => {
                        self.c.observer.fallback_used(job_id, &e.to_string());
                        (fallback_breakdown(competencies), true)
                    }
                }
            }
        }
    }

    /// 阶段 4：生成、规范化、校验；未通过时把违规摘要附加到 prompt 重试
    async fn create_path(
        &self,
        job_id: &JobId,
        gap: &SkillsGap,
        raw: &RawSkillData,
        competencies: &[CompetencyRecord],
        breakdown: &SkillBreakdownMap,
    ) -> Result<Generated, PipelineError> {
        let gap_data = json!({
            "userId": gap.user_id,
            "companyId": gap.company_id,
            "competencyTargetName": gap.competency_target_name,
            "requested": RawSkillData::from(gap),
            "current": raw,
        });
        let template = self.c.prompts.load(PATH_CREATION).await?;
        let base_prompt = render_template(
            &template,
            &[
                ("learnerId", gap.user_id.clone()),
                ("competencyTargetName", gap.competency_target_name.clone()),
                ("gapData", serde_json::to_string_pretty(&gap_data)?),
                ("competencies", serde_json::to_string_pretty(competencies)?),
                ("skillBreakdown", serde_json::to_string_pretty(breakdown)?),
            ],
        );
        let ctx = CanonicalizeContext {
            learner_id: &gap.user_id,
            fallback_title: &gap.competency_target_name,
        };

        let max_attempts = self.settings.max_validation_attempts.max(1);
        let mut prompt = base_prompt.clone();
        let mut attempt = 0;
        let mut last: Option<Generated> = None;
        loop {
            attempt += 1;
            let output = self
                .complete(job_id, &gap.user_id, JobStage::PathCreation, attempt, &prompt)
                .await?;
            // 无法解析的输出也计入尝试次数
            let errors = match canonicalize_path(&output, &ctx) {
                Ok(path) => {
                    let validation = validate_path(&path);
                    if validation.valid {
                        return Ok(Generated {
                            path,
                            attempts: attempt,
                            errors: Vec::new(),
                        });
                    }
                    last = Some(Generated {
                        path,
                        attempts: attempt,
                        errors: validation.errors.clone(),
                    });
                    validation.errors
                }
                Err(e) if attempt < max_attempts || last.is_some() => {
                    vec![format!("Output could not be read as a learning path: {e}")]
                }
                Err(e) => return Err(e.into()),
            };

            self.c.observer.validation_failed(job_id, attempt, &errors);
            if attempt >= max_attempts {
                // 最后一次无法解析且此前没有路径时已在上面返回，这里 last 必然存在
                if let Some(generated) = last.take() {
                    tracing::warn!(
                        job_id = %job_id,
                        attempts = attempt,
                        "validation attempts exhausted, keeping last generated path"
                    );
                    return Ok(Generated {
                        attempts: attempt,
                        ..generated
                    });
                }
            }
            prompt = format!("{base_prompt}\n\n{}", summarize_violations(&errors));
        }
    }

    async fn complete(
        &self,
        job_id: &JobId,
        user_id: &str,
        stage: JobStage,
        attempt: u32,
        prompt: &str,
    ) -> Result<CompletionOutput, PipelineError> {
        let context = CompletionContext {
            job_id: job_id.clone(),
            user_id: user_id.to_string(),
            stage,
            attempt,
        };
        self.c
            .llm
            .complete(prompt, &context, &self.settings.completion)
            .await
            .map_err(|e| PipelineError::completion(stage, e))
    }

    /// 写入下一阶段与进度，并报告阶段完成
    async fn advance(
        &self,
        job_id: &JobId,
        finished: JobStage,
        next: JobStage,
        progress: u8,
    ) -> Result<(), PipelineError> {
        self.c
            .ledger
            .update(job_id, JobUpdate::stage(next, progress))
            .await?;
        self.c.observer.stage_completed(job_id, finished, progress);
        self.c.observer.stage_started(job_id, next);
        Ok(())
    }
}

/// 第 2 阶段优先，其次第 1 阶段，都提取不到时退回目标能力本身
fn competencies_from(stage1: &Value, stage2: &Value, target: &str) -> Vec<CompetencyRecord> {
    let identified = extract_competencies(stage2);
    if !identified.is_empty() {
        return identified;
    }
    let expanded = extract_competencies(stage1);
    if !expanded.is_empty() {
        return expanded;
    }
    vec![CompetencyRecord::named(target)]
}

/// 对外入口：接收请求、创建 Job、后台调度运行
pub struct PathGenerator {
    pipeline: Arc<Pipeline>,
    ledger: Arc<dyn JobLedger>,
    supervisor: Arc<RunSupervisor>,
}

impl PathGenerator {
    pub fn new(pipeline: Arc<Pipeline>, supervisor: Arc<RunSupervisor>) -> Self {
        let ledger = pipeline.c.ledger.clone();
        Self {
            pipeline,
            ledger,
            supervisor,
        }
    }

    pub fn supervisor(&self) -> &Arc<RunSupervisor> {
        &self.supervisor
    }

    pub fn ledger(&self) -> &Arc<dyn JobLedger> {
        &self.ledger
    }

    /// 校验必填字段并创建 pending Job；运行在后台进行，这里不等待
    pub async fn generate(&self, gap: SkillsGap) -> Result<JobReceipt, PipelineError> {
        let missing = gap.missing_fields();
        if !missing.is_empty() {
            return Err(PipelineError::MissingFields(missing.join(", ")));
        }

        let job = self
            .ledger
            .create(Job::new(
                gap.user_id.clone(),
                gap.company_id.clone(),
                gap.competency_target_name.clone(),
            ))
            .await?;
        let receipt = JobReceipt {
            job_id: job.id.clone(),
            status: job.status,
        };

        let pipeline = self.pipeline.clone();
        let key = run_key(&gap.user_id, &gap.competency_target_name);
        let job_id = job.id;
        self.supervisor.spawn(job_id.clone(), key, async move {
            pipeline.run(&job_id, &gap).await;
        });

        tracing::info!(job_id = %receipt.job_id, "learning path generation accepted");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_competencies_prefer_stage2() {
        let stage1 = json!({"expanded_competencies_list": ["A", "B"]});
        let stage2 = json!({"competencies": ["C"]});
        let names: Vec<String> = competencies_from(&stage1, &stage2, "T")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["C"]);
    }

    #[test]
    fn test_competencies_fall_back_to_stage1_then_target() {
        let stage1 = json!({"expanded_competencies_list": ["A"]});
        let names: Vec<String> = competencies_from(&stage1, &json!("garbled"), "T")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["A"]);

        let records = competencies_from(&json!(null), &json!({}), "Frontend");
        assert_eq!(records, vec![CompetencyRecord::named("Frontend")]);
    }

    #[test]
    fn test_summary_serializes_validation_flag() {
        let summary = RunSummary {
            learning_path_id: "Frontend".into(),
            mode: RunMode::Update,
            path_status: PathStatus::Pending,
            approval: "requires-approval".into(),
            competencies: vec![],
            used_fallback_breakdown: false,
            validation_passed: false,
            validation_attempts: 3,
            validation_errors: vec!["x".into()],
            learning_path: CanonicalLearningPath {
                path_title: "t".into(),
                learner_id: "u".into(),
                total_estimated_duration_hours: 0.0,
                learning_modules: vec![],
            },
        };
        let v = serde_json::to_value(&summary).unwrap();
        assert_eq!(v["mode"], "update");
        assert_eq!(v["pathStatus"], "pending");
        assert_eq!(v["validationPassed"], false);
    }
}
