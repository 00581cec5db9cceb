//! 学习路径领域层：数据模型与纯函数辅助（难度、规范化、校验、过滤、能力提取）

pub mod canonical;
pub mod competency;
pub mod difficulty;
pub mod model;
pub mod skill_filter;
pub mod validator;

pub use canonical::{
    canonicalize_path, canonicalize_value, detect_path_shape, CanonicalizeContext,
    CanonicalizeError, PathShape,
};
pub use competency::{detect_competency_shape, extract_competencies, CompetencyShape};
pub use difficulty::{average_difficulty, difficulty_of, Difficulty};
pub use model::{
    CanonicalLearningPath, CompetencyRecord, LearningModule, LearningStep, RawSkillData,
    SkillBreakdown, SkillBreakdownMap, SkillsGap, ValidationResult,
};
pub use skill_filter::filter_breakdown;
pub use validator::{summarize_violations, validate_path};
