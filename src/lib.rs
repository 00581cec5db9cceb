//! pathgen - 学习路径生成流水线
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、运行监管、按键互斥、审批决策、错误类型
//! - **jobs**: Job 台账（内存 / SQLite）
//! - **llm**: 补全客户端抽象与实现（OpenAI 兼容 / DeepSeek / Scripted）
//! - **observability**: 日志初始化与流水线事件观察者
//! - **path**: 领域模型与纯函数（难度、规范化、校验、过滤、能力提取）
//! - **prompts**: prompt 模板加载与占位符替换
//! - **services**: 外部协作方契约与内存实现、技能分类服务客户端

pub mod config;
pub mod core;
pub mod jobs;
pub mod llm;
pub mod observability;
pub mod path;
pub mod prompts;
pub mod services;

pub use crate::core::{PathGenerator, PipelineBuilder, PipelineError};
pub use crate::path::SkillsGap;
