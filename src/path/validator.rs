//! 学习路径校验：教学法不变量
//!
//! 五项检查彼此独立且全部执行，收集所有违规而不是遇到第一条就停：
//! 1. 模块序号为 1..n
//! 2. 模块平均难度不下降（无技能的模块不参与比较）
//! 3. 模块内步骤序号为 1..m
//! 4. skillsInModule 与步骤 skillsCovered 一致（顺序 + 双向集合相等）
//! 5. 全路径范围内每个技能最多被覆盖一次

use std::collections::{HashMap, HashSet};

use crate::path::difficulty::average_difficulty;
use crate::path::model::{CanonicalLearningPath, LearningModule, ValidationResult};

pub fn validate_path(path: &CanonicalLearningPath) -> ValidationResult {
    let mut errors = Vec::new();
    check_module_order(path, &mut errors);
    check_difficulty_progression(path, &mut errors);
    check_step_order(path, &mut errors);
    for (index, module) in path.learning_modules.iter().enumerate() {
        check_skill_step_consistency(index + 1, module, &mut errors);
    }
    check_global_uniqueness(path, &mut errors);
    ValidationResult::from_errors(errors)
}

fn check_module_order(path: &CanonicalLearningPath, errors: &mut Vec<String>) {
    for (index, module) in path.learning_modules.iter().enumerate() {
        let expected = index as i64 + 1;
        if module.module_order != expected {
            errors.push(format!(
                "Module at position {} has moduleOrder {} (expected {})",
                index + 1,
                module.module_order,
                expected
            ));
        }
    }
}

fn check_difficulty_progression(path: &CanonicalLearningPath, errors: &mut Vec<String>) {
    let mut previous: Option<(usize, f64)> = None;
    for (index, module) in path.learning_modules.iter().enumerate() {
        let Some(avg) = average_difficulty(&module.difficulty_skills()) else {
            continue;
        };
        if let Some((prev_index, prev_avg)) = previous {
            if avg < prev_avg {
                errors.push(format!(
                    "Module {} (\"{}\") has average difficulty {:.2}, lower than module {} ({:.2}); modules must not get easier",
                    index + 1,
                    module.module_title,
                    avg,
                    prev_index + 1,
                    prev_avg
                ));
            }
        }
        previous = Some((index, avg));
    }
}

fn check_step_order(path: &CanonicalLearningPath, errors: &mut Vec<String>) {
    for (index, module) in path.learning_modules.iter().enumerate() {
        for (j, step) in module.steps().iter().enumerate() {
            let expected = j as i64 + 1;
            if step.step != expected {
                errors.push(format!(
                    "Module {}: step at position {} is numbered {} (expected {})",
                    index + 1,
                    j + 1,
                    step.step,
                    expected
                ));
            }
        }
    }
}

/// 只对同时声明了 skillsInModule 和 steps 的模块检查
fn check_skill_step_consistency(position: usize, module: &LearningModule, errors: &mut Vec<String>) {
    let steps = module.steps();
    if module.skills_in_module.is_empty() || steps.is_empty() {
        return;
    }

    let declared = first_appearance(module.skills_in_module.iter().map(String::as_str));
    let introduced = first_appearance(
        steps
            .iter()
            .flat_map(|s| s.skills_covered.iter().map(String::as_str)),
    );
    let declared_set: HashSet<&str> = declared.iter().copied().collect();
    let introduced_set: HashSet<&str> = introduced.iter().copied().collect();

    // 顺序只比较两边都有的技能，缺失 / 多余单独报告
    let declared_common: Vec<&str> = declared
        .iter()
        .copied()
        .filter(|s| introduced_set.contains(s))
        .collect();
    let introduced_common: Vec<&str> = introduced
        .iter()
        .copied()
        .filter(|s| declared_set.contains(s))
        .collect();
    if !is_subsequence(&declared_common, &introduced_common) {
        errors.push(format!(
            "Module {}: skillsInModule order [{}] does not match the order skills are introduced in its steps [{}]",
            position,
            declared_common.join(", "),
            introduced_common.join(", ")
        ));
    }

    for skill in declared.iter().filter(|s| !introduced_set.contains(*s)) {
        errors.push(format!(
            "Module {position}: skill \"{skill}\" is listed in skillsInModule but not covered by any step"
        ));
    }
    for skill in introduced.iter().filter(|s| !declared_set.contains(*s)) {
        errors.push(format!(
            "Module {position}: skill \"{skill}\" is covered by a step but missing from skillsInModule"
        ));
    }
}

fn check_global_uniqueness(path: &CanonicalLearningPath, errors: &mut Vec<String>) {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for skill in path
        .learning_modules
        .iter()
        .flat_map(|m| m.steps().iter())
        .flat_map(|s| s.skills_covered.iter())
    {
        let count = counts.entry(skill.as_str()).or_insert(0);
        if *count == 0 {
            order.push(skill.as_str());
        }
        *count += 1;
    }

    for skill in order {
        let count = counts[skill];
        if count > 1 {
            errors.push(format!(
                "Skill \"{skill}\" is covered {count} times across the path; each skill may be covered at most once"
            ));
        }
    }
}

fn first_appearance<'a>(skills: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    skills.filter(|s| seen.insert(*s)).collect()
}

fn is_subsequence(needle: &[&str], haystack: &[&str]) -> bool {
    let mut rest = haystack.iter();
    needle.iter().all(|n| rest.any(|h| h == n))
}

/// 把违规列表整理成附加到下一次 prompt 的反馈
pub fn summarize_violations(errors: &[String]) -> String {
    let mut summary = String::from(
        "The previous learning path was rejected because it violated these rules:\n",
    );
    for (i, error) in errors.iter().enumerate() {
        summary.push_str(&format!("{}. {}\n", i + 1, error));
    }
    summary.push_str("Fix every issue above and return the complete corrected learning path as JSON.");
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::model::LearningStep;

    fn step(n: i64, skills: &[&str]) -> LearningStep {
        LearningStep {
            step: n,
            title: format!("Step {n}"),
            description: String::new(),
            estimated_time: "1 hour".into(),
            skills_covered: skills.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn module(order: i64, skills: &[&str], steps: Vec<LearningStep>) -> LearningModule {
        LearningModule {
            module_order: order,
            module_title: format!("Module {order}"),
            estimated_duration_hours: 1.0,
            skills_in_module: skills.iter().map(|s| s.to_string()).collect(),
            steps: Some(steps),
        }
    }

    fn path(modules: Vec<LearningModule>) -> CanonicalLearningPath {
        CanonicalLearningPath {
            path_title: "Test".into(),
            learner_id: "u1".into(),
            total_estimated_duration_hours: 2.0,
            learning_modules: modules,
        }
    }

    #[test]
    fn test_valid_path() {
        let p = path(vec![
            module(1, &["Syntax Basics"], vec![step(1, &["Syntax Basics"])]),
            module(2, &["Hooks", "Routing"], vec![step(1, &["Hooks"]), step(2, &["Routing"])]),
            module(3, &["Design Patterns"], vec![step(1, &["Design Patterns"])]),
        ]);
        let result = validate_path(&p);
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn test_module_order_violation_names_position_and_value() {
        let p = path(vec![
            module(1, &["Hooks"], vec![step(1, &["Hooks"])]),
            module(3, &["Routing"], vec![step(1, &["Routing"])]),
        ]);
        let result = validate_path(&p);
        assert_eq!(result.errors.len(), 1, "{:?}", result.errors);
        assert!(result.errors[0].contains("position 2"));
        assert!(result.errors[0].contains("moduleOrder 3"));
    }

    #[test]
    fn test_global_uniqueness_reports_count() {
        let p = path(vec![
            module(1, &["Hooks"], vec![step(1, &["Hooks"])]),
            module(2, &["Hooks"], vec![step(1, &["Hooks"])]),
        ]);
        let result = validate_path(&p);
        assert_eq!(result.errors.len(), 1, "{:?}", result.errors);
        assert!(result.errors[0].contains("\"Hooks\""));
        assert!(result.errors[0].contains("covered 2 times"));
    }

    #[test]
    fn test_difficulty_must_not_decrease() {
        let p = path(vec![
            module(1, &["Advanced Generics"], vec![step(1, &["Advanced Generics"])]),
            module(2, &[], vec![]),
            module(3, &["Syntax"], vec![step(1, &["Syntax"])]),
        ]);
        let result = validate_path(&p);
        assert_eq!(result.errors.len(), 1, "{:?}", result.errors);
        assert!(result.errors[0].contains("Module 3"));
        assert!(result.errors[0].contains("lower than module 1"));
    }

    #[test]
    fn test_step_order() {
        let p = path(vec![module(
            1,
            &["Hooks", "Routing"],
            vec![step(1, &["Hooks"]), step(3, &["Routing"])],
        )]);
        let result = validate_path(&p);
        assert_eq!(
            result.errors,
            vec!["Module 1: step at position 2 is numbered 3 (expected 2)".to_string()]
        );
    }

    #[test]
    fn test_skill_step_consistency() {
        let p = path(vec![module(
            1,
            &["Routing", "Hooks", "Testing"],
            vec![step(1, &["Hooks"]), step(2, &["Routing", "State"])],
        )]);
        let errors = validate_path(&p).errors;
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(errors[0].contains("order"));
        assert!(errors[1].contains("\"Testing\" is listed"));
        assert!(errors[2].contains("\"State\" is covered"));
    }

    #[test]
    fn test_consistency_needs_both_skills_and_steps() {
        // 未声明 skillsInModule 时，步骤覆盖的技能不算多余
        let undeclared = path(vec![module(1, &[], vec![step(1, &["Hooks"]), step(2, &["Routing"])])]);
        let result = validate_path(&undeclared);
        assert!(result.valid, "{:?}", result.errors);

        let mut no_steps = module(1, &["Hooks", "Routing"], vec![]);
        no_steps.steps = None;
        let result = validate_path(&path(vec![no_steps]));
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn test_all_checks_run() {
        let p = path(vec![
            module(2, &["Hooks"], vec![step(2, &["Hooks"])]),
            module(1, &["Hooks"], vec![step(1, &["Hooks"])]),
        ]);
        let errors = validate_path(&p).errors;
        // 序号 x2、步骤序号、全局重复
        assert_eq!(errors.len(), 4, "{errors:?}");
    }

    #[test]
    fn test_summary_lists_every_violation() {
        let summary = summarize_violations(&["first".into(), "second".into()]);
        assert!(summary.contains("1. first"));
        assert!(summary.contains("2. second"));
    }
}
