//! 难度启发式：按技能名中的关键词粗分为 基础 / 中级 / 高级
//!
//! 纯模式匹配，不查询任何技能知识库，新术语可能被误判。

/// 基础类关键词（命中即为 1）
pub const FOUNDATIONAL_KEYWORDS: &[&str] = &[
    "basic",
    "intro",
    "fundamentals",
    "fundamental",
    "syntax",
    "variables",
    "data types",
    "getting started",
    "beginner",
    "overview",
    "setup",
    "installation",
    "hello world",
];

/// 高级类关键词（命中即为 3）
pub const ADVANCED_KEYWORDS: &[&str] = &[
    "advanced",
    "optimization",
    "optimisation",
    "performance tuning",
    "concurrency",
    "parallel",
    "architecture",
    "design patterns",
    "generics",
    "metaprogramming",
    "scalability",
    "distributed",
    "internals",
    "memory management",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Difficulty {
    Foundational = 1,
    Intermediate = 2,
    Advanced = 3,
}

impl Difficulty {
    pub fn score(self) -> u8 {
        self as u8
    }
}

/// 技能名 -> 难度；基础关键词优先于高级关键词，均未命中为中级
pub fn difficulty_of(skill: &str) -> Difficulty {
    let lower = skill.to_lowercase();
    if FOUNDATIONAL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        Difficulty::Foundational
    } else if ADVANCED_KEYWORDS.iter().any(|k| lower.contains(k)) {
        Difficulty::Advanced
    } else {
        Difficulty::Intermediate
    }
}

/// 一组技能的平均难度；空集合返回 None
pub fn average_difficulty<S: AsRef<str>>(skills: &[S]) -> Option<f64> {
    if skills.is_empty() {
        return None;
    }
    let total: u32 = skills
        .iter()
        .map(|s| u32::from(difficulty_of(s.as_ref()).score()))
        .sum();
    Some(f64::from(total) / skills.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_classification() {
        assert_eq!(difficulty_of("JavaScript Basics"), Difficulty::Foundational);
        assert_eq!(difficulty_of("Intro to SQL"), Difficulty::Foundational);
        assert_eq!(difficulty_of("Rust Generics"), Difficulty::Advanced);
        assert_eq!(difficulty_of("Query OPTIMIZATION"), Difficulty::Advanced);
        assert_eq!(difficulty_of("React Hooks"), Difficulty::Intermediate);
    }

    #[test]
    fn test_foundational_wins_over_advanced() {
        assert_eq!(
            difficulty_of("Concurrency Fundamentals"),
            Difficulty::Foundational
        );
    }

    #[test]
    fn test_average_difficulty() {
        assert_eq!(average_difficulty::<&str>(&[]), None);
        let avg = average_difficulty(&["Syntax", "Design Patterns"]).unwrap();
        assert!((avg - 2.0).abs() < f64::EPSILON);
    }
}
