//! Answer post-processing.
//!
//! Once a turn finalizes, the accumulated answer text is split into semantic
//! sections, each with a derived title, a confidence heuristic and topical
//! tags. The keyword and vocabulary lists are configuration data tuned for
//! Chinese agrochemical text, not hard-coded logic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const BASE_CONFIDENCE: f32 = 0.7;
const CONFIDENCE_STEP: f32 = 0.1;
const MAX_CONFIDENCE: f32 = 0.99;

/// A structured result derived from one section of a finalized answer.
/// Computed once per finalized answer; immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Additive heuristic in `0.0..=0.99`.
    pub confidence_score: f32,
    pub tags: BTreeSet<String>,
}

/// Vocabulary and thresholds driving the post-processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Keywords whose presence marks a section as actionable advice.
    pub recommendation_keywords: Vec<String>,
    /// Dosage/percentage markers lending a section quantitative weight.
    pub dosage_markers: Vec<String>,
    /// Domain terms; a tag is attached iff it occurs verbatim in the body.
    pub tag_vocabulary: Vec<String>,
    /// A first line at most this many chars is usable verbatim as a title.
    pub max_verbatim_title_chars: usize,
    /// Section length beyond which the confidence bonus applies.
    pub long_section_chars: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            recommendation_keywords: vec!["推荐".to_string(), "建议".to_string()],
            dosage_markers: vec!["%".to_string(), "倍液".to_string()],
            tag_vocabulary: [
                "杀虫剂",
                "杀菌剂",
                "除草剂",
                "植物生长调节剂",
                "叶面肥",
                "水稻",
                "小麦",
                "玉米",
                "柑橘",
                "苹果",
                "稻瘟病",
                "白粉病",
                "纹枯病",
                "蚜虫",
                "红蜘蛛",
                "草甘膦",
                "三环唑",
                "吡唑醚菌酯",
                "阿维菌素",
                "戊唑醇",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_verbatim_title_chars: 50,
            long_section_chars: 200,
        }
    }
}

/// Splits a finalized answer into titled, tagged, confidence-scored results.
pub struct AnswerAnalyzer {
    config: AnalyzerConfig,
}

impl Default for AnswerAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

impl AnswerAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Derives structured results from a finalized answer.
    ///
    /// A blank answer produces exactly one synthetic result signaling
    /// failure (fixed low confidence, retry tag) rather than zero results,
    /// so the UI always has something to render with a retry affordance.
    pub fn analyze(&self, answer: &str) -> Vec<SearchResult> {
        if answer.trim().is_empty() {
            return vec![Self::retry_result()];
        }

        split_sections(answer)
            .into_iter()
            .enumerate()
            .map(|(index, section)| self.analyze_section(index, &section))
            .collect()
    }

    /// The fixed "no usable content" result for an empty answer.
    pub fn retry_result() -> SearchResult {
        SearchResult {
            id: uuid::Uuid::new_v4().to_string(),
            title: "未能获取有效解答".to_string(),
            content: "抱歉，本次搜索未能生成有效内容，请换个问法或稍后重试。".to_string(),
            confidence_score: 0.3,
            tags: BTreeSet::from(["重试".to_string()]),
        }
    }

    fn analyze_section(&self, index: usize, section: &str) -> SearchResult {
        SearchResult {
            id: uuid::Uuid::new_v4().to_string(),
            title: self.derive_title(section, index),
            content: section.to_string(),
            confidence_score: self.confidence(section),
            tags: self.extract_tags(section),
        }
    }

    /// Title resolution order: markdown heading, bold line,
    /// short-line-ending-in-colon, short first line verbatim, numbered
    /// fallback.
    fn derive_title(&self, section: &str, index: usize) -> String {
        let first_line = section.lines().next().unwrap_or("").trim();

        if let Some(heading) = first_line.strip_prefix('#') {
            let heading = heading.trim_start_matches('#').trim();
            if !heading.is_empty() {
                return heading.to_string();
            }
        }

        if first_line.len() > 4 {
            if let Some(bold) = first_line
                .strip_prefix("**")
                .and_then(|rest| rest.strip_suffix("**"))
            {
                let bold = bold.trim();
                if !bold.is_empty() {
                    return bold.to_string();
                }
            }
        }

        if let Some(label) = first_line
            .strip_suffix('：')
            .or_else(|| first_line.strip_suffix(':'))
        {
            let label = label.trim();
            if !label.is_empty() && label.chars().count() <= self.config.max_verbatim_title_chars {
                return label.to_string();
            }
        }

        if !first_line.is_empty()
            && first_line.chars().count() <= self.config.max_verbatim_title_chars
        {
            return first_line.to_string();
        }

        format!("解答 {}", index + 1)
    }

    /// Additive heuristic: 0.7 base, +0.1 for a long section, +0.1 for a
    /// recommendation keyword, +0.1 for a dosage/percentage marker, capped
    /// at 0.99.
    fn confidence(&self, section: &str) -> f32 {
        let mut score = BASE_CONFIDENCE;
        if section.chars().count() > self.config.long_section_chars {
            score += CONFIDENCE_STEP;
        }
        if self
            .config
            .recommendation_keywords
            .iter()
            .any(|k| section.contains(k.as_str()))
        {
            score += CONFIDENCE_STEP;
        }
        if self
            .config
            .dosage_markers
            .iter()
            .any(|m| section.contains(m.as_str()))
        {
            score += CONFIDENCE_STEP;
        }
        score.min(MAX_CONFIDENCE)
    }

    fn extract_tags(&self, section: &str) -> BTreeSet<String> {
        self.config
            .tag_vocabulary
            .iter()
            .filter(|term| section.contains(term.as_str()))
            .cloned()
            .collect()
    }
}

/// Splits on blank-line boundaries, dropping whitespace-only sections.
fn split_sections(answer: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();
    for line in answer.lines() {
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                sections.push(current.trim_end().to_string());
            }
            current.clear();
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        sections.push(current.trim_end().to_string());
    }
    sections
}
