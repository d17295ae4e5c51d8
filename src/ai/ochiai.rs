//! Ochiai format: a six question summary layout for research papers.

use regex::Regex;

use crate::models::OchiaiSections;

pub const SYSTEM_PROMPT: &str = "あなたは研究論文や技術記事の要約を専門とするAIアシスタントです。落合フォーマットに従って、正確な要約を作成してください。";

pub const HEADINGS: [&str; 6] = [
    "どんなもの？",
    "先行研究と比べてどこがすごい？",
    "技術や手法のキモはどこ？",
    "どうやって有効だと検証した？",
    "議論はある？",
    "次読むべき論文は？",
];

/// Truncates to at most `limit` characters without splitting a code point.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn build_prompt(title: &str, url: &str, description: &str, limit: usize) -> String {
    let headings = HEADINGS
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{}. {}", i + 1, h))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "以下の記事を落合フォーマットで要約してください。落合フォーマットは以下の6つの観点で構成されます：\n\n\
         {headings}\n\n\
         記事情報：\n\
         タイトル: {title}\n\
         URL: {url}\n\n\
         内容:\n\
         {content}\n\n\
         要約は日本語で、各観点について簡潔にまとめてください。技術的な内容の場合は専門用語も適切に使用して。\n\
         必ず各セクションを「1. どんなもの？」のように番号付きで明確に区切って。あと書き言葉で書いて。",
        headings = headings,
        title = title,
        url = url,
        content = truncate_chars(description, limit),
    )
}

/// Splits a summary into its six sections. Each section runs from its
/// numbered heading to the next heading; a missing heading yields an empty
/// section.
pub fn parse_sections(summary: &str) -> OchiaiSections {
    let mut found: Vec<(usize, usize, usize)> = Vec::new();
    for (i, heading) in HEADINGS.iter().enumerate() {
        let pattern = format!(r"{}\.\s*{}", i + 1, regex::escape(heading));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        if let Some(m) = re.find(summary) {
            found.push((i, m.start(), m.end()));
        }
    }

    let mut sections: [String; 6] = Default::default();
    for (i, _, body_start) in &found {
        let body_end = found
            .iter()
            .map(|(_, start, _)| *start)
            .filter(|start| start > body_start)
            .min()
            .unwrap_or(summary.len());
        sections[*i] = clean_section(&summary[*body_start..body_end]);
    }

    let [overview, comparison, technique, validation, discussion, next_papers] = sections;
    OchiaiSections {
        overview,
        comparison,
        technique,
        validation,
        discussion,
        next_papers,
    }
}

// Drops markdown emphasis and heading markers left around the heading text.
fn clean_section(raw: &str) -> String {
    raw.trim_start_matches(|c: char| c == '*' || c == ':' || c == '：' || c.is_whitespace())
        .trim_end_matches(|c: char| c == '*' || c == '#' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = "1. どんなもの？\n大規模言語モデルのエージェント。\n\n\
        2. 先行研究と比べてどこがすごい？\n計画能力が高い。\n\n\
        **3. 技術や手法のキモはどこ？**\n木探索。\n\n\
        4. どうやって有効だと検証した？\nベンチマーク。\n\n\
        5. 議論はある？\nコストが高い。\n\n\
        6. 次読むべき論文は？\nReAct";

    #[test]
    fn test_parse_all_sections() {
        let sections = parse_sections(SUMMARY);
        assert_eq!(sections.overview, "大規模言語モデルのエージェント。");
        assert_eq!(sections.comparison, "計画能力が高い。");
        assert_eq!(sections.technique, "木探索。");
        assert_eq!(sections.validation, "ベンチマーク。");
        assert_eq!(sections.discussion, "コストが高い。");
        assert_eq!(sections.next_papers, "ReAct");
    }

    #[test]
    fn test_missing_sections_are_empty() {
        let sections = parse_sections("1. どんなもの？ 概要だけ\n6. 次読むべき論文は？ なし");
        assert_eq!(sections.overview, "概要だけ");
        assert_eq!(sections.comparison, "");
        assert_eq!(sections.discussion, "");
        assert_eq!(sections.next_papers, "なし");

        assert_eq!(parse_sections("free text"), OchiaiSections::default());
    }

    #[test]
    fn test_prompt_truncates_by_characters() {
        assert_eq!(truncate_chars("論文要約", 2), "論文");
        assert_eq!(truncate_chars("abc", 10), "abc");

        let prompt = build_prompt("Title", "https://example.com", "あいうえお", 3);
        assert!(prompt.contains("タイトル: Title"));
        assert!(prompt.contains("内容:\nあいう\n"));
        assert!(prompt.contains("6. 次読むべき論文は？"));
    }
}
