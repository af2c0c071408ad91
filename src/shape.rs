//! # Shape
//!
//! §4.G: pure, side-effect-free response formatting. No donor
//! counterpart exists as a separate module — the donor's `search.rs`
//! inlines its own highlight/formatting helpers directly in
//! `SearchEngine`; this module is new, grounded on that same
//! highlight-helper pattern but extracted into a standalone,
//! side-effect-free component as §2 requires, and on
//! `original_source/vector_search.py`'s `reference` property for the
//! `§`-joined section reference shape.

use crate::domain::{Document, SearchHit, Section, SectionSummary, StructureNode, StructureType};
use std::cmp::Ordering;

/// One piece of a natural-sorted section id: a leading integer plus an
/// optional trailing letter, or a non-numeric string that always sorts last.
#[derive(Debug, Clone, PartialEq, Eq)]
enum IdPiece {
    Numeric(u64, Option<char>),
    Other(String),
}

impl PartialOrd for IdPiece {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdPiece {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IdPiece::Numeric(a, la), IdPiece::Numeric(b, lb)) => a.cmp(b).then(la.cmp(lb)),
            (IdPiece::Numeric(_, _), IdPiece::Other(_)) => Ordering::Less,
            (IdPiece::Other(_), IdPiece::Numeric(_, _)) => Ordering::Greater,
            (IdPiece::Other(a), IdPiece::Other(b)) => a.cmp(b),
        }
    }
}

fn parse_piece(piece: &str) -> IdPiece {
    let digits: String = piece.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return IdPiece::Other(piece.to_string());
    }
    let rest = &piece[digits.len()..];
    let letter = rest.chars().next().filter(|c| c.is_alphabetic());
    match digits.parse::<u64>() {
        Ok(n) => IdPiece::Numeric(n, letter),
        Err(_) => IdPiece::Other(piece.to_string()),
    }
}

/// Key for natural section-id sort: split on `.` and `-`, compare piece by
/// piece. `"1" < "1a" < "2" < "3-1" < "10"` and `"10" < "10a"`.
pub fn natural_sort_key(section_id: &str) -> Vec<IdPiece> {
    section_id
        .split(|c| c == '.' || c == '-')
        .map(parse_piece)
        .collect()
}

pub fn sort_sections_naturally(sections: &mut [SectionSummary]) {
    sections.sort_by(|a, b| natural_sort_key(&a.section_id).cmp(&natural_sort_key(&b.section_id)));
}

/// A single parsed `based_on` reference: the document it points at and an
/// optional section anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasedOnRef {
    pub doc_id: String,
    pub section: Option<String>,
}

/// Splits a raw `based_on` string on `(?=(lov|forskrift)/YYYY)` boundaries,
/// parses each chunk into `(doc_id, section?)`, groups by `doc_id`, and
/// renders: a single-section group as `doc_id § s`, multi-section as
/// `doc_id §§ s1, s2`, a bare doc (no section) as `doc_id`. Groups are joined
/// with `"; "`. Idempotent: re-running this on its own output reproduces it,
/// since the rendered form already matches the split/parse grammar for a
/// bare reference with at most one section per group collapsed to the
/// single-section shape.
pub fn format_based_on(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    let refs = parse_based_on(raw);
    if refs.is_empty() {
        return raw.trim().to_string();
    }

    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for r in refs {
        if let Some(existing) = groups.iter_mut().find(|(id, _)| *id == r.doc_id) {
            if let Some(s) = r.section {
                existing.1.push(s);
            }
        } else {
            groups.push((r.doc_id, r.section.into_iter().collect()));
        }
    }

    groups
        .into_iter()
        .map(|(doc_id, sections)| match sections.len() {
            0 => doc_id,
            1 => format!("{} § {}", doc_id, sections[0]),
            _ => format!("{} §§ {}", doc_id, sections.join(", ")),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Splits on document-id boundaries and extracts an optional `§`-introduced
/// section anchor from each chunk.
pub fn parse_based_on(raw: &str) -> Vec<BasedOnRef> {
    let boundary = regex::Regex::new(r"(lov/\d{4}|forskrift/\d{4})").unwrap();
    let mut starts: Vec<usize> = boundary.find_iter(raw).map(|m| m.start()).collect();
    if starts.is_empty() {
        return Vec::new();
    }
    starts.push(raw.len());

    let mut out = Vec::new();
    for window in starts.windows(2) {
        let chunk = raw[window[0]..window[1]].trim().trim_end_matches([';', ',']).trim();
        if chunk.is_empty() {
            continue;
        }
        out.extend(parse_single_ref(chunk));
    }
    out
}

/// Parses one document-id chunk into one `BasedOnRef` per comma-separated
/// section (`"lov/2005 § 14-1, 14-2"` yields two refs sharing `doc_id`), or a
/// single section-less ref when the chunk names no `§` at all.
fn parse_single_ref(chunk: &str) -> Vec<BasedOnRef> {
    if let Some(idx) = chunk.find('§') {
        let doc_id = chunk[..idx].trim().to_string();
        let sections_part = chunk[idx + '§'.len_utf8()..].trim();
        let sections: Vec<String> = sections_part
            .trim_start_matches('§')
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if sections.is_empty() {
            vec![BasedOnRef { doc_id, section: None }]
        } else {
            sections.into_iter().map(|section| BasedOnRef { doc_id: doc_id.clone(), section: Some(section) }).collect()
        }
    } else {
        vec![BasedOnRef { doc_id: chunk.trim().to_string(), section: None }]
    }
}

/// Source URL for a section, per scenario 1 of §8:
/// `https://lovdata.no/{dok_id}/§{section_id}`.
pub fn source_url(dok_id: &str, section_id: &str) -> String {
    format!("https://lovdata.no/{}/§{}", dok_id, section_id)
}

pub const LICENSE_FOOTER: &str = "Kilde: Lovdata (NLOD 2.0)";

/// The "this text is no longer in force" banner prepended when
/// `is_current = false`.
pub const SUPERSESSION_BANNER: &str = "> ⚠️ Denne teksten er ikke lenger gjeldende.";

/// Truncates `content` to `⌊max_tokens · 3.5⌋` characters, appending an
/// ellipsis marker, per §4.F's token budgeting rule.
pub fn truncate_to_tokens(content: &str, max_tokens: Option<usize>) -> String {
    match max_tokens {
        None => content.to_string(),
        Some(tokens) => {
            let max_chars = (tokens as f64 * 3.5).floor() as usize;
            if content.chars().count() <= max_chars {
                content.to_string()
            } else {
                let truncated: String = content.chars().take(max_chars).collect();
                format!("{}…", truncated)
            }
        }
    }
}

/// Formats a single section lookup result.
pub fn format_section(document: &Document, section: &Section, max_tokens: Option<usize>) -> String {
    let mut out = String::new();
    if !document.is_current {
        out.push_str(SUPERSESSION_BANNER);
        out.push_str("\n\n");
    }
    out.push_str(&format!("## {} § {}\n\n", document.short_title, section.section_id));
    if let Some(title) = &section.title {
        out.push_str(&format!("**{}**\n\n", title));
    }
    out.push_str(&truncate_to_tokens(&section.content, max_tokens));
    out.push_str(&format!("\n\n{}\n{}", source_url(&document.dok_id, &section.section_id), LICENSE_FOOTER));
    out
}

/// Formats a document overview (ToC). Hierarchical rendering when
/// `structures` is non-empty; otherwise a flat capped table.
pub fn format_overview(
    document: &Document,
    structures: &[StructureNode],
    mut sections: Vec<SectionSummary>,
) -> String {
    sort_sections_naturally(&mut sections);
    let mut out = String::new();
    if !document.is_current {
        out.push_str(SUPERSESSION_BANNER);
        out.push_str("\n\n");
    }
    out.push_str(&format!("# {}\n\n", document.title));

    if structures.is_empty() {
        const CAP: usize = 100;
        out.push_str("| § | Tittel | Tokens |\n|---|---|---|\n");
        for s in sections.iter().take(CAP) {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                s.section_id,
                s.title.clone().unwrap_or_default(),
                s.estimated_tokens
            ));
        }
        if sections.len() > CAP {
            out.push_str("| … | … | … |\n");
        }
        return out;
    }

    let mut by_structure: Vec<(&StructureNode, Vec<&SectionSummary>)> =
        structures.iter().map(|s| (s, Vec::new())).collect();
    let mut orphans: Vec<&SectionSummary> = Vec::new();

    for section in &sections {
        let deepest = structures
            .iter()
            .filter(|node| section.address.starts_with(&node.address))
            .max_by_key(|node| node.address.len());
        match deepest {
            Some(node) => {
                if let Some((_, bucket)) =
                    by_structure.iter_mut().find(|(n, _)| std::ptr::eq(*n, node))
                {
                    bucket.push(section);
                }
            }
            None => orphans.push(section),
        }
    }

    const MAX_PER_NODE: usize = 8;
    for (node, bucket) in &by_structure {
        let indent = "  ".repeat(node.structure_type.indent_level());
        out.push_str(&format!("{}- **{}** {}\n", indent, node.structure_id, node.title));
        for s in bucket.iter().take(MAX_PER_NODE) {
            out.push_str(&format!("{}  - § {} {}\n", indent, s.section_id, s.title.clone().unwrap_or_default()));
        }
        if bucket.len() > MAX_PER_NODE {
            let remaining = &bucket[MAX_PER_NODE..];
            let token_sum: usize = remaining.iter().map(|s| s.estimated_tokens).sum();
            out.push_str(&format!(
                "{}  - … {} flere paragrafer ({} tokens)\n",
                indent,
                remaining.len(),
                token_sum
            ));
        }
    }

    if !orphans.is_empty() {
        out.push_str("- **Annet**\n");
        for s in &orphans {
            out.push_str(&format!("  - § {} {}\n", s.section_id, s.title.clone().unwrap_or_default()));
        }
    }

    out
}

/// Formats a batch-lookup response, reporting missing ids.
pub fn format_batch(
    document: &Document,
    found: &[Section],
    requested_ids: &[String],
    max_tokens: Option<usize>,
) -> String {
    let mut out = String::new();
    let found_ids: std::collections::HashSet<&str> =
        found.iter().map(|s| s.section_id.as_str()).collect();
    let missing: Vec<&String> = requested_ids.iter().filter(|id| !found_ids.contains(id.as_str())).collect();

    for section in found {
        out.push_str(&format_section(document, section, max_tokens));
        out.push_str("\n\n---\n\n");
    }
    if !missing.is_empty() {
        out.push_str(&format!(
            "*Ikke funnet: {}*\n",
            missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        ));
    }
    out
}

/// Highlights matched tokens in a snippet with emphasis markers.
pub fn highlight_snippet(snippet: &str, query_tokens: &[&str]) -> String {
    let mut result = snippet.to_string();
    for token in query_tokens {
        if token.is_empty() {
            continue;
        }
        let re = match regex::RegexBuilder::new(&regex::escape(token)).case_insensitive(true).build() {
            Ok(re) => re,
            Err(_) => continue,
        };
        result = re.replace_all(&result, |caps: &regex::Captures| format!("**{}**", &caps[0])).to_string();
    }
    result
}

/// Formats a search-hit list.
pub fn format_search_hits(hits: &[SearchHit], or_fallback_notice: bool) -> String {
    let mut out = String::new();
    if or_fallback_notice {
        out.push_str("*Ingen treff på alle søkeord samtidig; viser treff på minst ett.*\n\n");
    }
    for hit in hits {
        out.push_str(&format!(
            "- **{} § {}** — {}\n",
            hit.short_title, hit.section_id, hit.snippet
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_sort_is_a_total_order() {
        let mut ids: Vec<SectionSummary> = ["10a", "10", "3-1", "2", "1a", "1"]
            .iter()
            .map(|id| SectionSummary {
                section_id: id.to_string(),
                title: None,
                char_count: 0,
                estimated_tokens: 0,
                address: String::new(),
            })
            .collect();
        sort_sections_naturally(&mut ids);
        let order: Vec<&str> = ids.iter().map(|s| s.section_id.as_str()).collect();
        assert_eq!(order, vec!["1", "1a", "2", "3-1", "10", "10a"]);
    }

    #[test]
    fn format_based_on_is_idempotent() {
        let raw = "lov/2005-06-17-62 § 14-1, 14-2; lov/1999-03-26-17";
        let once = format_based_on(raw);
        let twice = format_based_on(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn format_based_on_groups_multi_section() {
        let raw = "lov/2005-06-17-62 § 14-1, 14-2";
        assert_eq!(format_based_on(raw), "lov/2005-06-17-62 §§ 14-1, 14-2");
    }

    #[test]
    fn format_based_on_bare_doc_has_no_section_mark() {
        let raw = "forskrift/2010-01-01-1";
        assert_eq!(format_based_on(raw), "forskrift/2010-01-01-1");
    }

    #[test]
    fn truncate_respects_character_budget() {
        let text = "a".repeat(100);
        let truncated = truncate_to_tokens(&text, Some(10));
        assert_eq!(truncated.chars().count(), 36);
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn truncate_is_noop_under_budget() {
        assert_eq!(truncate_to_tokens("short", Some(100)), "short");
    }
}
