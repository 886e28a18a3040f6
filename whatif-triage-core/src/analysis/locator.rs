// source-definition locator - best-effort textual search over bicep files
//
// this is deliberately a heuristic line scanner, not a parser: block nesting
// is reconstructed by counting braces and brackets, which under-counts when
// they appear inside string literals or comments on the same line. ambiguity
// is surfaced as a first-class result instead of being silently resolved.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DefinitionStatus {
    Defined,
    NotDefined,
    Unknown,
}

/// outcome of a definition search, with diagnostic fields for the report
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionResult {
    pub status: DefinitionStatus,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parent_context: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Default for DefinitionResult {
    fn default() -> Self {
        DefinitionResult {
            status: DefinitionStatus::Unknown,
            file: None,
            line: None,
            context: None,
            search_term: None,
            parent_context: Vec::new(),
            match_count: None,
            reason: None,
        }
    }
}

/// search terms extracted from a dotted property path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerms {
    pub term: String,
    /// ordered array names whose blocks the match must fall inside
    pub parent_context: Vec<String>,
    /// (array name, 0-based element index) pairs from numeric path segments
    pub array_indices: Vec<(String, usize)>,
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

/// pull the search term, parent context and array indices out of a path
///
/// numeric segments are array indices (the preceding segment names the
/// array; the literal "properties" segment is never an array-name
/// candidate). the last remaining segment after stripping numerics and
/// "properties" is the search term; array names positioned before the term
/// become the required parent context.
pub fn extract_search_terms(property_path: &str) -> SearchTerms {
    let parts: Vec<&str> = property_path.split('.').collect();

    let mut array_indices: Vec<(String, usize)> = Vec::new();
    let mut array_positions: Vec<usize> = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 && is_numeric(part) {
            let array_name = parts[i - 1];
            if array_name != "properties" {
                if let Ok(index) = part.parse::<usize>() {
                    array_indices.push((array_name.to_string(), index));
                    array_positions.push(i - 1);
                }
            }
        }
    }

    let meaningful: Vec<(usize, &str)> = parts
        .iter()
        .enumerate()
        .filter(|(_, p)| !is_numeric(p) && **p != "properties")
        .map(|(i, p)| (i, *p))
        .collect();

    let Some(&(term_pos, term)) = meaningful.last() else {
        return SearchTerms {
            term: parts.last().copied().unwrap_or("").to_string(),
            parent_context: Vec::new(),
            array_indices,
        };
    };

    let parent_context = array_indices
        .iter()
        .zip(&array_positions)
        .filter(|(_, pos)| **pos < term_pos)
        .map(|((name, _), _)| name.clone())
        .collect();

    SearchTerms {
        term: term.to_string(),
        parent_context,
        array_indices,
    }
}

/// per-directory cache of bicep source files, reused across lookups
#[derive(Debug, Default)]
pub struct SourceFileCache {
    loaded_dir: Option<PathBuf>,
    files: BTreeMap<String, String>,
}

impl SourceFileCache {
    /// load all *.bicep files under the directory, caching by directory
    ///
    /// unreadable or non-UTF-8 files are skipped; a missing directory
    /// yields an empty map
    pub fn load(&mut self, source_dir: &Path) -> &BTreeMap<String, String> {
        if self.loaded_dir.as_deref() == Some(source_dir) && !self.files.is_empty() {
            return &self.files;
        }

        self.files.clear();
        self.loaded_dir = Some(source_dir.to_path_buf());

        if !source_dir.exists() {
            return &self.files;
        }

        for entry in WalkDir::new(source_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("bicep") {
                continue;
            }
            match fs::read_to_string(entry.path()) {
                Ok(content) => {
                    self.files
                        .insert(entry.path().display().to_string(), content);
                }
                Err(e) => {
                    debug!("skipping unreadable source file {}: {e}", entry.path().display());
                }
            }
        }

        &self.files
    }
}

fn bracket_balance(line: &str, open: char, close: char) -> i64 {
    line.matches(open).count() as i64 - line.matches(close).count() as i64
}

/// line ranges (1-indexed, inclusive) of declarations for a resource type
///
/// a declaration line contains both the literal "resource " and the
/// pattern '<type>@; the block ends where the brace depth opened on the
/// declaration line returns to zero
pub fn find_resource_block_ranges(lines: &[&str], resource_type: &str) -> Vec<(usize, usize)> {
    if resource_type.is_empty() {
        return Vec::new();
    }
    let declaration = format!("'{resource_type}@");

    let mut ranges = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if lines[i].contains("resource ") && lines[i].contains(&declaration) {
            let start_line = i + 1;
            let mut brace_count: i64 = 0;
            let mut found_open = false;
            let mut end_line = start_line;

            for (j, scan) in lines.iter().enumerate().skip(i) {
                for ch in scan.chars() {
                    match ch {
                        '{' => {
                            brace_count += 1;
                            found_open = true;
                        }
                        '}' => brace_count -= 1,
                        _ => {}
                    }
                }
                if found_open && brace_count == 0 {
                    end_line = j + 1;
                    break;
                }
            }

            ranges.push((start_line, end_line));
            i = end_line;
        } else {
            i += 1;
        }
    }

    ranges
}

/// whether a match line lies inside the nearest enclosing block opened by
/// the most specific parent name
///
/// scans backwards for the parent's declaration line, then tracks brace and
/// bracket balance forward; if the balance returns to zero before reaching
/// the match line, the block closed and the match is outside it
pub fn is_inside_parent_block(lines: &[&str], target_line: usize, parent_context: &[String]) -> bool {
    let Some(parent) = parent_context.last() else {
        return true;
    };

    let target_idx = target_line - 1;
    let colon = format!("{parent}:");
    let spaced_colon = format!("{parent} :");

    let mut parent_idx = None;
    for i in (0..target_idx).rev() {
        let stripped = lines[i].trim();
        if stripped.starts_with(&colon) || stripped.starts_with(&spaced_colon) {
            parent_idx = Some(i);
            break;
        }
    }
    let Some(parent_idx) = parent_idx else {
        return false;
    };

    let mut open_brace = bracket_balance(lines[parent_idx], '{', '}');
    let mut open_bracket = bracket_balance(lines[parent_idx], '[', ']');

    for line in &lines[parent_idx + 1..target_idx] {
        open_brace += bracket_balance(line, '{', '}');
        open_bracket += bracket_balance(line, '[', ']');
        if open_brace <= 0 && open_bracket <= 0 {
            return false;
        }
    }

    open_brace > 0 || open_bracket > 0
}

/// locate the line range (1-indexed) of the Nth brace-delimited element of
/// a named array, scanning forward from `start_search` (0-indexed)
pub fn find_array_element_range(
    lines: &[&str],
    array_name: &str,
    element_index: usize,
    start_search: usize,
) -> Option<(usize, usize)> {
    let colon = format!("{array_name}:");
    let spaced_colon = format!("{array_name} :");

    let mut array_start = None;
    for i in start_search..lines.len() {
        let stripped = lines[i].trim();
        if stripped.starts_with(&colon) || stripped.starts_with(&spaced_colon) {
            array_start = Some(i);
            break;
        }
    }
    let array_start = array_start?;

    // the opening bracket must appear on the declaration line or just below
    let mut bracket_start = None;
    for (i, line) in lines
        .iter()
        .enumerate()
        .skip(array_start)
        .take(3.min(lines.len() - array_start))
    {
        if line.contains('[') {
            bracket_start = Some(i);
            break;
        }
    }
    let bracket_start = bracket_start?;

    // count top-level {...} pairs in declaration order
    let mut current_element: i64 = -1;
    let mut element_start = 0;
    let mut brace_depth: i64 = 0;
    let mut in_element = false;

    for (i, line) in lines.iter().enumerate().skip(bracket_start) {
        for ch in line.chars() {
            match ch {
                ']' if brace_depth == 0 => return None,
                '{' => {
                    if brace_depth == 0 {
                        current_element += 1;
                        if current_element == element_index as i64 {
                            element_start = i + 1;
                            in_element = true;
                        }
                    }
                    brace_depth += 1;
                }
                '}' => {
                    brace_depth -= 1;
                    if brace_depth == 0 && in_element {
                        return Some((element_start, i + 1));
                    }
                }
                _ => {}
            }
        }
    }

    None
}

/// whether a match line satisfies every array-index constraint
pub fn is_inside_array_element(
    lines: &[&str],
    target_line: usize,
    array_indices: &[(String, usize)],
    resource_ranges: &[(usize, usize)],
) -> bool {
    if array_indices.is_empty() {
        return true;
    }

    // begin the array search at the enclosing resource block, if any
    let mut start_search = 0;
    for (start, end) in resource_ranges {
        if *start <= target_line && target_line <= *end {
            start_search = start - 1;
            break;
        }
    }

    for (array_name, element_index) in array_indices {
        match find_array_element_range(lines, array_name, *element_index, start_search) {
            None => return false,
            Some((elem_start, elem_end)) => {
                if !(elem_start <= target_line && target_line <= elem_end) {
                    return false;
                }
            }
        }
    }

    true
}

struct SourceMatch {
    file: String,
    line: usize,
    context: String,
    extended_context: String,
}

/// search the cached source files for a declaration of the property
///
/// exactly one unambiguous match is "defined"; several candidates are
/// "unknown"; none (or none within the required parent/array scope) is
/// "notDefined"
pub fn find_definition(
    cache: &mut SourceFileCache,
    property_path: &str,
    source_dir: &Path,
    resource_type: &str,
) -> DefinitionResult {
    let files = cache.load(source_dir);
    if files.is_empty() {
        return DefinitionResult {
            reason: Some("No Bicep files found".to_string()),
            ..Default::default()
        };
    }

    let terms = extract_search_terms(property_path);
    if terms.term.is_empty() {
        return DefinitionResult {
            reason: Some("Could not extract search term".to_string()),
            ..Default::default()
        };
    }

    let mut matches: Vec<SourceMatch> = Vec::new();
    let mut context_matches: Vec<SourceMatch> = Vec::new();

    for (file_path, content) in files {
        let lines: Vec<&str> = content.split('\n').collect();

        let mut resource_ranges: Vec<(usize, usize)> = Vec::new();
        if !resource_type.is_empty() {
            resource_ranges = find_resource_block_ranges(&lines, resource_type);
            if resource_ranges.is_empty() {
                // this file declares no resource of the requested type
                continue;
            }
        }

        for (idx, line) in lines.iter().enumerate() {
            let line_num = idx + 1;

            if !resource_ranges.is_empty()
                && !resource_ranges
                    .iter()
                    .any(|(start, end)| *start <= line_num && line_num <= *end)
            {
                continue;
            }

            if line.trim().starts_with("//") {
                continue;
            }
            if !line.contains(&terms.term) {
                continue;
            }

            // wide window kept for scan diagnostics, narrow one for display
            let extended_start = line_num.saturating_sub(50);
            let extended_end = (line_num + 5).min(lines.len());
            let display_start = line_num.saturating_sub(3);
            let display_end = (line_num + 2).min(lines.len());

            let matched = SourceMatch {
                file: file_path.clone(),
                line: line_num,
                context: lines[display_start..display_end].join("\n"),
                extended_context: lines[extended_start..extended_end].join("\n"),
            };

            if !terms.parent_context.is_empty() {
                if !is_inside_parent_block(&lines, line_num, &terms.parent_context) {
                    matches.push(matched);
                    continue;
                }
                if !terms.array_indices.is_empty()
                    && !is_inside_array_element(&lines, line_num, &terms.array_indices, &resource_ranges)
                {
                    matches.push(matched);
                    continue;
                }
                context_matches.push(matched);
            } else if !terms.array_indices.is_empty() {
                if is_inside_array_element(&lines, line_num, &terms.array_indices, &resource_ranges) {
                    context_matches.push(matched);
                } else {
                    matches.push(matched);
                }
            } else {
                matches.push(matched);
            }
        }
    }

    // scope-confirmed matches take priority when a scope was requested
    if !context_matches.is_empty() {
        let first = &context_matches[0];
        if context_matches.len() == 1 {
            return DefinitionResult {
                status: DefinitionStatus::Defined,
                file: Some(first.file.clone()),
                line: Some(first.line),
                context: Some(first.context.clone()),
                search_term: Some(terms.term),
                parent_context: terms.parent_context,
                ..Default::default()
            };
        }
        debug!(
            "ambiguous context matches for {}; first candidate window:\n{}",
            terms.term, first.extended_context
        );
        return DefinitionResult {
            status: DefinitionStatus::Unknown,
            file: Some(first.file.clone()),
            line: Some(first.line),
            context: Some(first.context.clone()),
            match_count: Some(context_matches.len()),
            search_term: Some(terms.term.clone()),
            parent_context: terms.parent_context,
            reason: Some(format!(
                "Multiple context matches found ({})",
                context_matches.len()
            )),
        };
    }

    if matches.is_empty() {
        return DefinitionResult {
            status: DefinitionStatus::NotDefined,
            search_term: Some(terms.term),
            parent_context: terms.parent_context,
            ..Default::default()
        };
    }

    // matches exist, but none inside the required scope: a same-named
    // property defined at a different level does not count
    if !terms.parent_context.is_empty() {
        return DefinitionResult {
            status: DefinitionStatus::NotDefined,
            search_term: Some(terms.term.clone()),
            reason: Some(format!(
                "Found {} match(es) but none in {} context",
                matches.len(),
                terms.parent_context.join(".")
            )),
            parent_context: terms.parent_context,
            ..Default::default()
        };
    }

    if matches.len() == 1 {
        let only = &matches[0];
        return DefinitionResult {
            status: DefinitionStatus::Defined,
            file: Some(only.file.clone()),
            line: Some(only.line),
            context: Some(only.context.clone()),
            search_term: Some(terms.term),
            ..Default::default()
        };
    }

    let first = &matches[0];
    DefinitionResult {
        status: DefinitionStatus::Unknown,
        file: Some(first.file.clone()),
        line: Some(first.line),
        context: Some(first.context.clone()),
        match_count: Some(matches.len()),
        search_term: Some(terms.term),
        reason: Some(format!("Multiple matches found ({})", matches.len())),
        ..Default::default()
    }
}
