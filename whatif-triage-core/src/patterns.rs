// noise pattern store - layered rule tables and usage statistics

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// a bare regex rule from the read-only tier
#[derive(Debug, Clone)]
pub struct ReadonlyRule {
    pub raw: String,
    pub regex: Regex,
}

/// a regex rule matched against string values rather than paths
#[derive(Debug, Clone)]
pub struct ArmReferenceRule {
    pub raw: String,
    pub regex: Regex,
}

/// a regex rule carrying a human-readable annotation (custom / auto-managed tiers)
#[derive(Debug, Clone)]
pub struct AnnotatedRule {
    pub raw: String,
    pub regex: Regex,
    pub description: String,
}

/// a literal default value keyed by a path suffix
#[derive(Debug, Clone)]
pub struct KnownDefault {
    pub path_suffix: String,
    pub value: Value,
    pub description: String,
}

// on-disk rule file shape; every category is optional in either tier
#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default)]
    common: RuleTierFile,
    #[serde(default)]
    resource_types: BTreeMap<String, RuleTierFile>,
}

#[derive(Debug, Default, Deserialize)]
struct RuleTierFile {
    #[serde(default)]
    readonly_patterns: Vec<String>,
    #[serde(default)]
    arm_reference_patterns: Vec<String>,
    #[serde(default)]
    known_defaults: Vec<KnownDefaultEntry>,
    #[serde(default)]
    custom_patterns: Vec<DescribedPatternEntry>,
    #[serde(default)]
    auto_managed_patterns: Vec<DescribedPatternEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct KnownDefaultEntry {
    path: String,
    value: Value,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DescribedPatternEntry {
    pattern: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Default)]
struct RuleTier {
    readonly: Vec<ReadonlyRule>,
    arm_reference: Vec<ArmReferenceRule>,
    known_defaults: Vec<KnownDefault>,
    custom: Vec<AnnotatedRule>,
    auto_managed: Vec<AnnotatedRule>,
}

/// match-count entry in the usage statistics file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternUsage {
    #[serde(default)]
    pub match_count: u64,
    pub first_matched: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_matched: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    #[serde(default)]
    pub last_run: Option<String>,
    #[serde(default)]
    pub patterns: BTreeMap<String, PatternUsage>,
}

/// a rule that has not matched anything recently, candidate for pruning
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StalePattern {
    pub category: String,
    pub pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    pub last_matched: String,
    pub days_since_last_match: i64,
}

/// layered noise-pattern rule store
///
/// rules are loaded and compiled once; a missing or malformed file degrades
/// to an empty rule set so the analysis run always proceeds. resource-type
/// tiers extend the common tier, they never replace it.
pub struct PatternStore {
    stats_path: PathBuf,
    common: RuleTier,
    resource_types: BTreeMap<String, RuleTier>,
    validation_warnings: Vec<String>,
    // shared mutable state: match recording must stay safe if a host embeds
    // the store across threads
    matched: Mutex<BTreeSet<String>>,
}

impl PatternStore {
    /// load and compile the rule file; never fails
    pub fn load(patterns_file: &Path) -> Self {
        let stats_path = patterns_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("pattern_stats.json");

        let raw: RuleFile = match fs::read_to_string(patterns_file) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(data) => data,
                Err(e) => {
                    warn!("failed to parse patterns file {}: {e}", patterns_file.display());
                    RuleFile::default()
                }
            },
            Err(e) => {
                warn!("failed to load patterns file {}: {e}", patterns_file.display());
                RuleFile::default()
            }
        };

        let mut warnings = Vec::new();
        let common = compile_tier(&raw.common, "common", &mut warnings);
        let resource_types = raw
            .resource_types
            .iter()
            .map(|(rt, tier)| {
                let label = format!("resource_types.{rt}");
                (rt.clone(), compile_tier(tier, &label, &mut warnings))
            })
            .collect();

        for warning in &warnings {
            warn!("{warning}");
        }

        PatternStore {
            stats_path,
            common,
            resource_types,
            validation_warnings: warnings,
            matched: Mutex::new(BTreeSet::new()),
        }
    }

    /// warnings collected while validating the rule file
    pub fn validation_warnings(&self) -> &[String] {
        &self.validation_warnings
    }

    fn tier(&self, resource_type: &str) -> Option<&RuleTier> {
        if resource_type.is_empty() {
            None
        } else {
            self.resource_types.get(resource_type)
        }
    }

    /// read-only property rules: common ++ resource-type specific
    pub fn readonly_rules(&self, resource_type: &str) -> Vec<&ReadonlyRule> {
        let mut rules: Vec<&ReadonlyRule> = self.common.readonly.iter().collect();
        if let Some(tier) = self.tier(resource_type) {
            rules.extend(tier.readonly.iter());
        }
        rules
    }

    /// ARM reference-expression rules: common tier only
    pub fn arm_reference_rules(&self) -> &[ArmReferenceRule] {
        &self.common.arm_reference
    }

    /// known platform default values: common ++ resource-type specific
    pub fn known_defaults(&self, resource_type: &str) -> Vec<&KnownDefault> {
        let mut defaults: Vec<&KnownDefault> = self.common.known_defaults.iter().collect();
        if let Some(tier) = self.tier(resource_type) {
            defaults.extend(tier.known_defaults.iter());
        }
        defaults
    }

    /// free-text custom annotation rules: common ++ resource-type specific
    pub fn custom_rules(&self, resource_type: &str) -> Vec<&AnnotatedRule> {
        let mut rules: Vec<&AnnotatedRule> = self.common.custom.iter().collect();
        if let Some(tier) = self.tier(resource_type) {
            rules.extend(tier.custom.iter());
        }
        rules
    }

    /// auto-managed property rules: common ++ resource-type specific
    pub fn auto_managed_rules(&self, resource_type: &str) -> Vec<&AnnotatedRule> {
        let mut rules: Vec<&AnnotatedRule> = self.common.auto_managed.iter().collect();
        if let Some(tier) = self.tier(resource_type) {
            rules.extend(tier.auto_managed.iter());
        }
        rules
    }

    /// record that a rule fired, keyed as `[<type>:]<category>:<pattern>`
    pub fn record_match(&self, pattern: &str, category: &str, resource_type: &str) {
        let key = if resource_type.is_empty() {
            format!("{category}:{pattern}")
        } else {
            format!("{resource_type}:{category}:{pattern}")
        };
        if let Ok(mut matched) = self.matched.lock() {
            matched.insert(key);
        }
    }

    fn load_stats(&self) -> UsageStats {
        match fs::read_to_string(&self.stats_path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => UsageStats::default(),
        }
    }

    /// persist usage statistics: stamp the run, bump counts for every rule
    /// that matched during this run
    pub fn save_stats(&self) {
        let mut stats = self.load_stats();
        let now = Utc::now().to_rfc3339();
        stats.last_run = Some(now.clone());

        if let Ok(matched) = self.matched.lock() {
            for key in matched.iter() {
                let entry = stats
                    .patterns
                    .entry(key.clone())
                    .or_insert_with(|| PatternUsage {
                        match_count: 0,
                        first_matched: now.clone(),
                        last_matched: None,
                    });
                entry.last_matched = Some(now.clone());
                entry.match_count += 1;
            }
        }

        match serde_json::to_string_pretty(&stats) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.stats_path, json) {
                    warn!("failed to save pattern stats to {}: {e}", self.stats_path.display());
                } else {
                    debug!("pattern stats saved to {}", self.stats_path.display());
                }
            }
            Err(e) => warn!("failed to serialize pattern stats: {e}"),
        }
    }

    /// rules whose last match is older than `days`, most stale first
    pub fn unused_patterns(&self, days: i64) -> Vec<StalePattern> {
        let stats = self.load_stats();
        let now = Utc::now();
        let threshold = now - Duration::days(days);
        let mut stale = Vec::new();

        for (key, usage) in &stats.patterns {
            let Some(last_str) = &usage.last_matched else {
                continue;
            };
            let Ok(last) = DateTime::parse_from_rfc3339(last_str) else {
                continue;
            };
            let last = last.with_timezone(&Utc);
            if last >= threshold {
                continue;
            }

            // key shape: "resource_type:category:pattern" or "category:pattern"
            let parts: Vec<&str> = key.split(':').collect();
            let (resource_type, category, pattern) = match parts.len() {
                0 | 1 => continue,
                2 => (None, parts[0].to_string(), parts[1].to_string()),
                _ => (
                    Some(parts[0].to_string()),
                    parts[1].to_string(),
                    parts[2..].join(":"),
                ),
            };

            stale.push(StalePattern {
                category,
                pattern,
                resource_type,
                last_matched: last_str.clone(),
                days_since_last_match: (now - last).num_days(),
            });
        }

        stale.sort_by(|a, b| b.days_since_last_match.cmp(&a.days_since_last_match));
        stale
    }
}

/// compile one tier of the rule file, collecting validation warnings
///
/// the matched path is always pre-stripped of its leading "properties."
/// segment, so a rule anchored on that prefix can never fire; the loader
/// surfaces this instead of silently ignoring it.
fn compile_tier(tier: &RuleTierFile, label: &str, warnings: &mut Vec<String>) -> RuleTier {
    let mut compiled = RuleTier::default();

    for (idx, raw) in tier.readonly_patterns.iter().enumerate() {
        check_properties_prefix(raw, label, "readonly_patterns", idx, warnings);
        if let Some(regex) = compile_pattern(raw, label, "readonly_patterns", idx, warnings) {
            compiled.readonly.push(ReadonlyRule { raw: raw.clone(), regex });
        }
    }

    for (idx, raw) in tier.arm_reference_patterns.iter().enumerate() {
        if let Some(regex) = compile_pattern(raw, label, "arm_reference_patterns", idx, warnings) {
            compiled
                .arm_reference
                .push(ArmReferenceRule { raw: raw.clone(), regex });
        }
    }

    for (idx, entry) in tier.known_defaults.iter().enumerate() {
        if entry.path.starts_with("properties.") {
            warnings.push(format!(
                "{label}.known_defaults[{idx}]: path '{}' carries the 'properties.' prefix; matched paths are stripped of it, so this entry can never fire",
                entry.path
            ));
        }
        compiled.known_defaults.push(KnownDefault {
            path_suffix: entry.path.clone(),
            value: entry.value.clone(),
            description: entry.description.clone(),
        });
    }

    for (idx, entry) in tier.custom_patterns.iter().enumerate() {
        check_properties_prefix(&entry.pattern, label, "custom_patterns", idx, warnings);
        if let Some(regex) = compile_pattern(&entry.pattern, label, "custom_patterns", idx, warnings) {
            compiled.custom.push(AnnotatedRule {
                raw: entry.pattern.clone(),
                regex,
                description: entry.description.clone(),
            });
        }
    }

    for (idx, entry) in tier.auto_managed_patterns.iter().enumerate() {
        check_properties_prefix(&entry.pattern, label, "auto_managed_patterns", idx, warnings);
        if let Some(regex) = compile_pattern(&entry.pattern, label, "auto_managed_patterns", idx, warnings) {
            compiled.auto_managed.push(AnnotatedRule {
                raw: entry.pattern.clone(),
                regex,
                description: entry.description.clone(),
            });
        }
    }

    compiled
}

fn check_properties_prefix(
    pattern: &str,
    label: &str,
    category: &str,
    idx: usize,
    warnings: &mut Vec<String>,
) {
    if pattern.starts_with("^properties\\.") {
        warnings.push(format!(
            "{label}.{category}[{idx}]: pattern '{pattern}' carries the 'properties.' prefix; matched paths are stripped of it, so this rule can never fire"
        ));
    }
}

fn compile_pattern(
    pattern: &str,
    label: &str,
    category: &str,
    idx: usize,
    warnings: &mut Vec<String>,
) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warnings.push(format!(
                "{label}.{category}[{idx}]: invalid regex '{pattern}' dropped: {e}"
            ));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn store_with(rules_json: &str) -> (TempDir, PatternStore) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noise_patterns.json");
        let mut file = File::create(&path).unwrap();
        write!(file, "{rules_json}").unwrap();
        let store = PatternStore::load(&path);
        (dir, store)
    }

    #[test]
    fn missing_file_yields_empty_rule_set() {
        let store = PatternStore::load(Path::new("/nonexistent/noise_patterns.json"));
        assert!(store.readonly_rules("").is_empty());
        assert!(store.arm_reference_rules().is_empty());
        assert!(store.known_defaults("Microsoft.Network/virtualNetworks").is_empty());
        assert!(store.custom_rules("").is_empty());
        assert!(store.auto_managed_rules("").is_empty());
    }

    #[test]
    fn malformed_file_yields_empty_rule_set() {
        let (_dir, store) = store_with("not json at all {{{");
        assert!(store.readonly_rules("").is_empty());
        assert!(store.arm_reference_rules().is_empty());
    }

    #[test]
    fn resource_type_tier_extends_common() {
        let (_dir, store) = store_with(
            r#"{
                "common": {"readonly_patterns": ["^provisioningState$"]},
                "resource_types": {
                    "Microsoft.ContainerService/managedClusters": {
                        "readonly_patterns": ["^currentKubernetesVersion$"]
                    }
                }
            }"#,
        );
        let common_only = store.readonly_rules("");
        assert_eq!(common_only.len(), 1);
        let layered = store.readonly_rules("Microsoft.ContainerService/managedClusters");
        assert_eq!(layered.len(), 2);
        assert_eq!(layered[0].raw, "^provisioningState$");
        assert_eq!(layered[1].raw, "^currentKubernetesVersion$");
    }

    #[test]
    fn properties_prefix_is_flagged_not_fatal() {
        let (_dir, store) = store_with(
            r#"{"common": {"readonly_patterns": ["^properties\\.provisioningState$", "^etag$"]}}"#,
        );
        assert_eq!(store.validation_warnings().len(), 1);
        assert!(store.validation_warnings()[0].contains("readonly_patterns[0]"));
        // both rules still load; only the foot-gun is reported
        assert_eq!(store.readonly_rules("").len(), 2);
    }

    #[test]
    fn invalid_regex_is_dropped_with_warning() {
        let (_dir, store) = store_with(r#"{"common": {"readonly_patterns": ["[unclosed"]}}"#);
        assert!(store.readonly_rules("").is_empty());
        assert_eq!(store.validation_warnings().len(), 1);
    }

    #[test]
    fn stats_roundtrip_preserves_and_increments_counts() {
        let (dir, store) = store_with(r#"{"common": {"readonly_patterns": ["^etag$"]}}"#);
        store.record_match("^etag$", "readonly_patterns", "");
        store.save_stats();

        let stats_path = dir.path().join("pattern_stats.json");
        let stats: UsageStats =
            serde_json::from_str(&std::fs::read_to_string(&stats_path).unwrap()).unwrap();
        let usage = &stats.patterns["readonly_patterns:^etag$"];
        assert_eq!(usage.match_count, 1);
        assert!(usage.last_matched.is_some());
        assert!(stats.last_run.is_some());

        // a second run of the same process matches the rule again
        let store2 = PatternStore::load(&dir.path().join("noise_patterns.json"));
        store2.record_match("^etag$", "readonly_patterns", "");
        store2.save_stats();

        let stats: UsageStats =
            serde_json::from_str(&std::fs::read_to_string(&stats_path).unwrap()).unwrap();
        assert_eq!(stats.patterns["readonly_patterns:^etag$"].match_count, 2);
    }

    #[test]
    fn unused_patterns_sorted_by_staleness() {
        let dir = TempDir::new().unwrap();
        let rules_path = dir.path().join("noise_patterns.json");
        std::fs::write(&rules_path, "{}").unwrap();

        let old = (Utc::now() - Duration::days(90)).to_rfc3339();
        let older = (Utc::now() - Duration::days(200)).to_rfc3339();
        let fresh = Utc::now().to_rfc3339();
        let stats = serde_json::json!({
            "lastRun": fresh,
            "patterns": {
                "readonly_patterns:^etag$": {
                    "matchCount": 3, "firstMatched": older, "lastMatched": old
                },
                "Microsoft.Network/virtualNetworks:readonly_patterns:^resourceGuid$": {
                    "matchCount": 1, "firstMatched": older, "lastMatched": older
                },
                "custom_patterns:^tags\\.": {
                    "matchCount": 9, "firstMatched": older, "lastMatched": fresh
                }
            }
        });
        std::fs::write(
            dir.path().join("pattern_stats.json"),
            serde_json::to_string(&stats).unwrap(),
        )
        .unwrap();

        let store = PatternStore::load(&rules_path);
        let stale = store.unused_patterns(30);
        assert_eq!(stale.len(), 2);
        assert_eq!(stale[0].pattern, "^resourceGuid$");
        assert_eq!(
            stale[0].resource_type.as_deref(),
            Some("Microsoft.Network/virtualNetworks")
        );
        assert_eq!(stale[1].pattern, "^etag$");
        assert!(stale[0].days_since_last_match > stale[1].days_since_last_match);
    }

    #[test]
    fn unused_patterns_without_stats_file_is_empty() {
        let store = PatternStore::load(Path::new("/nonexistent/noise_patterns.json"));
        assert!(store.unused_patterns(30).is_empty());
    }
}
