use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connector::SourceRecord;

/// Minimum similarity before a heuristic pairing is suggested at all.
const SUGGESTION_THRESHOLD: f32 = 0.55;

/// One proposed source-field to destination-field pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSuggestion {
    pub source_field: String,
    pub destination_field: String,
    pub confidence: f32,
    pub reason: String,
}

/// Output of a suggestion pass. Destination fields with no acceptable source
/// candidate are listed, never silently dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingReport {
    pub suggestions: Vec<MappingSuggestion>,
    pub unmapped_destination_fields: Vec<String>,
}

/// A committed mapping, as stored per object type and consumed by the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMappingSpec {
    pub source_field: String,
    pub destination_field: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// External suggestion source (e.g. an AI mapping service). The local
/// heuristic always runs; provider output only augments it.
#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    async fn suggest(
        &self,
        source_fields: &[String],
        destination_fields: &[String],
    ) -> Result<Vec<MappingSuggestion>>;
}

/// Deterministic local heuristic: exact normalized match, then a CRM synonym
/// table, then normalized edit distance. Each source field is paired at most
/// once, best candidates first.
pub fn suggest_mappings(
    source_fields: &[String],
    destination_fields: &[String],
) -> MappingReport {
    let mut candidates: Vec<(usize, usize, f32, String)> = Vec::new();
    for (di, dest) in destination_fields.iter().enumerate() {
        for (si, source) in source_fields.iter().enumerate() {
            if let Some((score, reason)) = score_pair(source, dest) {
                candidates.push((di, si, score, reason));
            }
        }
    }
    candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut used_source = vec![false; source_fields.len()];
    let mut used_dest = vec![false; destination_fields.len()];
    let mut suggestions = Vec::new();
    for (di, si, score, reason) in candidates {
        if used_source[si] || used_dest[di] {
            continue;
        }
        used_source[si] = true;
        used_dest[di] = true;
        suggestions.push(MappingSuggestion {
            source_field: source_fields[si].clone(),
            destination_field: destination_fields[di].clone(),
            confidence: score,
            reason,
        });
    }

    let unmapped_destination_fields = destination_fields
        .iter()
        .enumerate()
        .filter(|(di, _)| !used_dest[*di])
        .map(|(_, f)| f.clone())
        .collect();

    MappingReport {
        suggestions,
        unmapped_destination_fields,
    }
}

/// Runs the heuristic, then overlays provider suggestions where the provider
/// is more confident. Provider pairs naming unknown fields are discarded.
pub async fn suggest_with_provider(
    source_fields: &[String],
    destination_fields: &[String],
    provider: Option<&dyn SuggestionProvider>,
) -> MappingReport {
    let mut report = suggest_mappings(source_fields, destination_fields);
    let Some(provider) = provider else {
        return report;
    };

    let provided = match provider.suggest(source_fields, destination_fields).await {
        Ok(provided) => provided,
        Err(e) => {
            tracing::warn!("suggestion provider unavailable, keeping heuristic output: {e}");
            return report;
        }
    };

    for suggestion in provided {
        if !source_fields.contains(&suggestion.source_field)
            || !destination_fields.contains(&suggestion.destination_field)
        {
            continue;
        }
        match report
            .suggestions
            .iter_mut()
            .find(|s| s.destination_field == suggestion.destination_field)
        {
            Some(existing) if existing.confidence < suggestion.confidence => {
                *existing = suggestion;
            }
            Some(_) => {}
            None => {
                report
                    .unmapped_destination_fields
                    .retain(|f| f != &suggestion.destination_field);
                report.suggestions.push(suggestion);
            }
        }
    }
    report
}

/// Checks that every required destination field is covered exactly once.
/// Returns the uncovered fields on failure so callers can surface them as
/// "needs manual mapping".
pub fn validate_required_coverage(
    specs: &[FieldMappingSpec],
    required_destination_fields: &[String],
) -> Result<(), Vec<String>> {
    let missing: Vec<String> = required_destination_fields
        .iter()
        .filter(|required| !specs.iter().any(|s| &s.destination_field == *required))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(missing);
    }

    let mut seen = Vec::new();
    for spec in specs.iter().filter(|s| s.required) {
        if seen.contains(&&spec.destination_field) {
            return Err(vec![spec.destination_field.clone()]);
        }
        seen.push(&spec.destination_field);
    }
    Ok(())
}

/// Applies the mapping set to one source record, producing the
/// destination-shaped record handed to the loader.
pub fn map_record(record: &SourceRecord, specs: &[FieldMappingSpec]) -> Result<SourceRecord> {
    let mut mapped = SourceRecord::new(record.id.clone());
    for spec in specs {
        let value = record
            .fields
            .get(&spec.source_field)
            .cloned()
            .unwrap_or(Value::Null);
        let value = match &spec.transform {
            Some(rule) => apply_rule(rule, &value, record)?,
            None => value,
        };
        mapped.fields.insert(spec.destination_field.clone(), value);
    }
    Ok(mapped)
}

/// Minimal per-field transformation rules: `lowercase`, `uppercase`, `trim`,
/// `concat:<other_field>`.
fn apply_rule(rule: &str, value: &Value, record: &SourceRecord) -> Result<Value> {
    let as_str = |v: &Value| -> String {
        match v {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    };

    match rule {
        "lowercase" => Ok(Value::String(as_str(value).to_lowercase())),
        "uppercase" => Ok(Value::String(as_str(value).to_uppercase())),
        "trim" => Ok(Value::String(as_str(value).trim().to_string())),
        _ => {
            if let Some(other) = rule.strip_prefix("concat:") {
                let suffix = record.fields.get(other).map(&as_str).unwrap_or_default();
                let base = as_str(value);
                if base.is_empty() {
                    Ok(Value::String(suffix))
                } else if suffix.is_empty() {
                    Ok(Value::String(base))
                } else {
                    Ok(Value::String(format!("{base} {suffix}")))
                }
            } else {
                bail!("unknown transformation rule: {rule}")
            }
        }
    }
}

fn score_pair(source: &str, dest: &str) -> Option<(f32, String)> {
    let ns = normalize(source);
    let nd = normalize(dest);
    if ns.is_empty() || nd.is_empty() {
        return None;
    }
    if ns == nd {
        return Some((1.0, "exact name match".to_string()));
    }
    if let (Some(gs), Some(gd)) = (alias_group(&ns), alias_group(&nd)) {
        if gs == gd {
            return Some((0.9, "known field alias".to_string()));
        }
    }
    let similarity = name_similarity(&ns, &nd);
    if similarity >= SUGGESTION_THRESHOLD {
        return Some((similarity, format!("name similarity {similarity:.2}")));
    }
    None
}

fn normalize(field: &str) -> String {
    field
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Synonym groups for field names that differ across CRM vendors.
const ALIAS_GROUPS: &[&[&str]] = &[
    &["firstname", "givenname", "fname"],
    &["lastname", "surname", "familyname", "lname"],
    &["email", "emailaddress", "primaryemail"],
    &["phone", "phonenumber", "telephone", "mobilephone"],
    &["company", "account", "accountname", "organization", "organisation"],
    &["amount", "dealvalue", "value", "revenue"],
    &["stage", "dealstage", "pipelinestage"],
    &["owner", "ownerid", "assignedto"],
    &["createddate", "createdat", "datecreated"],
    &["closedate", "closeddate", "expectedclosedate"],
    &["leadsource", "source", "origin"],
    &["title", "jobtitle", "position"],
];

fn alias_group(normalized: &str) -> Option<usize> {
    ALIAS_GROUPS
        .iter()
        .position(|group| group.contains(&normalized))
}

/// Normalized Levenshtein similarity in [0, 1].
fn name_similarity(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / max_len as f32
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn exact_match_wins() {
        let report = suggest_mappings(&fields(&["Email", "Phone"]), &fields(&["email"]));
        assert_eq!(report.suggestions.len(), 1);
        assert_eq!(report.suggestions[0].source_field, "Email");
        assert_eq!(report.suggestions[0].confidence, 1.0);
        assert!(report.unmapped_destination_fields.is_empty());
    }

    #[test]
    fn alias_table_maps_vendor_synonyms() {
        let report = suggest_mappings(&fields(&["Company"]), &fields(&["account_name"]));
        assert_eq!(report.suggestions.len(), 1);
        assert_eq!(report.suggestions[0].confidence, 0.9);
        assert_eq!(report.suggestions[0].reason, "known field alias");
    }

    #[test]
    fn unmatched_destination_fields_are_surfaced() {
        let report = suggest_mappings(&fields(&["first_name"]), &fields(&["firstname", "sic_code"]));
        assert_eq!(report.suggestions.len(), 1);
        assert_eq!(report.unmapped_destination_fields, vec!["sic_code"]);
    }

    #[test]
    fn each_source_field_is_used_once() {
        let report = suggest_mappings(
            &fields(&["email"]),
            &fields(&["email", "email_address"]),
        );
        assert_eq!(report.suggestions.len(), 1);
        assert_eq!(report.unmapped_destination_fields.len(), 1);
    }

    #[test]
    fn required_coverage_rejects_missing_and_duplicates() {
        let specs = vec![FieldMappingSpec {
            source_field: "email".into(),
            destination_field: "email".into(),
            required: true,
            transform: None,
            confidence: None,
        }];
        assert!(validate_required_coverage(&specs, &fields(&["email"])).is_ok());
        let missing =
            validate_required_coverage(&specs, &fields(&["email", "last_name"])).unwrap_err();
        assert_eq!(missing, vec!["last_name"]);

        let mut duplicated = specs.clone();
        duplicated.push(specs[0].clone());
        assert!(validate_required_coverage(&duplicated, &fields(&["email"])).is_err());
    }

    #[test]
    fn map_record_applies_transforms() {
        let record = SourceRecord::new("r1")
            .with_field("Email", json!("  USER@Example.COM  "))
            .with_field("first", json!("Ada"))
            .with_field("last", json!("Lovelace"));
        let specs = vec![
            FieldMappingSpec {
                source_field: "Email".into(),
                destination_field: "email".into(),
                required: true,
                transform: Some("trim".into()),
                confidence: None,
            },
            FieldMappingSpec {
                source_field: "first".into(),
                destination_field: "full_name".into(),
                required: false,
                transform: Some("concat:last".into()),
                confidence: None,
            },
        ];

        let mapped = map_record(&record, &specs).unwrap();
        assert_eq!(mapped.fields["email"], json!("USER@Example.COM"));
        assert_eq!(mapped.fields["full_name"], json!("Ada Lovelace"));
    }

    #[test]
    fn unknown_rule_is_an_error() {
        let record = SourceRecord::new("r1").with_field("a", json!("x"));
        let specs = vec![FieldMappingSpec {
            source_field: "a".into(),
            destination_field: "b".into(),
            required: false,
            transform: Some("reverse".into()),
            confidence: None,
        }];
        assert!(map_record(&record, &specs).is_err());
    }

    struct StaticProvider(Vec<MappingSuggestion>);

    #[async_trait]
    impl SuggestionProvider for StaticProvider {
        async fn suggest(&self, _: &[String], _: &[String]) -> Result<Vec<MappingSuggestion>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn provider_overlays_heuristic_when_more_confident() {
        let source = fields(&["custom_12", "email"]);
        let dest = fields(&["email", "sic_code"]);
        let provider = StaticProvider(vec![MappingSuggestion {
            source_field: "custom_12".into(),
            destination_field: "sic_code".into(),
            confidence: 0.8,
            reason: "model suggestion".into(),
        }]);

        let report = suggest_with_provider(&source, &dest, Some(&provider)).await;
        assert!(report.unmapped_destination_fields.is_empty());
        assert_eq!(report.suggestions.len(), 2);
    }

    struct FailingProvider;

    #[async_trait]
    impl SuggestionProvider for FailingProvider {
        async fn suggest(&self, _: &[String], _: &[String]) -> Result<Vec<MappingSuggestion>> {
            anyhow::bail!("service unavailable")
        }
    }

    #[tokio::test]
    async fn heuristic_survives_provider_outage() {
        let source = fields(&["email"]);
        let dest = fields(&["email"]);
        let report = suggest_with_provider(&source, &dest, Some(&FailingProvider)).await;
        assert_eq!(report.suggestions.len(), 1);
    }
}
