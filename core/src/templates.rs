//! Canned response templates addressed by short triggers.
//!
//! Templates are grouped in categories loaded from JSON reference data. All
//! triggers are indexed case-insensitively; when two categories declare the
//! same trigger the later one wins. A `custom` category holds user templates
//! and is the only part that is persisted.
//!
//! Bodies may contain `{name}` placeholders, filled textually by
//! `fill_variables`.
use crate::context::{ContextAnalysis, Sentiment};
use crate::utils::{char_len, Tokenizer};
use crate::{Error, Result};
use ahash::AHashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^}]+)\}").expect("valid placeholder regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub trigger: String,
    pub body: String,
    #[serde(default)]
    pub description: String,
    /// Key of the owning category, filled in at load time
    #[serde(default)]
    pub category: String,
}

impl Template {
    pub fn new<T: Into<String>, B: Into<String>, D: Into<String>>(trigger: T, body: B, description: D) -> Self {
        Self {
            trigger: trigger.into(),
            body: body.into(),
            description: description.into(),
            category: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCategory {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub templates: Vec<Template>,
}

/// Root of the template JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSet {
    pub categories: Vec<TemplateCategory>,
}

impl TemplateSet {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::ReferenceData(format!("templates: {}", e)))
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}

/// A template together with its category labels and a query score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMatch {
    pub template: Template,
    pub category_name: String,
    pub icon: String,
    pub score: f32,
}

/// Category listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub key: String,
    pub name: String,
    pub icon: String,
    pub template_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub custom_category_key: String,
    pub custom_category_name: String,
    pub custom_category_icon: String,
    /// Icon for categories created implicitly by `add_template`
    pub default_icon: String,
    /// Intent name -> category keys searched by `suggest_by_context`
    pub intent_categories: BTreeMap<String, Vec<String>>,
    /// Used when the intent has no mapping
    pub fallback_category: String,
    /// Trigger fragments that mark apology/complaint templates
    pub apology_cues: Vec<String>,
    pub max_context_results: usize,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            custom_category_key: "custom".to_string(),
            custom_category_name: "Custom".to_string(),
            custom_category_icon: "fas fa-star".to_string(),
            default_icon: "fas fa-file-alt".to_string(),
            intent_categories: intent_map(&[
                ("greeting", &["general"]),
                ("farewell", &["general"]),
                ("thanks", &["general"]),
                ("complaint", &["complaints", "general"]),
                ("question", &["technical", "general", "ecommerce"]),
                ("request", &["ecommerce", "payment", "account"]),
            ]),
            fallback_category: "general".to_string(),
            apology_cues: Vec::new(),
            max_context_results: 5,
        }
    }
}

fn intent_map(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
        .collect()
}

#[derive(Debug, Default)]
struct TemplateTables {
    categories: Vec<TemplateCategory>,
    /// lower-cased trigger -> (category index, template index)
    triggers: AHashMap<String, (usize, usize)>,
}

impl TemplateTables {
    fn rebuild(&mut self, tokenizer: &Tokenizer) {
        self.triggers.clear();
        for (ci, cat) in self.categories.iter_mut().enumerate() {
            for (ti, t) in cat.templates.iter_mut().enumerate() {
                t.category = cat.key.clone();
                self.triggers.insert(tokenizer.key(&t.trigger), (ci, ti));
            }
        }
    }

    /// Indexed templates in category order, skipping shadowed triggers.
    fn visible(&self, tokenizer: &Tokenizer) -> impl Iterator<Item = (String, &TemplateCategory, &Template)> + '_ {
        let tokenizer = *tokenizer;
        self.categories.iter().enumerate().flat_map(move |(ci, cat)| {
            cat.templates.iter().enumerate().filter_map(move |(ti, t)| {
                let key = tokenizer.key(&t.trigger);
                (self.triggers.get(&key) == Some(&(ci, ti))).then_some((key, cat, t))
            })
        })
    }

    fn category_mut(&mut self, key: &str, name: &str, icon: &str) -> &mut TemplateCategory {
        let idx = match self.categories.iter().position(|c| c.key == key) {
            Some(idx) => idx,
            None => {
                self.categories.push(TemplateCategory {
                    key: key.to_string(),
                    name: name.to_string(),
                    icon: icon.to_string(),
                    templates: Vec::new(),
                });
                self.categories.len() - 1
            }
        };
        &mut self.categories[idx]
    }
}

fn to_match(cat: &TemplateCategory, t: &Template, score: f32) -> TemplateMatch {
    TemplateMatch {
        template: t.clone(),
        category_name: cat.name.clone(),
        icon: cat.icon.clone(),
        score,
    }
}

fn sort_matches(v: &mut [TemplateMatch]) {
    v.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.template.trigger.cmp(&b.template.trigger))
    });
}

#[derive(Debug)]
pub struct TemplateIndex {
    tables: RwLock<TemplateTables>,
    config: TemplateConfig,
    tokenizer: Tokenizer,
}

impl TemplateIndex {
    pub fn new(set: TemplateSet, config: TemplateConfig, tokenizer: Tokenizer) -> Self {
        let mut tables = TemplateTables {
            categories: set.categories,
            triggers: AHashMap::new(),
        };
        tables.rebuild(&tokenizer);
        tracing::debug!(templates = tables.triggers.len(), "template index built");
        Self {
            tables: RwLock::new(tables),
            config,
            tokenizer,
        }
    }

    pub fn empty(config: TemplateConfig, tokenizer: Tokenizer) -> Self {
        Self::new(TemplateSet::default(), config, tokenizer)
    }

    pub fn from_json_str(json: &str, config: TemplateConfig, tokenizer: Tokenizer) -> Result<Self> {
        Ok(Self::new(TemplateSet::from_json_str(json)?, config, tokenizer))
    }

    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    /// Number of indexed (non-shadowed) templates.
    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.triggers.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========== Lookup ==========

    pub fn get_by_trigger(&self, trigger: &str) -> Option<TemplateMatch> {
        let tables = self.tables.read().ok()?;
        let (ci, ti) = *tables.triggers.get(&self.tokenizer.key(trigger))?;
        let cat = tables.categories.get(ci)?;
        Some(to_match(cat, cat.templates.get(ti)?, 0.0))
    }

    /// Templates whose trigger starts with the typed command (marker
    /// included), scored `len(command) / len(trigger) × 10`.
    pub fn search_commands(&self, command: &str) -> Vec<TemplateMatch> {
        self.try_search_commands(command).unwrap_or_default()
    }

    pub fn try_search_commands(&self, command: &str) -> Result<Vec<TemplateMatch>> {
        let command = self.tokenizer.key(command);
        if command.is_empty() {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().map_err(|_| Error::Poisoned("templates"))?;
        let typed = char_len(&command) as f32;
        let mut out: Vec<TemplateMatch> = tables
            .visible(&self.tokenizer)
            .filter(|(key, _, _)| key.starts_with(&command))
            .map(|(key, cat, t)| to_match(cat, t, typed / char_len(&key).max(1) as f32 * 10.0))
            .collect();
        sort_matches(&mut out);
        Ok(out)
    }

    /// Templates whose trigger, description or body contains `query`.
    /// Trigger-prefix hits score 10, everything else 5.
    pub fn search_by_prefix(&self, query: &str) -> Vec<TemplateMatch> {
        let query = self.tokenizer.key(query);
        if query.is_empty() {
            return Vec::new();
        }
        let Ok(tables) = self.tables.read() else {
            return Vec::new();
        };
        let mut out: Vec<TemplateMatch> = tables
            .visible(&self.tokenizer)
            .filter(|(key, _, t)| {
                key.contains(&query)
                    || self.tokenizer.fold_case(&t.description).contains(&query)
                    || self.tokenizer.fold_case(&t.body).contains(&query)
            })
            .map(|(key, cat, t)| to_match(cat, t, if key.starts_with(&query) { 10.0 } else { 5.0 }))
            .collect();
        sort_matches(&mut out);
        out
    }

    /// Templates from the categories mapped to the detected intent, scored by
    /// keyword overlap and, for negative sentiment, apology cues in the trigger.
    pub fn suggest_by_context(&self, analysis: &ContextAnalysis) -> Vec<TemplateMatch> {
        let Ok(tables) = self.tables.read() else {
            return Vec::new();
        };
        let fallback = std::slice::from_ref(&self.config.fallback_category);
        let wanted = self
            .config
            .intent_categories
            .get(analysis.intent.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(fallback);
        let keywords: Vec<String> = analysis.keywords.iter().map(|k| self.tokenizer.key(k)).collect();
        let cues: Vec<String> = self.config.apology_cues.iter().map(|c| self.tokenizer.key(c)).collect();

        let mut out = Vec::new();
        for key in wanted {
            let Some(cat) = tables.categories.iter().find(|c| &c.key == key) else {
                continue;
            };
            for t in cat.templates.iter() {
                let body = self.tokenizer.fold_case(&t.body);
                let desc = self.tokenizer.fold_case(&t.description);
                let hits = keywords
                    .iter()
                    .filter(|k| !k.is_empty() && (body.contains(k.as_str()) || desc.contains(k.as_str())))
                    .count();
                let mut score = 1.0 + 2.0 * hits as f32;
                let trigger = self.tokenizer.key(&t.trigger);
                if analysis.sentiment == Sentiment::Negative && cues.iter().any(|c| trigger.contains(c.as_str())) {
                    score += 3.0;
                }
                out.push(to_match(cat, t, score));
            }
        }
        // stable: equal scores keep category order
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(self.config.max_context_results);
        out
    }

    /// First `limit` templates of the first category.
    pub fn leading(&self, limit: usize) -> Vec<TemplateMatch> {
        let Ok(tables) = self.tables.read() else {
            return Vec::new();
        };
        tables
            .categories
            .first()
            .map(|cat| cat.templates.iter().take(limit).map(|t| to_match(cat, t, 0.0)).collect())
            .unwrap_or_default()
    }

    pub fn by_category(&self, key: &str) -> Vec<Template> {
        self.tables
            .read()
            .ok()
            .and_then(|t| t.categories.iter().find(|c| c.key == key).map(|c| c.templates.clone()))
            .unwrap_or_default()
    }

    pub fn categories(&self) -> Vec<CategorySummary> {
        self.tables
            .read()
            .map(|t| {
                t.categories
                    .iter()
                    .map(|c| CategorySummary {
                        key: c.key.clone(),
                        name: c.name.clone(),
                        icon: c.icon.clone(),
                        template_count: c.templates.len(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    // ========== Variables ==========

    /// Replace `{name}` placeholders. Unknown or empty values leave the
    /// placeholder verbatim.
    pub fn fill_variables(body: &str, values: &HashMap<String, String>) -> String {
        PLACEHOLDER
            .replace_all(body, |caps: &regex::Captures| match values.get(&caps[1]) {
                Some(v) if !v.is_empty() => v.clone(),
                _ => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Placeholder names in first-appearance order, without duplicates.
    pub fn extract_variables(body: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for caps in PLACEHOLDER.captures_iter(body) {
            let name = &caps[1];
            if !out.iter().any(|v| v == name) {
                out.push(name.to_string());
            }
        }
        out
    }

    // ========== Mutation ==========

    /// Append a template to `category_key`, creating the category if needed.
    pub fn add_template(&self, category_key: &str, template: Template) -> Result<()> {
        if template.trigger.trim().is_empty() || template.body.trim().is_empty() {
            return Err(Error::ReferenceData("template needs a trigger and a body".to_string()));
        }
        let mut tables = self.tables.write().map_err(|_| Error::Poisoned("templates"))?;
        let cat = tables.category_mut(category_key, category_key, &self.config.default_icon);
        let key = self.tokenizer.key(&template.trigger);
        cat.templates.retain(|t| self.tokenizer.key(&t.trigger) != key);
        cat.templates.push(template);
        tables.rebuild(&self.tokenizer);
        Ok(())
    }

    /// Add a user template to the custom category.
    pub fn add_custom_template(&self, trigger: &str, body: &str, description: &str) -> Result<()> {
        {
            let mut tables = self.tables.write().map_err(|_| Error::Poisoned("templates"))?;
            tables.category_mut(
                &self.config.custom_category_key,
                &self.config.custom_category_name,
                &self.config.custom_category_icon,
            );
        }
        self.add_template(&self.config.custom_category_key, Template::new(trigger, body, description))
    }

    /// Remove every template with this trigger. Returns true if any was removed.
    pub fn remove_template(&self, trigger: &str) -> bool {
        let key = self.tokenizer.key(trigger);
        let Ok(mut tables) = self.tables.write() else {
            return false;
        };
        let mut removed = false;
        for cat in tables.categories.iter_mut() {
            let before = cat.templates.len();
            cat.templates.retain(|t| self.tokenizer.key(&t.trigger) != key);
            removed |= cat.templates.len() != before;
        }
        if removed {
            tables.rebuild(&self.tokenizer);
        }
        removed
    }

    // ========== Persistence ==========

    /// Custom templates as a JSON list.
    pub fn custom_to_json(&self) -> Result<String> {
        let custom = self.by_category(&self.config.custom_category_key);
        Ok(serde_json::to_string(&custom)?)
    }

    /// Replace the custom category with a JSON list from `custom_to_json`.
    /// Returns the number of templates loaded.
    pub fn custom_from_json(&self, json: &str) -> Result<usize> {
        let mut templates: Vec<Template> = serde_json::from_str(json)?;
        templates.retain(|t| !t.trigger.trim().is_empty() && !t.body.trim().is_empty());
        let count = templates.len();
        let mut tables = self.tables.write().map_err(|_| Error::Poisoned("templates"))?;
        let cat = tables.category_mut(
            &self.config.custom_category_key,
            &self.config.custom_category_name,
            &self.config.custom_category_icon,
        );
        cat.templates = templates;
        tables.rebuild(&self.tokenizer);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Intent;

    const JSON: &str = r#"{
        "categories": [
            {"key": "general", "name": "Genel", "icon": "fas fa-headset", "templates": [
                {"trigger": "/merhaba", "body": "Merhaba, {firma_adi} hoş geldiniz.", "description": "Karşılama"},
                {"trigger": "/bekle", "body": "Lütfen bekleyiniz.", "description": "Bekleme"}
            ]},
            {"key": "complaints", "name": "Şikayetler", "icon": "fas fa-exclamation", "templates": [
                {"trigger": "/özür", "body": "Yaşadığınız gecikme için özür dileriz.", "description": "Özür"},
                {"trigger": "/inceleme", "body": "Talebinizi inceliyoruz.", "description": "İnceleme"}
            ]},
            {"key": "shortcuts", "name": "Kısayollar", "icon": "fas fa-bolt", "templates": [
                {"trigger": "/mrb", "body": "Merhaba", "description": "Kısaltma"}
            ]}
        ]
    }"#;

    fn index() -> TemplateIndex {
        let config = TemplateConfig {
            apology_cues: vec!["özür".to_string()],
            ..Default::default()
        };
        TemplateIndex::from_json_str(JSON, config, Tokenizer::new(true)).expect("templates")
    }

    fn triggers(v: &[TemplateMatch]) -> Vec<&str> {
        v.iter().map(|m| m.template.trigger.as_str()).collect()
    }

    #[test]
    fn triggers_are_case_insensitive() {
        let idx = index();
        assert_eq!(idx.len(), 5);
        let m = idx.get_by_trigger("/MERHABA").expect("trigger");
        assert_eq!(m.template.category, "general");
        assert_eq!(m.category_name, "Genel");
        assert!(idx.get_by_trigger("/yok").is_none());
    }

    #[test]
    fn command_search_scores_by_coverage() {
        let idx = index();
        let out = idx.search_commands("/m");
        assert_eq!(triggers(&out), vec!["/mrb", "/merhaba"]);
        assert!((out[0].score - 5.0).abs() < 1e-6);
        assert!((out[1].score - 2.5).abs() < 1e-6);
        assert!(idx.search_commands("").is_empty());
        assert!(idx.search_commands("/zzz").is_empty());
    }

    #[test]
    fn free_text_search_prefers_trigger_prefix() {
        let idx = index();
        let out = idx.search_by_prefix("/be");
        assert_eq!(out[0].template.trigger, "/bekle");
        assert_eq!(out[0].score, 10.0);
        let content = idx.search_by_prefix("gecikme");
        assert_eq!(triggers(&content), vec!["/özür"]);
        assert_eq!(content[0].score, 5.0);
    }

    #[test]
    fn placeholders_fill_and_extract() {
        let mut values = HashMap::new();
        values.insert("firma_adi".to_string(), "ACME".to_string());
        values.insert("bos".to_string(), String::new());
        let body = "Merhaba {firma_adi}, {siparis_no} {bos} {firma_adi}";
        assert_eq!(
            TemplateIndex::fill_variables(body, &values),
            "Merhaba ACME, {siparis_no} {bos} ACME"
        );
        assert_eq!(
            TemplateIndex::extract_variables(body),
            vec!["firma_adi", "siparis_no", "bos"]
        );
    }

    #[test]
    fn custom_templates_round_trip() {
        let idx = index();
        idx.add_custom_template("/iade", "İade talebiniz alındı.", "İade").expect("add");
        assert!(idx.get_by_trigger("/iade").is_some());
        assert!(idx.add_custom_template("", "x", "").is_err());
        let json = idx.custom_to_json().expect("json");

        let fresh = index();
        assert_eq!(fresh.custom_from_json(&json).expect("load"), 1);
        let m = fresh.get_by_trigger("/iade").expect("custom");
        assert_eq!(m.template.category, "custom");
        assert!(fresh.custom_from_json("nope").is_err());
    }

    #[test]
    fn later_category_shadows_trigger() {
        let idx = index();
        idx.add_template("shortcuts", Template::new("/bekle", "Bir saniye.", "")).expect("add");
        assert_eq!(idx.get_by_trigger("/bekle").map(|m| m.template.body), Some("Bir saniye.".to_string()));
        assert_eq!(idx.search_commands("/bek").len(), 1);
    }

    #[test]
    fn remove_template_rebuilds_index() {
        let idx = index();
        assert!(idx.remove_template("/MRB"));
        assert!(idx.get_by_trigger("/mrb").is_none());
        assert!(!idx.remove_template("/mrb"));
        assert_eq!(idx.by_category("shortcuts").len(), 0);
    }

    #[test]
    fn context_suggestions_favour_apologies_when_negative() {
        let idx = index();
        let analysis = ContextAnalysis {
            intent: Intent::Complaint,
            sentiment: Sentiment::Negative,
            sentiment_score: -1.0,
            is_question: false,
            keywords: vec!["gecikme".to_string()],
        };
        let out = idx.suggest_by_context(&analysis);
        assert_eq!(out[0].template.trigger, "/özür");
        assert_eq!(out[0].score, 6.0);
        assert!(out.len() <= 5);
    }

    #[test]
    fn categories_and_leading() {
        let idx = index();
        let cats = idx.categories();
        assert_eq!(cats[0].key, "general");
        assert_eq!(cats[0].template_count, 2);
        assert_eq!(triggers(&idx.leading(2)), vec!["/merhaba", "/bekle"]);
    }

    #[test]
    fn malformed_json_is_reference_error() {
        let err = TemplateSet::from_json_str("{]").expect_err("bad json");
        assert!(matches!(err, Error::ReferenceData(_)));
    }
}
