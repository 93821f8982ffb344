//! Character confusion pairs for locale-aware spelling correction.
//!
//! Rules are textual pairs like `"ş=s"` or `"ş=s:0.5"` (optional penalty).
//! Pairs are inserted bidirectionally for substitution lookups; the declared
//! direction (`from=to`) also defines how a word folds to its skeleton, so
//! `"ş=s"` folds `ş` to `s` but never `s` to `ş`.
use ahash::AHashMap;

/// A single confusion rule with penalty.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionRule {
    /// The marked form (e.g. `ş`)
    pub from: char,
    /// The plain form it is commonly typed as (e.g. `s`)
    pub to: char,
    /// Score assigned to a correction that used this substitution
    pub penalty: f32,
}

impl ConfusionRule {
    pub fn new(from: char, to: char, penalty: f32) -> Self {
        Self { from, to, penalty }
    }

    /// Parse `"a=b"` or `"a=b:penalty"`. Both sides must be single chars.
    pub fn parse(rule: &str, default_penalty: f32) -> Option<Self> {
        let (pair, penalty) = match rule.split_once(':') {
            Some((pair, p)) => (pair, p.trim().parse::<f32>().unwrap_or(default_penalty)),
            None => (rule, default_penalty),
        };
        let (a, b) = pair.split_once('=')?;
        let mut a_chars = a.trim().chars();
        let mut b_chars = b.trim().chars();
        match (a_chars.next(), a_chars.next(), b_chars.next(), b_chars.next()) {
            (Some(from), None, Some(to), None) if from != to => Some(Self::new(from, to, penalty)),
            _ => None,
        }
    }
}

/// Bidirectional char alternatives plus a one-way fold table.
#[derive(Debug, Clone)]
pub struct ConfusionMap {
    map: AHashMap<char, Vec<(char, f32)>>,
    fold: AHashMap<char, char>,
    default_penalty: f32,
}

impl Default for ConfusionMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfusionMap {
    pub fn new() -> Self {
        Self {
            map: AHashMap::new(),
            fold: AHashMap::new(),
            default_penalty: 0.5,
        }
    }

    /// Build a map from rule strings. Unparseable rules are skipped with a
    /// warning.
    pub fn from_rules<S: AsRef<str>>(rules: &[S]) -> Self {
        let mut cm = Self::new();
        for raw in rules {
            match ConfusionRule::parse(raw.as_ref(), cm.default_penalty) {
                Some(rule) => cm.add_rule(rule.from, rule.to, rule.penalty),
                None => tracing::warn!(rule = raw.as_ref(), "ignoring malformed confusion rule"),
            }
        }
        cm
    }

    /// Add a confusion rule (bidirectional alternatives, one-way fold).
    pub fn add_rule(&mut self, from: char, to: char, penalty: f32) {
        push_unique(self.map.entry(from).or_default(), to, penalty);
        push_unique(self.map.entry(to).or_default(), from, penalty);
        self.fold.insert(from, to);
    }

    /// Alternatives for `ch`, excluding `ch` itself.
    pub fn alternatives(&self, ch: char) -> &[(char, f32)] {
        self.map.get(&ch).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Returns the penalty if `a` and `b` are directly confusable, 0.0 if equal.
    pub fn is_equivalent(&self, a: char, b: char) -> Option<f32> {
        if a == b {
            return Some(0.0);
        }
        self.alternatives(a)
            .iter()
            .find(|(alt, _)| *alt == b)
            .map(|(_, p)| *p)
    }

    /// Every word reachable by replacing exactly one char with a confusable
    /// alternative, with the penalty of that substitution.
    pub fn single_substitutions(&self, word: &str) -> Vec<(String, f32)> {
        let chars: Vec<char> = word.chars().collect();
        let mut out = Vec::new();
        for (i, ch) in chars.iter().enumerate() {
            for (alt, penalty) in self.alternatives(*ch) {
                let mut variant = chars.clone();
                variant[i] = *alt;
                out.push((variant.into_iter().collect(), *penalty));
            }
        }
        out
    }

    /// Fold every marked char to its plain form.
    pub fn fold(&self, word: &str) -> String {
        word.chars()
            .map(|c| self.fold.get(&c).copied().unwrap_or(c))
            .collect()
    }

    pub fn default_penalty(&self) -> f32 {
        self.default_penalty
    }

    pub fn set_default_penalty(&mut self, penalty: f32) {
        self.default_penalty = penalty;
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn push_unique(alts: &mut Vec<(char, f32)>, ch: char, penalty: f32) {
    if !alts.iter().any(|(c, _)| *c == ch) {
        alts.push((ch, penalty));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rules_with_and_without_penalty() {
        assert_eq!(
            ConfusionRule::parse("ş=s", 0.5),
            Some(ConfusionRule::new('ş', 's', 0.5))
        );
        assert_eq!(
            ConfusionRule::parse(" ğ = g :0.7", 0.5),
            Some(ConfusionRule::new('ğ', 'g', 0.7))
        );
        assert_eq!(ConfusionRule::parse("sh=s", 0.5), None);
        assert_eq!(ConfusionRule::parse("a=a", 0.5), None);
        assert_eq!(ConfusionRule::parse("garbage", 0.5), None);
    }

    #[test]
    fn alternatives_are_bidirectional() {
        let cm = ConfusionMap::from_rules(&["ı=i", "ş=s"]);
        assert_eq!(cm.alternatives('ı'), &[('i', 0.5)]);
        assert_eq!(cm.alternatives('i'), &[('ı', 0.5)]);
        assert_eq!(cm.is_equivalent('s', 'ş'), Some(0.5));
        assert_eq!(cm.is_equivalent('s', 's'), Some(0.0));
        assert_eq!(cm.is_equivalent('s', 'x'), None);
    }

    #[test]
    fn single_substitutions_touch_one_position() {
        let cm = ConfusionMap::from_rules(&["ı=i"]);
        let mut variants: Vec<String> = cm
            .single_substitutions("bilgı")
            .into_iter()
            .map(|(w, _)| w)
            .collect();
        variants.sort();
        assert_eq!(variants, vec!["bılgı", "bilgi"]);
    }

    #[test]
    fn fold_is_one_way() {
        let cm = ConfusionMap::from_rules(&["ş=s", "ü=u", "ı=i"]);
        assert_eq!(cm.fold("teşekkür"), "tesekkur");
        assert_eq!(cm.fold("sıkıntı"), "sikinti");
        assert_eq!(cm.fold("tesekkur"), "tesekkur");
    }
}
