use std::collections::HashMap;

use tracing::warn;

/// A single `source -> destination` channel mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRule {
    pub source_channel_id: String,
    pub dest_channel_id: String,
}

/// Static source-channel to destination-channel table. Built once at startup
/// and shared read-only between forward tasks.
#[derive(Debug, Clone, Default)]
pub struct ForwardRuleTable {
    rules: HashMap<String, String>,
}

impl ForwardRuleTable {
    /// Parse `src1:dst1,src2:dst2,...`. Malformed entries are skipped with a warning.
    pub fn parse(raw: &str) -> Self {
        let mut rules = HashMap::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match parse_entry(entry) {
                Some(rule) => {
                    if let Some(previous) =
                        rules.insert(rule.source_channel_id.clone(), rule.dest_channel_id.clone())
                    {
                        warn!(
                            "Duplicate forward rule for channel {}: {} replaced by {}",
                            rule.source_channel_id, previous, rule.dest_channel_id
                        );
                    }
                }
                None => warn!(
                    "Skipping malformed forward rule {:?} (expected source_id:dest_id)",
                    entry
                ),
            }
        }

        Self { rules }
    }

    pub fn resolve(&self, source_channel_id: &str) -> Option<&str> {
        self.rules.get(source_channel_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ForwardRule> + '_ {
        self.rules.iter().map(|(src, dst)| ForwardRule {
            source_channel_id: src.clone(),
            dest_channel_id: dst.clone(),
        })
    }
}

fn parse_entry(entry: &str) -> Option<ForwardRule> {
    let (src, dst) = entry.split_once(':')?;
    let (src, dst) = (src.trim(), dst.trim());
    if src.is_empty() || dst.is_empty() || dst.contains(':') {
        return None;
    }
    Some(ForwardRule {
        source_channel_id: src.to_string(),
        dest_channel_id: dst.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_configured_sources() {
        let table = ForwardRuleTable::parse("111:222, 333 : 444");
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve("111"), Some("222"));
        assert_eq!(table.resolve("333"), Some("444"));
        assert_eq!(table.resolve("222"), None);
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let table = ForwardRuleTable::parse("111:222,garbage,:555,666:,777:888:999,,  ");
        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve("111"), Some("222"));
        assert_eq!(table.resolve("garbage"), None);
        assert_eq!(table.resolve("666"), None);
        assert_eq!(table.resolve("777"), None);
    }

    #[test]
    fn test_empty_string_yields_empty_table() {
        let table = ForwardRuleTable::parse("");
        assert!(table.is_empty());
        assert_eq!(table.resolve("111"), None);
    }

    #[test]
    fn test_duplicate_source_keeps_last_destination() {
        let table = ForwardRuleTable::parse("1:2,1:3");
        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve("1"), Some("3"));
    }

    #[test]
    fn test_iter_lists_every_rule() {
        let table = ForwardRuleTable::parse("a:b,c:d");
        let mut rules: Vec<ForwardRule> = table.iter().collect();
        rules.sort_by(|x, y| x.source_channel_id.cmp(&y.source_channel_id));
        assert_eq!(
            rules,
            vec![
                ForwardRule {
                    source_channel_id: "a".to_string(),
                    dest_channel_id: "b".to_string(),
                },
                ForwardRule {
                    source_channel_id: "c".to_string(),
                    dest_channel_id: "d".to_string(),
                },
            ]
        );
    }
}
