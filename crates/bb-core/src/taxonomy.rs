use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::document::Settings;

/// Theme → topic catalogue that topic selections are checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Taxonomy {
    pub default_theme: String,
    pub themes: BTreeMap<String, Vec<String>>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        let themes = [
            (
                "general",
                &["history", "geography", "science", "art"][..],
            ),
            (
                "programming",
                &["rust", "javascript", "algorithms", "databases"][..],
            ),
            (
                "languages",
                &["spanish", "french", "japanese", "german"][..],
            ),
        ];
        Self {
            default_theme: "general".to_string(),
            themes: themes
                .iter()
                .map(|(theme, topics)| {
                    (
                        theme.to_string(),
                        topics.iter().map(|t| t.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl Taxonomy {
    pub fn has_theme(&self, theme: &str) -> bool {
        self.themes.contains_key(theme)
    }

    /// Theme that lists `topic`; the first in key order if several do.
    pub fn owner_of(&self, topic: &str) -> Option<&str> {
        self.themes
            .iter()
            .find(|(_, topics)| topics.iter().any(|t| t == topic))
            .map(|(theme, _)| theme.as_str())
    }

    /// Every theme with all of its topics selected.
    pub fn initial_selection(&self) -> BTreeMap<String, Vec<String>> {
        self.themes.clone()
    }

    /// Re-file misplaced topics under their owning theme, drop unknown ones,
    /// and reset an unknown selected theme. Returns whether anything changed.
    pub fn repair(&self, settings: &mut Settings) -> bool {
        let mut repaired: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (theme, topics) in &settings.selected_topics_by_theme {
            if self.has_theme(theme) {
                repaired.entry(theme.clone()).or_default();
            }
            for topic in topics {
                match self.owner_of(topic) {
                    Some(owner) => {
                        if owner != theme {
                            tracing::debug!(%topic, from = %theme, to = owner, "refiling topic");
                        }
                        let slot = repaired.entry(owner.to_string()).or_default();
                        if !slot.contains(topic) {
                            slot.push(topic.clone());
                        }
                    }
                    None => tracing::debug!(%topic, %theme, "dropping unknown topic"),
                }
            }
        }

        let mut changed = repaired != settings.selected_topics_by_theme;
        settings.selected_topics_by_theme = repaired;

        if !self.has_theme(&settings.selected_theme) {
            tracing::debug!(theme = %settings.selected_theme, "unknown selected theme; using default");
            settings.selected_theme = self.default_theme.clone();
            changed = true;
        }
        changed
    }
}
