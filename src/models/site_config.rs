use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Socials {
    #[serde(default)]
    pub linkedin: String,
    #[serde(default)]
    pub github: String,
    #[serde(default)]
    pub twitter: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub role: String,
    pub email: String,
    #[serde(default)]
    pub socials: Socials,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hero {
    pub headline: String,
    #[serde(default)]
    pub subheadline: String,
    #[serde(default)]
    pub cta_primary: String,
    #[serde(default)]
    pub cta_secondary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct About {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SeoDefaults {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    pub show_skills: bool,
    pub show_contact: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub tool: String,
    pub level: u8,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomStat {
    pub label: String,
    pub value: String,
}

impl Skill {
    /// Needs a tool name; the level is clamped into 0..=100.
    fn repair(raw: &Value) -> Option<Self> {
        let tool = raw.get("tool")?.as_str()?.trim();
        if tool.is_empty() {
            return None;
        }
        let level = raw.get("level").and_then(whole_number).unwrap_or(0).min(100) as u8;
        Some(Skill {
            tool: tool.to_string(),
            level,
            description: raw
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

impl CustomStat {
    fn repair(raw: &Value) -> Option<Self> {
        let label = raw.get("label")?.as_str()?.to_string();
        let value = match raw.get("value")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(CustomStat { label, value })
    }
}

/// Site-wide settings singleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    pub profile: Profile,
    pub hero: Hero,
    pub about: About,
    pub seo: SeoDefaults,
    pub features: Features,
    pub skills: Vec<Skill>,
    pub experience: u32,
    pub custom_stats: Vec<CustomStat>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        SiteConfig {
            profile: Profile {
                name: "Portfolio Owner".to_string(),
                role: "Data Analyst".to_string(),
                email: "hello@example.com".to_string(),
                socials: Socials::default(),
            },
            hero: Hero {
                headline: "Turning data into decisions".to_string(),
                subheadline: "Dashboards and reports built with Power BI, Tableau and Excel".to_string(),
                cta_primary: "View Projects".to_string(),
                cta_secondary: "Contact Me".to_string(),
            },
            about: About::default(),
            seo: SeoDefaults::default(),
            features: Features {
                show_skills: true,
                show_contact: true,
            },
            skills: Vec::new(),
            experience: 5,
            custom_stats: vec![
                CustomStat {
                    label: "Dashboards Delivered".to_string(),
                    value: "50+".to_string(),
                },
                CustomStat {
                    label: "Reports Created".to_string(),
                    value: "100+".to_string(),
                },
                CustomStat {
                    label: "Enterprise Clients".to_string(),
                    value: "25+".to_string(),
                },
            ],
        }
    }
}

impl SiteConfig {
    pub fn defaults_value() -> Value {
        serde_json::to_value(SiteConfig::default()).unwrap_or(Value::Null)
    }

    /// Merge stored JSON onto the defaults. Keys missing from `stored`
    /// keep their default; values whose JSON type differs from the default
    /// are ignored. A section that still fails to deserialize falls back
    /// on its own, so one bad value never discards the rest.
    pub fn from_stored(stored: &Value) -> Self {
        let mut merged = SiteConfig::defaults_value();
        merge_typed(&mut merged, stored);

        let defaults = SiteConfig::default();
        SiteConfig {
            profile: section(&merged, "profile", defaults.profile),
            hero: section(&merged, "hero", defaults.hero),
            about: section(&merged, "about", defaults.about),
            seo: section(&merged, "seo", defaults.seo),
            features: section(&merged, "features", defaults.features),
            skills: entries(&merged, "skills", Skill::repair),
            experience: merged
                .get("experience")
                .and_then(whole_number)
                .map(|n| n.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.experience),
            custom_stats: entries(&merged, "customStats", CustomStat::repair),
        }
    }

    /// Apply a partial update document on top of this config.
    pub fn merged_with(&self, patch: &Value) -> Result<Self, String> {
        let mut merged = serde_json::to_value(self).map_err(|e| e.to_string())?;
        merge_patch(&mut merged, patch);
        serde_json::from_value(merged).map_err(|e| e.to_string())
    }
}

fn section<T: DeserializeOwned>(merged: &Value, key: &str, fallback: T) -> T {
    match merged.get(key).map(|v| T::deserialize(v)) {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            warn!("Config section '{}' unusable, keeping defaults: {}", key, e);
            fallback
        }
        None => fallback,
    }
}

/// Per-entry repair of a list section; entries that cannot be repaired
/// are dropped with a warning.
fn entries<T>(merged: &Value, key: &str, repair: fn(&Value) -> Option<T>) -> Vec<T> {
    let items = match merged.get(key) {
        Some(Value::Array(items)) => items,
        _ => return Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| {
            let fixed = repair(item);
            if fixed.is_none() {
                warn!("Dropping unusable {} entry: {}", key, item);
            }
            fixed
        })
        .collect()
}

/// Non-negative number rounded to the nearest whole value.
fn whole_number(v: &Value) -> Option<u64> {
    v.as_u64()
        .or_else(|| v.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f.round() as u64))
}

/// Deep merge that only accepts overlay values of the same JSON type as
/// the base. Arrays are replaced wholesale.
fn merge_typed(base: &mut Value, overlay: &Value) {
    if let (Value::Object(b), Value::Object(o)) = (&mut *base, overlay) {
        for (key, ov) in o {
            match b.get_mut(key) {
                Some(bv) => merge_typed(bv, ov),
                None => {
                    b.insert(key.clone(), ov.clone());
                }
            }
        }
        return;
    }
    if same_kind(base, overlay) {
        *base = overlay.clone();
    }
}

/// Deep merge for updates: objects merge recursively, everything else is
/// replaced, so type errors surface during deserialization.
fn merge_patch(base: &mut Value, patch: &Value) {
    if let (Value::Object(b), Value::Object(p)) = (&mut *base, patch) {
        for (key, pv) in p {
            match b.get_mut(key) {
                Some(bv) if bv.is_object() && pv.is_object() => merge_patch(bv, pv),
                _ => {
                    b.insert(key.clone(), pv.clone());
                }
            }
        }
        return;
    }
    *base = patch.clone();
}

fn same_kind(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Bool(_), Value::Bool(_))
            | (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Array(_), Value::Array(_))
    )
}
