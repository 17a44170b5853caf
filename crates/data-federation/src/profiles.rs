use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use council_core::{CouncilError, CouncilResult, DataCategory, MarketType, SourceTag};
use serde::{Deserialize, Serialize};

/// On-disk profile document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileFile {
    pub version: String,
    pub current_profile: String,
    pub priority_profiles: HashMap<String, ProfileEntry>,
    #[serde(default)]
    pub custom_overrides: Option<CustomOverrides>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// "{market}_{category}" -> ordered source tags (strings on disk;
    /// unknown tags are skipped with a warning at resolve time).
    pub priorities: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomOverrides {
    pub enabled: bool,
    pub overrides: HashMap<String, Vec<String>>,
}

/// Resolved, immutable view the federation reads on every fetch. Swapped
/// atomically as a whole; readers clone the Arc and never see a half
/// applied profile.
#[derive(Debug, Clone)]
pub struct PriorityConfig {
    pub profile_name: String,
    priorities: HashMap<String, Vec<SourceTag>>,
}

impl PriorityConfig {
    pub fn lookup(&self, market: MarketType, category: DataCategory) -> &[SourceTag] {
        self.priorities
            .get(&profile_key(market, category))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

pub fn profile_key(market: MarketType, category: DataCategory) -> String {
    format!("{}_{}", market.as_key(), category.as_key())
}

fn resolve_tags(key: &str, names: &[String]) -> Vec<SourceTag> {
    names
        .iter()
        .filter_map(|name| {
            let tag = SourceTag::parse(name);
            if tag.is_none() {
                tracing::warn!(key, source = %name, "unknown source tag in profile, skipping");
            }
            tag
        })
        .collect()
}

fn resolve(file: &ProfileFile, profile_name: &str) -> CouncilResult<PriorityConfig> {
    let entry = file.priority_profiles.get(profile_name).ok_or_else(|| {
        CouncilError::NotFound(format!("priority profile not found: {profile_name}"))
    })?;

    let mut priorities: HashMap<String, Vec<SourceTag>> = entry
        .priorities
        .iter()
        .map(|(key, names)| (key.clone(), resolve_tags(key, names)))
        .collect();

    if let Some(overrides) = &file.custom_overrides {
        if overrides.enabled {
            for (key, names) in &overrides.overrides {
                priorities.insert(key.clone(), resolve_tags(key, names));
                tracing::info!(key, "applied custom priority override");
            }
        }
    }

    Ok(PriorityConfig {
        profile_name: profile_name.to_string(),
        priorities,
    })
}

/// Built-in defaults used when no profile file is configured, mirroring
/// the source coverage matrix: CN-A leans on tushare with free fallbacks,
/// US on the keyed providers with yfinance last.
fn default_file() -> ProfileFile {
    let mut priorities = HashMap::new();
    let p = |sources: &[&str]| sources.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    priorities.insert("cn_a_basic_info".into(), p(&["tushare", "akshare"]));
    priorities.insert(
        "cn_a_price_data".into(),
        p(&["tushare", "akshare", "baostock"]),
    );
    priorities.insert(
        "cn_a_fundamentals".into(),
        p(&["tushare", "baostock"]),
    );
    priorities.insert("cn_a_news".into(), p(&["akshare"]));
    priorities.insert(
        "us_basic_info".into(),
        p(&["alpha_vantage", "twelve_data", "finnhub", "yfinance", "akshare"]),
    );
    priorities.insert(
        "us_price_data".into(),
        p(&["alpha_vantage", "twelve_data", "finnhub", "yfinance", "akshare"]),
    );
    priorities.insert(
        "us_fundamentals".into(),
        p(&["alpha_vantage", "finnhub"]),
    );
    priorities.insert("us_news".into(), p(&["finnhub", "akshare"]));
    priorities.insert("hk_basic_info".into(), p(&["akshare", "yfinance"]));
    priorities.insert("hk_price_data".into(), p(&["akshare", "yfinance"]));
    priorities.insert("hk_news".into(), p(&["akshare"]));

    let mut profiles = HashMap::new();
    profiles.insert(
        "default".to_string(),
        ProfileEntry {
            name: "default".to_string(),
            description: "Built-in source priorities".to_string(),
            priorities,
        },
    );

    ProfileFile {
        version: "1.0".to_string(),
        current_profile: "default".to_string(),
        priority_profiles: profiles,
        custom_overrides: None,
    }
}

/// Named-profile manager. Holds the raw document (for CRUD) and the
/// resolved active config (for fetch-path reads).
pub struct ProfileManager {
    file: RwLock<ProfileFile>,
    active: RwLock<Arc<PriorityConfig>>,
}

impl ProfileManager {
    pub fn with_defaults() -> Self {
        let file = default_file();
        let active = resolve(&file, &file.current_profile)
            .expect("built-in default profile must resolve");
        Self {
            file: RwLock::new(file),
            active: RwLock::new(Arc::new(active)),
        }
    }

    pub fn load(path: &Path) -> CouncilResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CouncilError::Validation(format!("cannot read profile file {}: {e}", path.display()))
        })?;
        let file: ProfileFile = serde_json::from_str(&raw)
            .map_err(|e| CouncilError::Validation(format!("invalid profile file: {e}")))?;
        let active = resolve(&file, &file.current_profile)?;
        tracing::info!(
            profile = %file.current_profile,
            path = %path.display(),
            "loaded priority profiles"
        );
        Ok(Self {
            file: RwLock::new(file),
            active: RwLock::new(Arc::new(active)),
        })
    }

    /// Consistent snapshot for the fetch path; never blocks on writers
    /// longer than the pointer clone.
    pub fn active(&self) -> Arc<PriorityConfig> {
        self.active.read().expect("profile lock poisoned").clone()
    }

    pub fn current_profile(&self) -> String {
        self.file
            .read()
            .expect("profile lock poisoned")
            .current_profile
            .clone()
    }

    pub fn available_profiles(&self) -> Vec<(String, String)> {
        let file = self.file.read().expect("profile lock poisoned");
        file.priority_profiles
            .values()
            .map(|p| (p.name.clone(), p.description.clone()))
            .collect()
    }

    /// Switch the active profile; the swap is atomic from the fetch
    /// path's point of view.
    pub fn set_current(&self, profile_name: &str) -> CouncilResult<()> {
        let mut file = self.file.write().expect("profile lock poisoned");
        let resolved = resolve(&file, profile_name)?;
        file.current_profile = profile_name.to_string();
        *self.active.write().expect("profile lock poisoned") = Arc::new(resolved);
        tracing::info!(profile = %profile_name, "switched priority profile");
        Ok(())
    }

    /// Create a named profile from an existing base.
    pub fn create_profile(
        &self,
        name: &str,
        description: &str,
        base: &str,
    ) -> CouncilResult<()> {
        let mut file = self.file.write().expect("profile lock poisoned");
        if file.priority_profiles.contains_key(name) {
            return Err(CouncilError::Validation(format!(
                "profile already exists: {name}"
            )));
        }
        let base_priorities = file
            .priority_profiles
            .get(base)
            .ok_or_else(|| CouncilError::NotFound(format!("base profile not found: {base}")))?
            .priorities
            .clone();
        file.priority_profiles.insert(
            name.to_string(),
            ProfileEntry {
                name: name.to_string(),
                description: description.to_string(),
                priorities: base_priorities,
            },
        );
        Ok(())
    }

    pub fn delete_profile(&self, name: &str) -> CouncilResult<()> {
        if name == "default" {
            return Err(CouncilError::Validation(
                "the default profile cannot be deleted".to_string(),
            ));
        }
        let mut file = self.file.write().expect("profile lock poisoned");
        if file.priority_profiles.remove(name).is_none() {
            return Err(CouncilError::NotFound(format!("profile not found: {name}")));
        }
        if file.current_profile == name {
            file.current_profile = "default".to_string();
            let resolved = resolve(&file, "default")?;
            *self.active.write().expect("profile lock poisoned") = Arc::new(resolved);
        }
        Ok(())
    }

    /// Layer a per-category override on top of the active profile without
    /// mutating the named profile itself.
    pub fn set_override(
        &self,
        market: MarketType,
        category: DataCategory,
        sources: Vec<String>,
    ) -> CouncilResult<()> {
        for name in &sources {
            if SourceTag::parse(name).is_none() {
                return Err(CouncilError::Validation(format!(
                    "unknown source tag: {name}"
                )));
            }
        }
        let mut file = self.file.write().expect("profile lock poisoned");
        let overrides = file.custom_overrides.get_or_insert(CustomOverrides {
            enabled: true,
            overrides: HashMap::new(),
        });
        overrides.enabled = true;
        overrides
            .overrides
            .insert(profile_key(market, category), sources);
        let current = file.current_profile.clone();
        let resolved = resolve(&file, &current)?;
        *self.active.write().expect("profile lock poisoned") = Arc::new(resolved);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_resolves_known_tags() {
        let manager = ProfileManager::with_defaults();
        let config = manager.active();
        let order = config.lookup(MarketType::CnA, DataCategory::PriceData);
        assert_eq!(
            order,
            &[SourceTag::Tushare, SourceTag::Akshare, SourceTag::Baostock]
        );
    }

    #[test]
    fn unknown_tags_are_skipped_not_fatal() {
        let mut file = default_file();
        file.priority_profiles
            .get_mut("default")
            .unwrap()
            .priorities
            .insert(
                "us_price_data".to_string(),
                vec!["bloomberg".to_string(), "yfinance".to_string()],
            );
        let config = resolve(&file, "default").unwrap();
        assert_eq!(
            config.lookup(MarketType::Us, DataCategory::PriceData),
            &[SourceTag::Yfinance]
        );
    }

    #[test]
    fn profile_switch_swaps_active_atomically() {
        let manager = ProfileManager::with_defaults();
        manager
            .create_profile("cn_only", "CN sources first", "default")
            .unwrap();
        manager.set_current("cn_only").unwrap();
        assert_eq!(manager.active().profile_name, "cn_only");
        assert_eq!(manager.current_profile(), "cn_only");
    }

    #[test]
    fn override_layers_without_touching_profile() {
        let manager = ProfileManager::with_defaults();
        manager
            .set_override(
                MarketType::Us,
                DataCategory::PriceData,
                vec!["yfinance".to_string()],
            )
            .unwrap();
        assert_eq!(
            manager.active().lookup(MarketType::Us, DataCategory::PriceData),
            &[SourceTag::Yfinance]
        );
        // The named profile is untouched; deleting the override on a
        // fresh manager still shows the full list.
        let fresh = ProfileManager::with_defaults();
        assert!(fresh
            .active()
            .lookup(MarketType::Us, DataCategory::PriceData)
            .len()
            > 1);
    }

    #[test]
    fn default_profile_cannot_be_deleted() {
        let manager = ProfileManager::with_defaults();
        assert!(manager.delete_profile("default").is_err());
    }
}
