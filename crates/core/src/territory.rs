use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::vocabulary::normalize_text;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salesperson {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Territory {
    pub zone: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub salesperson: Salesperson,
}

/// Maps a lead's zone to the salesperson covering it.
pub trait TerritoryDirectory: Send + Sync {
    fn resolve(&self, zone: &str) -> Option<Salesperson>;

    fn covers(&self, zone: &str) -> bool {
        self.resolve(zone).is_some()
    }
}

/// Exact lookup on the normalized zone name (case and accent insensitive), aliases included.
#[derive(Clone, Debug, Default)]
pub struct StaticTerritoryDirectory {
    by_zone: BTreeMap<String, Salesperson>,
    territories: Vec<Territory>,
}

impl StaticTerritoryDirectory {
    pub fn new(territories: Vec<Territory>) -> Self {
        let mut by_zone = BTreeMap::new();
        for territory in &territories {
            let keys = std::iter::once(&territory.zone).chain(territory.aliases.iter());
            for key in keys {
                let key = normalize_text(key);
                if !key.is_empty() {
                    by_zone.entry(key).or_insert_with(|| territory.salesperson.clone());
                }
            }
        }
        Self { by_zone, territories }
    }

    pub fn territories(&self) -> &[Territory] {
        &self.territories
    }

    pub fn is_empty(&self) -> bool {
        self.territories.is_empty()
    }
}

impl TerritoryDirectory for StaticTerritoryDirectory {
    fn resolve(&self, zone: &str) -> Option<Salesperson> {
        self.by_zone.get(&normalize_text(zone)).cloned()
    }
}
