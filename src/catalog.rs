use serde::{Deserialize, Serialize};

/// A preset landmark offered without upload and pregenerated in the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Stable id, also the artifact cache key
    pub id: String,
    pub name: String,
    pub location: String,
}

impl CatalogEntry {
    pub fn new(id: &str, name: &str, location: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            location: location.to_string(),
        }
    }
}

/// Built-in presets.
pub fn default_catalog() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry::new("colosseum", "Colosseum", "Rome, Italy"),
        CatalogEntry::new("great-pyramid", "Great Pyramid of Giza", "Giza, Egypt"),
        CatalogEntry::new("machu-picchu", "Machu Picchu", "Cusco Region, Peru"),
        CatalogEntry::new("notre-dame", "Notre-Dame de Paris", "Paris, France"),
        CatalogEntry::new("angkor-wat", "Angkor Wat", "Siem Reap, Cambodia"),
        CatalogEntry::new("acropolis", "Acropolis of Athens", "Athens, Greece"),
        CatalogEntry::new("hagia-sophia", "Hagia Sophia", "Istanbul, Turkey"),
        CatalogEntry::new("great-wall", "Great Wall at Badaling", "Beijing, China"),
    ]
}

/// Look up a preset by id.
pub fn find<'a>(catalog: &'a [CatalogEntry], id: &str) -> Option<&'a CatalogEntry> {
    catalog.iter().find(|e| e.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_catalog_ids_unique() {
        let catalog = default_catalog();
        let ids: HashSet<&str> = catalog.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids.len(), catalog.len());
    }

    #[test]
    fn test_find() {
        let catalog = default_catalog();
        assert_eq!(find(&catalog, "acropolis").unwrap().name, "Acropolis of Athens");
        assert!(find(&catalog, "atlantis").is_none());
    }
}
