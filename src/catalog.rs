//! Product catalog — the keyword -> price mapping matched against mail text.
//!
//! The catalog lives in a JSON file (`{"Tacho 20L": 50, "Modelo X": "120.50"}`)
//! and is re-read for every matching pass so edits take effect without a
//! restart. Two keys that normalize identically are allowed but flagged:
//! lookups resolve to the later key in iteration order, so it is undefined
//! which price is shown for the shared normalized form.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use tracing::warn;

use crate::error::CatalogError;
use crate::matcher::normalize::normalize;

/// Immutable keyword -> price mapping.
///
/// Keys keep their original casing; iteration order is lexicographic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    entries: BTreeMap<String, Decimal>,
}

impl Catalog {
    /// Build a catalog, dropping unusable keys and flagging collisions.
    ///
    /// A key whose normalized form is empty can never be matched (and an
    /// empty needle would substring-match everything), so it is dropped
    /// with a warning. Keys that normalize identically are kept; the
    /// collision is warned about once per pair.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, Decimal)>,
    {
        let mut entries = BTreeMap::new();
        let mut normalized_seen: BTreeMap<String, String> = BTreeMap::new();

        for (key, price) in pairs {
            let norm = normalize(&key);
            if norm.is_empty() {
                warn!(key = %key, "Dropping catalog key that normalizes to nothing");
                continue;
            }
            if let Some(prior) = normalized_seen.get(&norm) {
                warn!(
                    first = %prior,
                    second = %key,
                    normalized = %norm,
                    "Catalog keys collide after normalization; the later key wins lookups"
                );
            }
            normalized_seen.insert(norm, key.clone());
            entries.insert(key, price);
        }

        Self { entries }
    }

    /// An empty catalog. Matching against it always yields no match.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the catalog from a JSON object file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: BTreeMap<String, Decimal> = serde_json::from_str(&raw)?;
        Ok(Self::from_pairs(parsed))
    }

    /// Price for an original-cased key.
    pub fn price_of(&self, key: &str) -> Option<&Decimal> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Decimal)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Supplies the catalog at matching time.
///
/// The matcher never caches a catalog; the observer asks the source for a
/// fresh copy per item so the mapping can change between messages.
pub trait CatalogSource: Send + Sync {
    fn load(&self) -> Result<Catalog, CatalogError>;
}

/// Re-reads a JSON catalog file on every load.
pub struct FileCatalogSource {
    path: PathBuf,
}

impl FileCatalogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CatalogSource for FileCatalogSource {
    fn load(&self) -> Result<Catalog, CatalogError> {
        Catalog::load(&self.path)
    }
}

/// A fixed in-memory catalog, for tests and embedding.
pub struct StaticCatalogSource {
    catalog: Catalog,
}

impl StaticCatalogSource {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }
}

impl CatalogSource for StaticCatalogSource {
    fn load(&self) -> Result<Catalog, CatalogError> {
        Ok(self.catalog.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn from_pairs_keeps_original_casing() {
        let cat = Catalog::from_pairs([("Tacho 20L".to_string(), dec!(50))]);
        assert_eq!(cat.price_of("Tacho 20L"), Some(&dec!(50)));
        assert_eq!(cat.price_of("tacho 20l"), None);
    }

    #[test]
    fn drops_keys_that_normalize_to_nothing() {
        let cat = Catalog::from_pairs([
            ("!!!".to_string(), dec!(1)),
            ("precio".to_string(), dec!(2)),
        ]);
        assert_eq!(cat.len(), 1);
        assert_eq!(cat.price_of("precio"), Some(&dec!(2)));
    }

    #[test]
    fn colliding_keys_are_both_kept() {
        let cat = Catalog::from_pairs([
            ("Modelo".to_string(), dec!(1)),
            ("modélo".to_string(), dec!(2)),
        ]);
        assert_eq!(cat.len(), 2);
    }

    #[test]
    fn loads_numeric_and_string_prices() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"Tacho 20L": 50, "Modelo X": "120.50"}}"#).unwrap();

        let cat = Catalog::load(file.path()).unwrap();
        assert_eq!(cat.price_of("Tacho 20L"), Some(&dec!(50)));
        assert_eq!(cat.price_of("Modelo X"), Some(&dec!(120.50)));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = Catalog::load(Path::new("/nonexistent/catalog.json")).unwrap_err();
        assert!(matches!(err, CatalogError::Io(_)));
    }

    #[test]
    fn load_malformed_json_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = Catalog::load(file.path()).unwrap_err();
        assert!(matches!(err, CatalogError::Parse(_)));
    }

    #[test]
    fn file_source_reflects_edits_between_loads() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"precio": 10}}"#).unwrap();
        file.flush().unwrap();

        let source = FileCatalogSource::new(file.path());
        assert_eq!(source.load().unwrap().len(), 1);

        let mut handle = std::fs::File::create(file.path()).unwrap();
        write!(handle, r#"{{"precio": 10, "modelo": 20}}"#).unwrap();
        assert_eq!(source.load().unwrap().len(), 2);
    }
}
