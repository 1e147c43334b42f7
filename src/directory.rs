//! Campus and merchant directory.
//!
//! Read-mostly lookup data: campuses and the merchants on them. Populated at
//! boot (from the mirror or the seed set) and queried by the payment path to
//! validate merchant ids and by the browse endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::db::Db;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campus {
    pub id: String,
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Merchant {
    pub id: String,
    pub campus_id: String,
    pub name: String,
    pub category: String,
    pub icon: String,
    pub location: String,
    pub active: bool,
}

pub struct MerchantDirectory {
    campuses: RwLock<HashMap<String, Campus>>,
    merchants: RwLock<HashMap<String, Merchant>>,
    db: Option<Arc<Db>>,
}

impl MerchantDirectory {
    pub fn new(db: Option<Arc<Db>>) -> Self {
        Self {
            campuses: RwLock::new(HashMap::new()),
            merchants: RwLock::new(HashMap::new()),
            db,
        }
    }

    pub fn hydrate(&self, campuses: Vec<Campus>, merchants: Vec<Merchant>) {
        let mut campus_map = self.campuses.write();
        for campus in campuses {
            campus_map.insert(campus.id.clone(), campus);
        }
        let mut merchant_map = self.merchants.write();
        for merchant in merchants {
            merchant_map.insert(merchant.id.clone(), merchant);
        }
    }

    pub fn insert_campus(&self, campus: Campus) {
        if let Some(db) = &self.db {
            let _ = db.record_campus(&campus);
        }
        self.campuses.write().insert(campus.id.clone(), campus);
    }

    pub fn insert_merchant(&self, merchant: Merchant) {
        if let Some(db) = &self.db {
            let _ = db.record_merchant(&merchant);
        }
        self.merchants.write().insert(merchant.id.clone(), merchant);
    }

    pub fn campus(&self, id: &str) -> Option<Campus> {
        self.campuses.read().get(id).cloned()
    }

    pub fn campuses(&self) -> Vec<Campus> {
        let mut out: Vec<Campus> = self.campuses.read().values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn merchant(&self, id: &str) -> Option<Merchant> {
        self.merchants.read().get(id).cloned()
    }

    /// True when the id resolves to a merchant that can take payments.
    pub fn is_payable(&self, id: &str) -> bool {
        self.merchants.read().get(id).map_or(false, |m| m.active)
    }

    pub fn merchants(&self, campus_id: Option<&str>, category: Option<&str>) -> Vec<Merchant> {
        let mut out: Vec<Merchant> = self
            .merchants
            .read()
            .values()
            .filter(|m| campus_id.map_or(true, |c| m.campus_id == c))
            .filter(|m| category.map_or(true, |c| m.category == c))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Distinct categories, optionally scoped to one campus.
    pub fn categories(&self, campus_id: Option<&str>) -> Vec<String> {
        let mut out: Vec<String> = self
            .merchants
            .read()
            .values()
            .filter(|m| campus_id.map_or(true, |c| m.campus_id == c))
            .map(|m| m.category.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn merchant_count(&self) -> usize {
        self.merchants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.campuses.read().is_empty() && self.merchants.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merchant(id: &str, campus: &str, category: &str) -> Merchant {
        Merchant {
            id: id.into(),
            campus_id: campus.into(),
            name: id.to_uppercase(),
            category: category.into(),
            icon: "🍽️".into(),
            location: format!("Shop 1, {campus}"),
            active: true,
        }
    }

    fn directory_with_fixtures() -> MerchantDirectory {
        let dir = MerchantDirectory::new(None);
        dir.insert_campus(Campus {
            id: "campus-1".into(),
            name: "Tech Campus North".into(),
            location: "Sector 62, Noida".into(),
        });
        dir.insert_campus(Campus {
            id: "campus-2".into(),
            name: "Business Campus Central".into(),
            location: "Connaught Place, Delhi".into(),
        });
        dir.insert_merchant(merchant("merchant-campus-1-0", "campus-1", "beverages"));
        dir.insert_merchant(merchant("merchant-campus-1-1", "campus-1", "food"));
        dir.insert_merchant(merchant("merchant-campus-1-2", "campus-1", "food"));
        dir.insert_merchant(merchant("merchant-campus-2-0", "campus-2", "desserts"));
        dir
    }

    #[test]
    fn filters_by_campus_and_category() {
        let dir = directory_with_fixtures();

        assert_eq!(dir.merchants(None, None).len(), 4);
        assert_eq!(dir.merchants(Some("campus-1"), None).len(), 3);
        assert_eq!(dir.merchants(Some("campus-1"), Some("food")).len(), 2);
        assert_eq!(dir.merchants(Some("campus-2"), Some("food")).len(), 0);
    }

    #[test]
    fn categories_are_distinct_and_sorted() {
        let dir = directory_with_fixtures();

        assert_eq!(
            dir.categories(Some("campus-1")),
            vec!["beverages".to_string(), "food".to_string()]
        );
        assert_eq!(
            dir.categories(None),
            vec![
                "beverages".to_string(),
                "desserts".to_string(),
                "food".to_string()
            ]
        );
    }

    #[test]
    fn inactive_merchants_are_not_payable() {
        let dir = directory_with_fixtures();
        let mut closed = merchant("merchant-campus-1-9", "campus-1", "food");
        closed.active = false;
        dir.insert_merchant(closed);

        assert!(dir.is_payable("merchant-campus-1-0"));
        assert!(!dir.is_payable("merchant-campus-1-9"));
        assert!(!dir.is_payable("merchant-unknown"));
    }

    #[test]
    fn merchant_listing_is_ordered_by_id() {
        let dir = directory_with_fixtures();
        let ids: Vec<String> = dir
            .merchants(Some("campus-1"), None)
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(
            ids,
            vec![
                "merchant-campus-1-0".to_string(),
                "merchant-campus-1-1".to_string(),
                "merchant-campus-1-2".to_string(),
            ]
        );
    }
}
