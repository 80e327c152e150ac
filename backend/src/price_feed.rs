use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

/// Latest SOL/USD price shared by the pricing paths.
///
/// Unset until the first valid price arrives; readers treat that as
/// "USD-denominated fields unavailable".
#[derive(Clone, Default)]
pub struct SolPriceCache {
    inner: Arc<RwLock<Option<f64>>>,
}

impl SolPriceCache {
    pub fn new(initial: Option<f64>) -> Self {
        let cache = Self::default();
        if let Some(price) = initial {
            cache.set(price);
        }
        cache
    }

    /// Returns false and keeps the previous value when `price` is not a
    /// positive finite number.
    pub fn set(&self, price: f64) -> bool {
        if !price.is_finite() || price <= 0.0 {
            warn!(price, "ignoring invalid SOL price");
            return false;
        }
        *self.inner.write() = Some(price);
        debug!(price, "SOL price updated");
        true
    }

    pub fn get(&self) -> Option<f64> {
        *self.inner.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_last_valid_price() {
        let cache = SolPriceCache::default();
        assert_eq!(cache.get(), None);

        assert!(cache.set(150.0));
        assert!(!cache.set(-1.0));
        assert!(!cache.set(f64::NAN));
        assert_eq!(cache.get(), Some(150.0));

        let shared = cache.clone();
        shared.set(160.0);
        assert_eq!(cache.get(), Some(160.0));
    }

    #[test]
    fn initial_value_is_validated() {
        assert_eq!(SolPriceCache::new(Some(0.0)).get(), None);
        assert_eq!(SolPriceCache::new(Some(99.5)).get(), Some(99.5));
    }
}
