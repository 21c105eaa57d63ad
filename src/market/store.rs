use crate::market::types::{
    Asset, AssetFilter, AssetUpdate, DashboardState, SortDirection, SortField,
};
use parking_lot::RwLock;
use std::cmp::Ordering;
use tokio::sync::watch;
use tracing::debug;

/// Single source of truth for the dashboard: the asset collection plus the
/// active sort and filter. All mutation is synchronous; tasks observe changes
/// through the revision watch channel.
pub struct AssetStore {
    state: RwLock<DashboardState>,
    revision: watch::Sender<u64>,
}

impl AssetStore {
    pub fn new(assets: Vec<Asset>) -> Self {
        Self::from_snapshot(DashboardState::new(assets))
    }

    pub fn from_snapshot(snapshot: DashboardState) -> Self {
        let (revision, _) = watch::channel(0_u64);
        Self {
            state: RwLock::new(snapshot),
            revision,
        }
    }

    /// Merges `update` into the asset with the matching id. An unknown id is
    /// a silent no-op.
    pub fn update_one(&self, id: u32, update: AssetUpdate) {
        {
            let mut writable = self.state.write();
            let Some(asset) = writable.assets.iter_mut().find(|asset| asset.id == id) else {
                debug!(id, "ignoring update for unknown asset id");
                return;
            };

            if let Some(price) = update.price {
                asset.price = price;
            }
            if let Some(change1h) = update.change1h {
                asset.change1h = change1h;
            }
            if let Some(change24h) = update.change24h {
                asset.change24h = change24h;
            }
            if let Some(change7d) = update.change7d {
                asset.change7d = change7d;
            }
            if let Some(market_cap) = update.market_cap {
                asset.market_cap = market_cap;
            }
            if let Some(volume24h) = update.volume24h {
                asset.volume24h = volume24h;
            }
            if let Some(chart_data) = update.chart_data {
                asset.chart_data = chart_data;
            }
        }
        self.bump_revision();
    }

    /// Wholesale replacement of the asset collection.
    pub fn replace_all(&self, assets: Vec<Asset>) {
        self.state.write().assets = assets;
        self.bump_revision();
    }

    /// Selecting the current sort field flips the direction; selecting a new
    /// field resets the direction to ascending.
    pub fn set_sort(&self, field: SortField) {
        {
            let mut writable = self.state.write();
            if writable.sort_by == Some(field) {
                writable.sort_direction = writable.sort_direction.toggled();
            } else {
                writable.sort_by = Some(field);
                writable.sort_direction = SortDirection::Ascending;
            }
        }
        self.bump_revision();
    }

    pub fn set_filter(&self, filter: Option<AssetFilter>) {
        self.state.write().filter = filter;
        self.bump_revision();
    }

    /// The filtered-then-sorted projection, computed on demand. A comparison
    /// failure degrades to the filtered-but-unsorted collection.
    pub fn derived_view(&self) -> Vec<Asset> {
        let readable = self.state.read();

        let mut view: Vec<Asset> = readable
            .assets
            .iter()
            .filter(|asset| match readable.filter {
                Some(AssetFilter::Gainers) => asset.change24h > 0.0,
                Some(AssetFilter::Losers) => asset.change24h < 0.0,
                None => true,
            })
            .cloned()
            .collect();

        let Some(field) = readable.sort_by else {
            return view;
        };
        if field == SortField::ChartData {
            return view;
        }

        let direction = readable.sort_direction;
        drop(readable);

        let unsorted = view.clone();
        let mut poisoned = false;
        view.sort_by(|a, b| match compare_by_field(a, b, field) {
            Some(ordering) => match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            },
            None => {
                poisoned = true;
                Ordering::Equal
            }
        });

        if poisoned {
            debug!(?field, "sort comparison failed, returning filtered view unsorted");
            return unsorted;
        }
        view
    }

    pub fn snapshot(&self) -> DashboardState {
        self.state.read().clone()
    }

    pub fn assets(&self) -> Vec<Asset> {
        self.state.read().assets.clone()
    }

    pub fn get(&self, id: u32) -> Option<Asset> {
        self.state
            .read()
            .assets
            .iter()
            .find(|asset| asset.id == id)
            .cloned()
    }

    pub fn find_by_symbol(&self, symbol: &str) -> Option<Asset> {
        self.state
            .read()
            .assets
            .iter()
            .find(|asset| asset.symbol == symbol)
            .cloned()
    }

    /// Revision counter bumped on every mutation. The persistence writer (or
    /// any other observer) subscribes here instead of hooking the store
    /// internals.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

enum FieldValue<'a> {
    Text(&'a str),
    Number(Option<f64>),
    Series,
}

fn field_value(asset: &Asset, field: SortField) -> FieldValue<'_> {
    match field {
        SortField::Name => FieldValue::Text(&asset.name),
        SortField::Symbol => FieldValue::Text(&asset.symbol),
        SortField::Price => FieldValue::Number(Some(asset.price)),
        SortField::Change1h => FieldValue::Number(Some(asset.change1h)),
        SortField::Change24h => FieldValue::Number(Some(asset.change24h)),
        SortField::Change7d => FieldValue::Number(Some(asset.change7d)),
        SortField::MarketCap => FieldValue::Number(Some(asset.market_cap)),
        SortField::Volume24h => FieldValue::Number(Some(asset.volume24h)),
        SortField::CirculatingSupply => FieldValue::Number(Some(asset.circulating_supply)),
        SortField::MaxSupply => FieldValue::Number(asset.max_supply),
        SortField::ChartData => FieldValue::Series,
    }
}

/// Ascending base ordering: absent values sort last, strings lexically,
/// numbers numerically, series compare equal. `None` marks an
/// incomparable pair (NaN) and poisons the surrounding sort.
fn compare_by_field(a: &Asset, b: &Asset, field: SortField) -> Option<Ordering> {
    match (field_value(a, field), field_value(b, field)) {
        (FieldValue::Text(lhs), FieldValue::Text(rhs)) => Some(lhs.cmp(rhs)),
        (FieldValue::Number(lhs), FieldValue::Number(rhs)) => match (lhs, rhs) {
            (None, None) => Some(Ordering::Equal),
            (None, Some(_)) => Some(Ordering::Greater),
            (Some(_), None) => Some(Ordering::Less),
            (Some(lhs), Some(rhs)) => lhs.partial_cmp(&rhs),
        },
        _ => Some(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::seed_assets;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn store_with_seed() -> AssetStore {
        let mut rng = StdRng::seed_from_u64(11);
        AssetStore::new(seed_assets(&mut rng))
    }

    #[test]
    fn update_one_merges_only_named_fields() {
        let store = store_with_seed();
        let before = store.get(1).expect("seed asset 1 must exist");

        store.update_one(
            1,
            AssetUpdate {
                price: Some(70_000.0),
                ..Default::default()
            },
        );

        let after = store.get(1).expect("seed asset 1 must exist");
        assert_eq!(after.price, 70_000.0);
        assert_eq!(after.change1h, before.change1h);
        assert_eq!(after.change24h, before.change24h);
        assert_eq!(after.volume24h, before.volume24h);
        assert_eq!(after.chart_data, before.chart_data);
    }

    #[test]
    fn update_one_unknown_id_is_a_noop() {
        let store = store_with_seed();
        let before = store.snapshot();

        store.update_one(
            999,
            AssetUpdate {
                price: Some(1.0),
                ..Default::default()
            },
        );

        assert_eq!(store.snapshot().assets, before.assets);
    }

    #[test]
    fn set_sort_toggles_direction_on_repeat() {
        let store = store_with_seed();

        store.set_sort(SortField::Price);
        assert_eq!(store.snapshot().sort_direction, SortDirection::Ascending);

        store.set_sort(SortField::Price);
        assert_eq!(store.snapshot().sort_direction, SortDirection::Descending);

        store.set_sort(SortField::Price);
        assert_eq!(store.snapshot().sort_direction, SortDirection::Ascending);
    }

    #[test]
    fn set_sort_new_field_resets_to_ascending() {
        let store = store_with_seed();

        store.set_sort(SortField::Price);
        store.set_sort(SortField::Price);
        assert_eq!(store.snapshot().sort_direction, SortDirection::Descending);

        store.set_sort(SortField::Name);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.sort_by, Some(SortField::Name));
        assert_eq!(snapshot.sort_direction, SortDirection::Ascending);
    }

    #[test]
    fn gainers_filter_selects_positive_change24h() {
        let store = store_with_seed();
        store.set_filter(Some(AssetFilter::Gainers));

        let view = store.derived_view();
        assert!(!view.is_empty());
        assert!(view.iter().all(|asset| asset.change24h > 0.0));

        // Insertion order preserved when no sort is set.
        let ids: Vec<u32> = view.iter().map(|asset| asset.id).collect();
        let mut sorted_ids = ids.clone();
        sorted_ids.sort_unstable();
        assert_eq!(ids, sorted_ids);
    }

    #[test]
    fn losers_filter_selects_negative_change24h() {
        let store = store_with_seed();
        store.set_filter(Some(AssetFilter::Losers));

        let view = store.derived_view();
        assert!(!view.is_empty());
        assert!(view.iter().all(|asset| asset.change24h < 0.0));
    }

    #[test]
    fn clearing_filter_restores_full_view() {
        let store = store_with_seed();
        store.set_filter(Some(AssetFilter::Gainers));
        store.set_filter(None);
        assert_eq!(store.derived_view().len(), 5);
    }

    #[test]
    fn numeric_sort_descending_reverses_ascending() {
        let store = store_with_seed();

        store.set_sort(SortField::Price);
        let ascending: Vec<u32> = store.derived_view().iter().map(|a| a.id).collect();

        store.set_sort(SortField::Price);
        let mut descending: Vec<u32> = store.derived_view().iter().map(|a| a.id).collect();
        descending.reverse();

        assert_eq!(ascending, descending);
        let prices: Vec<f64> = {
            store.set_sort(SortField::Price);
            store.derived_view().iter().map(|a| a.price).collect()
        };
        assert!(prices.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn string_sort_is_lexical() {
        let store = store_with_seed();
        store.set_sort(SortField::Symbol);

        let symbols: Vec<String> = store
            .derived_view()
            .iter()
            .map(|asset| asset.symbol.clone())
            .collect();
        let mut expected = symbols.clone();
        expected.sort();
        assert_eq!(symbols, expected);
    }

    #[test]
    fn absent_values_sort_last_ascending_first_descending() {
        let store = store_with_seed();

        store.set_sort(SortField::MaxSupply);
        let ascending = store.derived_view();
        assert!(ascending[0].max_supply.is_some());
        assert!(ascending[4].max_supply.is_none());

        store.set_sort(SortField::MaxSupply);
        let descending = store.derived_view();
        assert!(descending[0].max_supply.is_none());
        assert!(descending[4].max_supply.is_some());
    }

    #[test]
    fn chart_field_sort_is_a_noop() {
        let store = store_with_seed();
        let unsorted: Vec<u32> = store.derived_view().iter().map(|a| a.id).collect();

        store.set_sort(SortField::ChartData);
        let after: Vec<u32> = store.derived_view().iter().map(|a| a.id).collect();
        assert_eq!(unsorted, after);
    }

    #[test]
    fn nan_comparison_degrades_to_filtered_unsorted() {
        let store = store_with_seed();
        store.update_one(
            3,
            AssetUpdate {
                price: Some(f64::NAN),
                ..Default::default()
            },
        );

        store.set_sort(SortField::Price);
        let view = store.derived_view();

        // Insertion order comes back untouched instead of a corrupted sort.
        let ids: Vec<u32> = view.iter().map(|asset| asset.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn filter_then_sort_composes() {
        let store = store_with_seed();
        store.set_filter(Some(AssetFilter::Gainers));
        store.set_sort(SortField::Change24h);

        let view = store.derived_view();
        assert!(view.iter().all(|asset| asset.change24h > 0.0));
        let changes: Vec<f64> = view.iter().map(|asset| asset.change24h).collect();
        assert!(changes.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn replace_all_swaps_collection() {
        let store = store_with_seed();
        let mut rng = StdRng::seed_from_u64(2);
        let mut replacement = seed_assets(&mut rng);
        replacement.truncate(2);

        store.replace_all(replacement.clone());
        assert_eq!(store.assets(), replacement);
    }

    #[test]
    fn mutations_bump_the_revision_counter() {
        let store = store_with_seed();
        let receiver = store.subscribe_changes();
        let start = *receiver.borrow();

        store.set_filter(Some(AssetFilter::Gainers));
        store.set_sort(SortField::Price);
        store.update_one(
            1,
            AssetUpdate {
                price: Some(1.0),
                ..Default::default()
            },
        );

        assert_eq!(*receiver.borrow(), start + 3);
    }
}
