use anyhow::Result;

use crate::db::{self, Pool};
use crate::model::City;
use crate::settings::GeoScope;
use crate::text::match_key;

/// Ascending by accent-folded name, ties by raw name then id.
pub fn sort_alphabetically(cities: &mut [City]) {
    cities.sort_by_cached_key(|c| (match_key(&c.name), c.name.clone(), c.id));
}

/// Cities targeted by `scope`, in processing order.
///
/// A state is matched against the known state names ignoring case and
/// accents; an unknown state resolves to no cities.
pub async fn resolve_cities(pool: &Pool, scope: &GeoScope) -> Result<Vec<City>> {
    let mut cities = match scope {
        GeoScope::State(wanted) => {
            let wanted = match_key(wanted);
            let states = db::distinct_states(pool).await?;
            match states.iter().find(|s| match_key(s) == wanted) {
                Some(state) => db::cities_in_state(pool, state).await?,
                None => Vec::new(),
            }
        }
        GeoScope::CityIds(ids) => db::cities_by_ids(pool, ids).await?,
    };
    sort_alphabetically(&mut cities);
    Ok(cities)
}
