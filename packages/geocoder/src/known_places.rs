//! Static place tables used when the provider can't help.
//!
//! [`KNOWN_CITIES`] backs the last resolution tier; [`KNOWN_LOCATIONS`]
//! backs autocomplete when the provider is unreachable. Coordinates are
//! approximate city/district centers.

use std::sync::LazyLock;

use regex::Regex;
use rental_map_models::GeoPoint;

/// A named place with approximate coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnownPlace {
    /// Lower-case name used for matching.
    pub key: &'static str,
    /// Display name.
    pub name: &'static str,
    /// State the place belongs to.
    pub state: &'static str,
    /// Approximate center.
    pub center: GeoPoint,
}

const fn place(
    key: &'static str,
    name: &'static str,
    state: &'static str,
    lng: f64,
    lat: f64,
) -> KnownPlace {
    KnownPlace {
        key,
        name,
        state,
        center: GeoPoint::new(lng, lat),
    }
}

/// Major cities, checked in order. Longer names come before names they
/// contain so `"port harcourt"` wins over any shorter overlap.
pub const KNOWN_CITIES: &[KnownPlace] = &[
    place("port harcourt", "Port Harcourt", "Rivers", 7.0134, 4.8156),
    place("benin city", "Benin City", "Edo", 5.6037, 6.3350),
    place("lagos", "Lagos", "Lagos", 3.3792, 6.5244),
    place("abuja", "Abuja", "FCT", 7.3986, 9.0765),
    place("ibadan", "Ibadan", "Oyo", 3.9470, 7.3775),
    place("kano", "Kano", "Kano", 8.5167, 12.0000),
    place("kaduna", "Kaduna", "Kaduna", 7.4383, 10.5105),
    place("enugu", "Enugu", "Enugu", 7.5083, 6.4584),
    place("jos", "Jos", "Plateau", 8.8583, 9.8965),
    place("ilorin", "Ilorin", "Kwara", 4.5418, 8.4966),
    place("abeokuta", "Abeokuta", "Ogun", 3.3458, 7.1475),
    place("owerri", "Owerri", "Imo", 7.0352, 5.4836),
    place("calabar", "Calabar", "Cross River", 8.3417, 4.9757),
    place("uyo", "Uyo", "Akwa Ibom", 7.9128, 5.0377),
    place("warri", "Warri", "Delta", 5.7500, 5.5167),
];

/// City used when nothing at all can be resolved.
pub const DEFAULT_CITY: KnownPlace = KNOWN_CITIES[2];

/// Popular districts offered by autocomplete when the provider is down.
pub const KNOWN_LOCATIONS: &[KnownPlace] = &[
    place("victoria island", "Victoria Island", "Lagos", 3.4219, 6.4281),
    place("ikoyi", "Ikoyi", "Lagos", 3.4346, 6.4549),
    place("lekki", "Lekki", "Lagos", 3.4746, 6.4474),
    place("ikeja", "Ikeja", "Lagos", 3.3515, 6.6018),
    place("surulere", "Surulere", "Lagos", 3.3569, 6.4969),
    place("yaba", "Yaba", "Lagos", 3.3750, 6.5095),
    place("ajah", "Ajah", "Lagos", 3.5852, 6.4698),
    place("maitama", "Maitama", "FCT", 7.4951, 9.0882),
    place("wuse", "Wuse", "FCT", 7.4699, 9.0579),
    place("garki", "Garki", "FCT", 7.4898, 9.0359),
    place("gwarinpa", "Gwarinpa", "FCT", 7.4083, 9.1099),
    place("gra port harcourt", "GRA Port Harcourt", "Rivers", 7.0085, 4.8242),
];

/// One whole-word pattern per entry of [`KNOWN_CITIES`], same order.
static CITY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    KNOWN_CITIES
        .iter()
        .map(|c| {
            let name = regex::escape(c.key).replace(' ', r"\s+");
            Regex::new(&format!(r"\b{name}\b")).expect("valid regex")
        })
        .collect()
});

/// First known city named in `address` as a whole word (case-insensitive).
#[must_use]
pub fn match_city(address: &str) -> Option<&'static KnownPlace> {
    let lower = address.to_lowercase();
    KNOWN_CITIES
        .iter()
        .zip(CITY_PATTERNS.iter())
        .find(|(_, re)| re.is_match(&lower))
        .map(|(city, _)| city)
}

/// Known locations whose name contains `query` or is contained by it.
#[must_use]
pub fn search_locations(query: &str, limit: usize) -> Vec<&'static KnownPlace> {
    let lower = query.trim().to_lowercase();
    if lower.is_empty() {
        return Vec::new();
    }
    KNOWN_LOCATIONS
        .iter()
        .chain(KNOWN_CITIES.iter())
        .filter(|p| p.key.contains(&lower) || lower.contains(p.key))
        .take(limit)
        .collect()
}
