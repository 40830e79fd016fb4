//! Content digests of record sets, used in render cache keys.

use rental_map_models::PropertyRecord;
use sha2::{Digest, Sha256};

/// SHA-256 over every field of every record, independent of input order.
/// Cluster members carry whole records, so any change that could show up in
/// cached output (title, bedrooms, listing type, ...) yields a new digest.
#[must_use]
pub fn record_set_digest<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = &'a PropertyRecord>,
{
    let mut sorted: Vec<&PropertyRecord> = records.into_iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut hasher = Sha256::new();
    for record in sorted {
        update_str(&mut hasher, &record.id);
        update_opt_str(&mut hasher, record.title.as_deref());
        update_str(&mut hasher, &record.address);
        update_opt_str(&mut hasher, record.city.as_deref());
        update_opt_str(&mut hasher, record.state.as_deref());
        match record.coordinates {
            Some(c) => {
                hasher.update([1u8]);
                hasher.update(c.lng.to_bits().to_le_bytes());
                hasher.update(c.lat.to_bits().to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(record.price.to_bits().to_le_bytes());
        update_str(&mut hasher, &record.property_type);
        hasher.update(record.bedrooms.to_le_bytes());
        update_str(&mut hasher, record.listing_type.as_ref());
        match record.updated_at {
            Some(at) => {
                hasher.update([1u8]);
                hasher.update(at.timestamp_millis().to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
    }
    hex::encode(hasher.finalize())
}

// Length-prefixed so adjacent fields can't run into each other.
fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn update_opt_str(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1u8]);
            update_str(hasher, v);
        }
        None => hasher.update([0u8]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rental_map_models::{GeoPoint, ListingType};

    fn record(id: &str, lng: f64, price: f64) -> PropertyRecord {
        PropertyRecord {
            id: id.to_string(),
            title: None,
            address: String::new(),
            city: None,
            state: None,
            coordinates: Some(GeoPoint::new(lng, 6.5)),
            price,
            property_type: "apartment".to_string(),
            bedrooms: 2,
            listing_type: ListingType::Rent,
            updated_at: None,
        }
    }

    #[test]
    fn order_independent() {
        let a = record("a", 3.1, 100.0);
        let b = record("b", 3.2, 200.0);
        assert_eq!(record_set_digest([&a, &b]), record_set_digest([&b, &a]));
    }

    #[test]
    fn same_size_different_members_differ() {
        let a = record("a", 3.1, 100.0);
        let b = record("b", 3.2, 200.0);
        let c = record("c", 3.2, 200.0);
        assert_ne!(record_set_digest([&a, &b]), record_set_digest([&a, &c]));
    }

    #[test]
    fn moved_or_repriced_record_differs() {
        let a = record("a", 3.1, 100.0);
        let moved = record("a", 3.15, 100.0);
        let repriced = record("a", 3.1, 150.0);
        let base = record_set_digest([&a]);
        assert_ne!(base, record_set_digest([&moved]));
        assert_ne!(base, record_set_digest([&repriced]));
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn descriptive_field_changes_differ() {
        let a = record("a", 3.1, 100.0);
        let base = record_set_digest([&a]);

        let mut retitled = a.clone();
        retitled.title = Some("New title".to_string());
        let mut bigger = a.clone();
        bigger.bedrooms = 4;
        let mut duplex = a.clone();
        duplex.property_type = "duplex".to_string();
        let mut for_sale = a.clone();
        for_sale.listing_type = ListingType::Sale;

        for changed in [&retitled, &bigger, &duplex, &for_sale] {
            assert_ne!(base, record_set_digest([changed]));
        }
        assert_eq!(base, record_set_digest([&a.clone()]));
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let mut left = record("a", 3.1, 100.0);
        left.city = Some("ab".to_string());
        left.state = Some("c".to_string());
        let mut right = left.clone();
        right.city = Some("a".to_string());
        right.state = Some("bc".to_string());
        assert_ne!(record_set_digest([&left]), record_set_digest([&right]));
    }
}
