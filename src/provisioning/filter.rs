//! Scan admission filter.
//!
//! Filters are hex-string prefixes compared case-insensitively against
//! a candidate's UUID or MAC. Empty filter lists admit nothing — a
//! gateway scanning with no filters provisions no one, by design.

use crate::node::Node;

#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    uuid_filters: Vec<String>,
    mac_filters: Vec<String>,
}

impl ScanFilter {
    pub fn new(uuid_filters: Vec<String>, mac_filters: Vec<String>) -> Self {
        Self {
            uuid_filters,
            mac_filters,
        }
    }

    /// A node passes if any prefix matches its UUID or MAC.
    pub fn check(&self, node: &Node) -> bool {
        let uuid = hex::encode(node.uuid());
        let mac = hex::encode(node.mac());

        self.uuid_filters
            .iter()
            .any(|f| prefix_matches(f, &uuid))
            || self.mac_filters.iter().any(|f| prefix_matches(f, &mac))
    }
}

fn prefix_matches(filter: &str, value_hex: &str) -> bool {
    value_hex
        .get(..filter.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        let uuid: [u8; 16] = hex::decode("DA510001FFFFFFFF9B1979D4D43D6268")
            .unwrap()
            .try_into()
            .unwrap();
        let mac: [u8; 6] = hex::decode("AABBCCDDEEFF").unwrap().try_into().unwrap();
        Node::new(mac, uuid)
    }

    #[test]
    fn uuid_prefix_matches_case_insensitively() {
        let filter = ScanFilter::new(vec!["da510001".into()], vec![]);
        assert!(filter.check(&node()));
        let filter = ScanFilter::new(vec!["DA510001FFFFFFFF".into()], vec![]);
        assert!(filter.check(&node()));
    }

    #[test]
    fn mac_prefix_matches() {
        let filter = ScanFilter::new(vec![], vec!["aabbcc".into()]);
        assert!(filter.check(&node()));
    }

    #[test]
    fn wrong_prefix_is_rejected() {
        let filter = ScanFilter::new(vec!["DA520001".into()], vec!["001122".into()]);
        assert!(!filter.check(&node()));
    }

    #[test]
    fn empty_filters_admit_nothing() {
        let filter = ScanFilter::default();
        assert!(!filter.check(&node()));
    }

    #[test]
    fn overlong_filter_cannot_match() {
        let filter = ScanFilter::new(vec![], vec!["AABBCCDDEEFF00".into()]);
        assert!(!filter.check(&node()));
    }
}
