// Bus and side filters, read once from a page-style query string
use crate::board_config::StopConfig;
use crate::board_models::ServiceNumber;
use log::warn;
use reqwest::Url;
use std::collections::BTreeSet;

const QUERY_BASE: &str = "http://localhost/";

/// Query key names accepted for each filter, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterKeys {
    pub bus_keys: Vec<String>,
    pub side_keys: Vec<String>,
}

impl Default for FilterKeys {
    fn default() -> Self {
        FilterKeys {
            bus_keys: ["buses", "bus", "services", "b"].map(String::from).to_vec(),
            side_keys: ["side", "sides"].map(String::from).to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// `None` shows every service.
    pub bus_allow_list: Option<BTreeSet<ServiceNumber>>,
    /// Stop ids whose cells are shown. Never empty.
    pub side_allow_list: BTreeSet<String>,
}

impl Filter {
    pub fn show_all(stops: &[StopConfig]) -> Self {
        Filter {
            bus_allow_list: None,
            side_allow_list: stops.iter().map(|s| s.id.clone()).collect(),
        }
    }

    pub fn from_pairs(pairs: &[(String, String)], stops: &[StopConfig], keys: &FilterKeys) -> Self {
        let find = |names: &[String]| {
            names.iter().find_map(|name| {
                pairs
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.as_str())
            })
        };

        let bus_allow_list = find(&keys.bus_keys).and_then(Self::parse_buses);
        let side_allow_list = find(&keys.side_keys)
            .map(|value| Self::parse_sides(value, stops))
            .filter(|sides| !sides.is_empty())
            .unwrap_or_else(|| Self::show_all(stops).side_allow_list);

        Filter {
            bus_allow_list,
            side_allow_list,
        }
    }

    /// Decode the key/value pairs of a query string. Accepts "?a=b", "a=b",
    /// "/path?a=b" or a full URL. Unparseable input yields no pairs.
    pub fn query_pairs(query: &str) -> Vec<(String, String)> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        let parsed = if query.contains("://") {
            Url::parse(query)
        } else if query.starts_with('?') || query.starts_with('/') {
            Url::parse(QUERY_BASE).and_then(|base| base.join(query))
        } else {
            Url::parse(QUERY_BASE).and_then(|base| base.join(&format!("?{}", query)))
        };

        match parsed {
            Ok(url) => url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
            Err(e) => {
                warn!("Ignoring unreadable query '{}' ({})", query, e);
                Vec::new()
            }
        }
    }

    // An empty list means "show all"
    fn parse_buses(value: &str) -> Option<BTreeSet<ServiceNumber>> {
        let buses: BTreeSet<ServiceNumber> = value
            .split(',')
            .map(ServiceNumber::new)
            .filter(|s| !s.is_empty())
            .collect();

        if buses.is_empty() { None } else { Some(buses) }
    }

    fn parse_sides(value: &str, stops: &[StopConfig]) -> BTreeSet<String> {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| {
                let stop = stops
                    .iter()
                    .find(|s| s.id == entry || s.label.eq_ignore_ascii_case(entry));
                if stop.is_none() {
                    warn!("Dropping unknown side '{}'", entry);
                }
                stop.map(|s| s.id.clone())
            })
            .collect()
    }

    pub fn allows_service(&self, service: &ServiceNumber) -> bool {
        self.bus_allow_list
            .as_ref()
            .map(|buses| buses.contains(service))
            .unwrap_or(true)
    }

    pub fn shows_stop(&self, stop_id: &str) -> bool {
        self.side_allow_list.contains(stop_id)
    }

    /// Link reproducing the current selection: the available services that
    /// pass the filter, and the shown sides in configured order.
    pub fn share_link(
        &self,
        path: &str,
        available: &[ServiceNumber],
        stops: &[StopConfig],
    ) -> String {
        let selected: BTreeSet<&ServiceNumber> = available
            .iter()
            .filter(|s| self.allows_service(s))
            .collect();
        let buses: Vec<&str> = selected.iter().map(|s| s.as_str()).collect();

        let sides: Vec<&str> = stops
            .iter()
            .filter(|s| self.shows_stop(&s.id))
            .map(|s| s.id.as_str())
            .collect();

        format!("{}?buses={}&side={}", path, buses.join(","), sides.join(","))
    }
}

#[cfg(test)]
impl Filter {
    pub fn from_query(query: &str, stops: &[StopConfig], keys: &FilterKeys) -> Self {
        Self::from_pairs(&Self::query_pairs(query), stops, keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stops() -> Vec<StopConfig> {
        vec![
            StopConfig {
                label: "college".to_string(),
                id: "51099".to_string(),
            },
            StopConfig {
                label: "opposite".to_string(),
                id: "51091".to_string(),
            },
        ]
    }

    fn services(names: &[&str]) -> Vec<ServiceNumber> {
        names.iter().map(|s| ServiceNumber::new(s)).collect()
    }

    #[test]
    fn no_query_shows_everything() {
        let filter = Filter::from_query("", &stops(), &FilterKeys::default());
        assert_eq!(filter, Filter::show_all(&stops()));
        assert!(filter.allows_service(&ServiceNumber::new("151")));
        assert!(filter.shows_stop("51099"));
        assert!(filter.shows_stop("51091"));
    }

    #[test]
    fn bus_list_is_uppercased_and_trimmed() {
        let filter = Filter::from_query("?buses=151a, 154 ,,", &stops(), &FilterKeys::default());
        let buses = filter.bus_allow_list.clone().unwrap();

        assert_eq!(buses.len(), 2);
        assert!(filter.allows_service(&ServiceNumber::new("151A")));
        assert!(filter.allows_service(&ServiceNumber::new("154")));
        assert!(!filter.allows_service(&ServiceNumber::new("52")));
    }

    #[test]
    fn empty_bus_list_means_show_all() {
        let filter = Filter::from_query("buses=&side=college", &stops(), &FilterKeys::default());
        assert_eq!(filter.bus_allow_list, None);

        let filter = Filter::from_query("buses=,,", &stops(), &FilterKeys::default());
        assert_eq!(filter.bus_allow_list, None);
    }

    #[test]
    fn bus_keys_are_tried_in_configured_order() {
        let filter = Filter::from_query("?b=52&bus=151", &stops(), &FilterKeys::default());
        let buses = filter.bus_allow_list.unwrap();

        assert!(buses.contains(&ServiceNumber::new("151")));
        assert!(!buses.contains(&ServiceNumber::new("52")));
    }

    #[test]
    fn custom_key_names_are_honoured() {
        let keys = FilterKeys {
            bus_keys: vec!["routes".to_string()],
            side_keys: vec!["stop".to_string()],
        };
        let filter = Filter::from_query("routes=154&stop=51091&buses=151", &stops(), &keys);

        assert_eq!(
            filter.bus_allow_list,
            Some(services(&["154"]).into_iter().collect::<BTreeSet<_>>())
        );
        assert!(!filter.shows_stop("51099"));
        assert!(filter.shows_stop("51091"));
    }

    #[test]
    fn sides_accept_labels_and_ids() {
        let filter = Filter::from_query("side=COLLEGE,51091", &stops(), &FilterKeys::default());
        assert!(filter.shows_stop("51099"));
        assert!(filter.shows_stop("51091"));

        let filter = Filter::from_query("sides=opposite", &stops(), &FilterKeys::default());
        assert!(!filter.shows_stop("51099"));
        assert!(filter.shows_stop("51091"));
    }

    #[test]
    fn unknown_sides_fall_back_to_all() {
        let filter = Filter::from_query("side=north,12345", &stops(), &FilterKeys::default());
        assert_eq!(filter.side_allow_list.len(), 2);

        let filter = Filter::from_query("side=north,college", &stops(), &FilterKeys::default());
        assert_eq!(filter.side_allow_list.len(), 1);
        assert!(filter.shows_stop("51099"));
    }

    #[test]
    fn query_pairs_accepts_several_shapes() {
        let expected = vec![("buses".to_string(), "151,154".to_string())];

        assert_eq!(Filter::query_pairs("?buses=151,154"), expected);
        assert_eq!(Filter::query_pairs("buses=151,154"), expected);
        assert_eq!(Filter::query_pairs("/board?buses=151%2C154"), expected);
        assert_eq!(
            Filter::query_pairs("https://example.org/board.html?buses=151,154"),
            expected
        );
        assert!(Filter::query_pairs("   ").is_empty());
    }

    #[test]
    fn share_link_reflects_selection() {
        let filter =
            Filter::from_query("buses=154,151&side=opposite", &stops(), &FilterKeys::default());
        let available = services(&["52", "154", "151"]);

        assert_eq!(
            filter.share_link("/board", &available, &stops()),
            "/board?buses=151,154&side=51091"
        );
    }

    #[test]
    fn share_link_without_filter_lists_everything() {
        let filter = Filter::show_all(&stops());
        let available = services(&["151", "52"]);

        assert_eq!(
            filter.share_link("/", &available, &stops()),
            "/?buses=52,151&side=51099,51091"
        );
    }

    #[test]
    fn share_link_round_trips() {
        let filter = Filter::from_query("buses=151&side=college", &stops(), &FilterKeys::default());
        let link = filter.share_link("/", &services(&["151", "154"]), &stops());

        assert_eq!(Filter::from_query(&link, &stops(), &FilterKeys::default()), filter);
    }
}
