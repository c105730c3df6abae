use serde::{Deserialize, Serialize};

// Catalog payload served by the upstream catalog service
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub conferences: Vec<Conference>,
    pub total: usize,
    #[serde(default)]
    pub generated_at: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conference {
    pub id: String,
    pub name: String,
    pub url: String,
    pub start_date: String,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub continent: Option<String>,
    pub domain: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub cfp: Option<CallForPapers>,
    #[serde(default)]
    pub financial_aid: Option<FinancialAid>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallForPapers {
    pub url: Option<String>,
    pub end_date: Option<String>,
    pub days_remaining: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FinancialAid {
    pub available: bool,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// A catalog request as seen by the gateway.
///
/// Only the canonical view (no filters, no search, first page, anonymous) is
/// cacheable. Parameters the gateway does not recognise are kept in `extra`
/// and also make the request non-canonical, so nothing unknown can end up
/// under the shared cache key.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CatalogQuery {
    pub search: Option<String>,
    pub domain: Option<String>,
    pub continent: Option<String>,
    pub country: Option<String>,
    pub cfp_open: Option<bool>,
    pub online: Option<bool>,
    pub page: Option<u32>,
    pub extra: Vec<(String, String)>,
    pub authenticated: bool,
}

impl CatalogQuery {
    // every occurrence counts: a repeated filter is forwarded, never collapsed
    pub fn from_params(params: &[(String, String)], authenticated: bool) -> Self {
        let mut query = CatalogQuery {
            authenticated,
            ..Default::default()
        };

        for (name, value) in params {
            let accepted = match name.as_str() {
                "search" | "q" => set_once(&mut query.search, non_empty(value)),
                "domain" => set_once(&mut query.domain, non_empty(value)),
                "continent" => set_once(&mut query.continent, non_empty(value)),
                "country" => set_once(&mut query.country, non_empty(value)),
                "cfpOpen" => parse_into(&mut query.cfp_open, value),
                "online" => parse_into(&mut query.online, value),
                "page" => parse_into(&mut query.page, value),
                _ => false,
            };
            // unknown, unparseable or repeated values are forwarded untouched
            if !accepted {
                query.extra.push((name.clone(), value.clone()));
            }
        }
        query.extra.sort();
        query
    }

    pub fn is_canonical(&self) -> bool {
        !self.authenticated
            && self.search.is_none()
            && self.domain.is_none()
            && self.continent.is_none()
            && self.country.is_none()
            && self.cfp_open.is_none()
            && self.online.is_none()
            && self.page.is_none_or(|page| page == 1)
            && self.extra.is_empty()
    }

    // Query pairs forwarded to the upstream catalog service
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(search) = &self.search {
            pairs.push(("search".to_string(), search.clone()));
        }
        if let Some(domain) = &self.domain {
            pairs.push(("domain".to_string(), domain.clone()));
        }
        if let Some(continent) = &self.continent {
            pairs.push(("continent".to_string(), continent.clone()));
        }
        if let Some(country) = &self.country {
            pairs.push(("country".to_string(), country.clone()));
        }
        if let Some(cfp_open) = self.cfp_open {
            pairs.push(("cfpOpen".to_string(), cfp_open.to_string()));
        }
        if let Some(online) = self.online {
            pairs.push(("online".to_string(), online.to_string()));
        }
        if let Some(page) = self.page {
            pairs.push(("page".to_string(), page.to_string()));
        }
        pairs.extend(self.extra.iter().cloned());
        pairs
    }
}

// false when the slot is already taken
fn set_once<T>(slot: &mut Option<T>, value: Option<T>) -> bool {
    match (slot.is_some(), value) {
        (_, None) => true,
        (true, Some(_)) => false,
        (false, value) => {
            *slot = value;
            true
        }
    }
}

fn parse_into<T: std::str::FromStr>(slot: &mut Option<T>, value: &str) -> bool {
    match value.trim().parse() {
        Ok(parsed) => set_once(slot, Some(parsed)),
        Err(_) => false,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn bare_and_first_page_requests_are_canonical() {
        assert!(CatalogQuery::from_params(&params(&[]), false).is_canonical());
        assert!(CatalogQuery::from_params(&params(&[("page", "1")]), false).is_canonical());
        // blank search boxes submit an empty value
        assert!(CatalogQuery::from_params(&params(&[("search", "  ")]), false).is_canonical());
    }

    #[test]
    fn filters_search_paging_and_auth_are_not_canonical() {
        let cases = [
            params(&[("search", "rust")]),
            params(&[("domain", "ai")]),
            params(&[("continent", "Europe")]),
            params(&[("cfpOpen", "true")]),
            params(&[("page", "2")]),
            params(&[("page", "two")]),
            params(&[("utm_source", "newsletter")]),
            params(&[("online", "yes")]),
            params(&[("cfpOpen", "1")]),
            params(&[("page", "0")]),
            params(&[("domain", "ai"), ("domain", "")]),
            params(&[("domain", ""), ("domain", "ai")]),
            params(&[("page", "1"), ("page", "3")]),
        ];
        for case in &cases {
            assert!(
                !CatalogQuery::from_params(case, false).is_canonical(),
                "{case:?} should bypass the cache"
            );
        }
        assert!(!CatalogQuery::from_params(&params(&[]), true).is_canonical());
    }

    #[test]
    fn repeated_and_unparseable_values_are_forwarded() {
        let query = CatalogQuery::from_params(
            &params(&[("domain", "ai"), ("domain", "web"), ("online", "yes")]),
            false,
        );
        assert_eq!(query.domain.as_deref(), Some("ai"));
        assert_eq!(query.online, None);
        assert_eq!(
            query.to_pairs(),
            vec![
                ("domain".to_string(), "ai".to_string()),
                ("domain".to_string(), "web".to_string()),
                ("online".to_string(), "yes".to_string()),
            ]
        );
    }

    #[test]
    fn conference_uses_camel_case_fields() {
        let json = serde_json::json!({
            "id": "rustconf-2026-09-08",
            "name": "RustConf",
            "url": "https://rustconf.com",
            "startDate": "2026-09-08",
            "domain": "opensource",
            "financialAid": { "available": true, "types": ["travel"] }
        });
        let conference: Conference = serde_json::from_value(json).unwrap();
        assert_eq!(conference.start_date, "2026-09-08");
        assert!(conference.financial_aid.unwrap().available);
        assert!(!conference.online);
    }
}
