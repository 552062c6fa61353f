//! Facade to token mapping.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::BitPayError;

/// Tokens issued by the server, one per facade.
///
/// There is no expiry tracking; a refresh replaces the whole mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenStore {
    tokens: HashMap<String, String>,
}

impl TokenStore {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn get(&self, facade: &str) -> Option<&str> {
        self.tokens.get(facade).map(String::as_str)
    }

    pub fn replace(&mut self, other: TokenStore) {
        self.tokens = other.tokens;
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tokens.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Build a store from the `data` of a token listing: an array of
    /// objects, each mapping facade names to tokens. Later entries win.
    pub fn from_listing(data: &Value) -> Result<Self, BitPayError> {
        let entries = data
            .as_array()
            .ok_or_else(|| BitPayError::Parse("token listing is not an array".into()))?;

        let mut tokens = HashMap::new();
        for entry in entries {
            let object = entry
                .as_object()
                .ok_or_else(|| BitPayError::Parse("token entry is not an object".into()))?;
            for (facade, token) in object {
                let token = token.as_str().ok_or_else(|| {
                    BitPayError::Parse(format!("token for facade {facade} is not a string"))
                })?;
                tokens.insert(facade.clone(), token.to_owned());
            }
        }
        Ok(Self { tokens })
    }
}

impl From<HashMap<String, String>> for TokenStore {
    fn from(tokens: HashMap<String, String>) -> Self {
        Self::new(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listing_merges_all_entries() {
        let store =
            TokenStore::from_listing(&json!([{"pos": "t1"}, {"merchant": "t2"}])).unwrap();
        assert_eq!(store.get("pos"), Some("t1"));
        assert_eq!(store.get("merchant"), Some("t2"));
        assert_eq!(store.get("payroll"), None);
    }

    #[test]
    fn later_entry_wins() {
        let store = TokenStore::from_listing(&json!([{"pos": "old"}, {"pos": "new"}])).unwrap();
        assert_eq!(store.get("pos"), Some("new"));
    }

    #[test]
    fn replace_drops_previous_entries() {
        let mut store = TokenStore::new(HashMap::from([("a".to_string(), "1".to_string())]));
        store.replace(TokenStore::from_listing(&json!([{"b": "2"}])).unwrap());
        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("b"), Some("2"));
    }

    #[test]
    fn malformed_listing_is_parse_error() {
        for data in [json!({"pos": "t"}), json!(["pos"]), json!([{"pos": 1}])] {
            let err = TokenStore::from_listing(&data).unwrap_err();
            assert!(matches!(err, BitPayError::Parse(_)), "{data}");
        }
    }

    #[test]
    fn empty_listing_gives_empty_store() {
        assert!(TokenStore::from_listing(&json!([])).unwrap().is_empty());
    }
}
