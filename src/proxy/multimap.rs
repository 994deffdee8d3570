//! Ordered multi-value map for query parameters.

/// Key → list of values. Keys keep first-insertion order, values keep
/// insertion order, and duplicates are preserved.
///
/// A value of `None` is a bare key (`flag`), which is written back without
/// `=`; `Some("")` is an empty value (`flag=`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiValueMap {
    entries: Vec<(String, Vec<Option<String>>)>,
}

impl MultiValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` under `key`.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.push(key.into(), Some(value.into()));
    }

    /// Append a bare `key` with no `=`.
    pub fn add_flag(&mut self, key: impl Into<String>) {
        self.push(key.into(), None);
    }

    fn push(&mut self, key: String, value: Option<String>) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// First value for `key`. A bare key reads as `""`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values(key)
            .first()
            .map(|v| v.as_deref().unwrap_or_default())
    }

    /// Every value for `key`, bare keys reading as `""`.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.values(key)
            .iter()
            .map(|v| v.as_deref().unwrap_or_default())
            .collect()
    }

    /// Raw values for `key`, keeping the bare/empty distinction.
    pub fn values(&self, key: &str) -> &[Option<String>] {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Option<String>])> {
        self.entries
            .iter()
            .map(|(k, values)| (k.as_str(), values.as_slice()))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Split a raw query string into pairs without decoding anything.
    ///
    /// `a=1&b&a=2&c=` yields `a → ["1", "2"]`, `b` bare, `c → [""]`.
    pub fn from_query(query: &str) -> Self {
        let mut map = Self::new();
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            match pair.split_once('=') {
                Some((key, value)) => map.add(key, value),
                None => map.add_flag(pair),
            }
        }
        map
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MultiValueMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.add(key, value);
        }
        map
    }
}
