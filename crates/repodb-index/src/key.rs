use serde_json::Value;

/// Hashable form of a JSON value.
///
/// Two keys are equal exactly when the values they were made from are
/// equal under `serde_json::Value` equality. Object members are emitted in
/// sorted key order, so member order never matters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey(String);

impl IndexKey {
    pub fn of(value: &Value) -> Self {
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Value> for IndexKey {
    fn from(value: &Value) -> Self {
        Self::of(value)
    }
}
