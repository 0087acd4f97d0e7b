//! Record hooks run around persistence.
//!
//! On create and update, a record passes through the collection's
//! [`Validator`] and then through every [`Middleware::before_save`] in
//! order; any rejection aborts the operation before the store is touched.
//! On load, every record passes through [`Middleware::after_read`].

use std::sync::Arc;

use repodb_types::Record;
use serde_json::Value;

use crate::error::{CollectionError, CollectionResult};

/// Reason a hook refused a record.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Rejection(pub String);

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Checks an untrusted record and returns its normalized form.
pub trait Validator: Send + Sync {
    fn validate(&self, record: Record) -> Result<Record, Rejection>;
}

impl<F> Validator for F
where
    F: Fn(Record) -> Result<Record, Rejection> + Send + Sync,
{
    fn validate(&self, record: Record) -> Result<Record, Rejection> {
        self(record)
    }
}

/// Record transformation around saves and loads. Both hooks default to
/// passing the record through.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    fn before_save(&self, record: Record) -> Result<Record, Rejection> {
        Ok(record)
    }

    fn after_read(&self, record: Record) -> Result<Record, Rejection> {
        Ok(record)
    }
}

/// Rejects records missing any of the listed fields, or holding `null`.
#[derive(Clone, Debug, Default)]
pub struct RequiredFields {
    fields: Vec<String>,
}

impl RequiredFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for RequiredFields {
    fn validate(&self, record: Record) -> Result<Record, Rejection> {
        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| matches!(record.get(f.as_str()), None | Some(Value::Null)))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(record)
        } else {
            Err(Rejection::new(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )))
        }
    }
}

/// The hook chain configured on one collection.
#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub validator: Option<Arc<dyn Validator>>,
    pub middleware: Vec<Arc<dyn Middleware>>,
}

impl Hooks {
    /// Validator, then every `before_save` in order.
    pub fn prepare(&self, record: Record) -> CollectionResult<Record> {
        let mut record = match &self.validator {
            Some(validator) => validator
                .validate(record)
                .map_err(|r| CollectionError::Validation(r.0))?,
            None => record,
        };
        for mw in &self.middleware {
            record = mw
                .before_save(record)
                .map_err(|r| middleware_error(mw.as_ref(), "before_save", r))?;
        }
        Ok(record)
    }

    pub fn loaded(&self, mut record: Record) -> CollectionResult<Record> {
        for mw in &self.middleware {
            record = mw
                .after_read(record)
                .map_err(|r| middleware_error(mw.as_ref(), "after_read", r))?;
        }
        Ok(record)
    }
}

fn middleware_error(mw: &dyn Middleware, hook: &'static str, rejection: Rejection) -> CollectionError {
    CollectionError::Middleware {
        middleware: mw.name().to_string(),
        hook,
        reason: rejection.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        repodb_types::record_from_value(value).unwrap()
    }

    struct Stamp;

    impl Middleware for Stamp {
        fn name(&self) -> &str {
            "stamp"
        }

        fn before_save(&self, mut record: Record) -> Result<Record, Rejection> {
            record.insert("stamped".into(), json!(true));
            Ok(record)
        }
    }

    struct Deny;

    impl Middleware for Deny {
        fn name(&self) -> &str {
            "deny"
        }

        fn after_read(&self, _record: Record) -> Result<Record, Rejection> {
            Err(Rejection::new("no reads today"))
        }
    }

    #[test]
    fn required_fields() {
        let v = RequiredFields::new(["name", "email"]);
        assert!(v.validate(rec(json!({"name": "a", "email": "b"}))).is_ok());
        let err = v.validate(rec(json!({"name": "a", "email": null}))).unwrap_err();
        assert_eq!(err.0, "missing required field(s): email");
    }

    #[test]
    fn closures_are_validators() {
        let lower = |mut r: Record| {
            if let Some(Value::String(s)) = r.get_mut("email") {
                *s = s.to_lowercase();
            }
            Ok::<_, Rejection>(r)
        };
        let hooks = Hooks {
            validator: Some(Arc::new(lower)),
            middleware: vec![Arc::new(Stamp)],
        };
        let out = hooks.prepare(rec(json!({"email": "A@B.C"}))).unwrap();
        assert_eq!(out.get("email"), Some(&json!("a@b.c")));
        assert_eq!(out.get("stamped"), Some(&json!(true)));
    }

    #[test]
    fn validation_failure_is_reported() {
        let hooks = Hooks {
            validator: Some(Arc::new(RequiredFields::new(["name"]))),
            middleware: Vec::new(),
        };
        let err = hooks.prepare(Record::new()).unwrap_err();
        assert!(matches!(err, CollectionError::Validation(_)));
    }

    #[test]
    fn middleware_failure_names_the_hook() {
        let hooks = Hooks {
            validator: None,
            middleware: vec![Arc::new(Stamp), Arc::new(Deny)],
        };
        assert!(hooks.prepare(Record::new()).is_ok());
        let err = hooks.loaded(Record::new()).unwrap_err();
        match err {
            CollectionError::Middleware {
                middleware, hook, ..
            } => {
                assert_eq!(middleware, "deny");
                assert_eq!(hook, "after_read");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
