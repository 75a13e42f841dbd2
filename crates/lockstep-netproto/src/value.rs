//! Typed accessors over untyped JSON objects.
//!
//! Payloads are converted to the structs in [`crate::messages`] at the
//! boundary; these helpers cover the places where a handler needs one
//! field out of an otherwise opaque object (e.g. a command's dispatcher tag).

use serde_json::{Map, Value};

use crate::error::ProtoError;

pub trait ValueExt {
    fn object(&self) -> Result<&Map<String, Value>, ProtoError>;
    fn field(&self, name: &str) -> Result<&Value, ProtoError>;
    fn i64_field(&self, name: &str) -> Result<i64, ProtoError>;
    fn opt_i64_field(&self, name: &str) -> Result<Option<i64>, ProtoError>;
    fn str_field(&self, name: &str) -> Result<&str, ProtoError>;
}

impl ValueExt for Value {
    fn object(&self) -> Result<&Map<String, Value>, ProtoError> {
        self.as_object().ok_or_else(|| ProtoError::FieldType {
            field: "<root>".to_string(),
            expected: "an object",
        })
    }

    fn field(&self, name: &str) -> Result<&Value, ProtoError> {
        self.object()?
            .get(name)
            .ok_or_else(|| ProtoError::MissingField(name.to_string()))
    }

    /// Integral numbers only. Floats with no fractional part are accepted,
    /// since some JSON encoders always write numbers as doubles.
    fn i64_field(&self, name: &str) -> Result<i64, ProtoError> {
        as_i64(self.field(name)?).ok_or_else(|| ProtoError::FieldType {
            field: name.to_string(),
            expected: "an integer",
        })
    }

    fn opt_i64_field(&self, name: &str) -> Result<Option<i64>, ProtoError> {
        match self.object()?.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.i64_field(name).map(Some),
        }
    }

    fn str_field(&self, name: &str) -> Result<&str, ProtoError> {
        self.field(name)?
            .as_str()
            .ok_or_else(|| ProtoError::FieldType {
                field: name.to_string(),
                expected: "a string",
            })
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    if let Some(i) = v.as_i64() {
        return Some(i);
    }
    let f = v.as_f64()?;
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64).then_some(f as i64)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_integer_fields() {
        let v = json!({"t0": 42, "t1": 7.0, "bad": 1.5, "s": "x"});
        assert_eq!(v.i64_field("t0").unwrap(), 42);
        assert_eq!(v.i64_field("t1").unwrap(), 7);
        assert!(matches!(
            v.i64_field("bad"),
            Err(ProtoError::FieldType { expected: "an integer", .. })
        ));
        assert!(matches!(v.i64_field("nope"), Err(ProtoError::MissingField(f)) if f == "nope"));
        assert_eq!(v.str_field("s").unwrap(), "x");
    }

    #[test]
    fn optional_fields() {
        let v = json!({"a": null, "b": 3});
        assert_eq!(v.opt_i64_field("a").unwrap(), None);
        assert_eq!(v.opt_i64_field("b").unwrap(), Some(3));
        assert_eq!(v.opt_i64_field("c").unwrap(), None);
    }

    #[test]
    fn non_object_root_is_rejected() {
        assert!(matches!(
            json!([1, 2]).field("x"),
            Err(ProtoError::FieldType { .. })
        ));
    }
}
