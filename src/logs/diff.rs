use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Add,
    Remove,
    Replace,
}

/// One difference between a baseline body and the body the gateway sent.
/// `path` is a JSON pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub op: ChangeOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Structural diff of two JSON documents. Arrays of unequal length are
/// replaced wholesale.
pub fn diff(before: &Value, after: &Value) -> Vec<Change> {
    let mut out = Vec::new();
    walk(before, after, String::new(), &mut out);
    out
}

/// Diff of two raw bodies; non-JSON bodies compare as strings.
pub fn diff_bodies(before: &[u8], after: &[u8]) -> Vec<Change> {
    if before == after {
        return Vec::new();
    }
    let parse = |b: &[u8]| {
        serde_json::from_slice::<Value>(b)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(b).into_owned()))
    };
    diff(&parse(before), &parse(after))
}

fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn walk(before: &Value, after: &Value, path: String, out: &mut Vec<Change>) {
    match (before, after) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, old) in a {
                let child = format!("{}/{}", path, escape(key));
                match b.get(key) {
                    Some(new) => walk(old, new, child, out),
                    None => out.push(Change {
                        op: ChangeOp::Remove,
                        path: child,
                        value: None,
                    }),
                }
            }
            for (key, new) in b {
                if !a.contains_key(key) {
                    out.push(Change {
                        op: ChangeOp::Add,
                        path: format!("{}/{}", path, escape(key)),
                        value: Some(new.clone()),
                    });
                }
            }
        }
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
            for (i, (old, new)) in a.iter().zip(b).enumerate() {
                walk(old, new, format!("{}/{}", path, i), out);
            }
        }
        _ if before == after => {}
        _ => out.push(Change {
            op: ChangeOp::Replace,
            path,
            value: Some(after.clone()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_changes() {
        let changes = diff(
            &json!({"a": 1, "b": {"c": 2}, "gone": true}),
            &json!({"a": 1, "b": {"c": 3}, "new/key": "x"}),
        );
        assert_eq!(
            changes,
            vec![
                Change { op: ChangeOp::Replace, path: "/b/c".into(), value: Some(json!(3)) },
                Change { op: ChangeOp::Remove, path: "/gone".into(), value: None },
                Change { op: ChangeOp::Add, path: "/new~1key".into(), value: Some(json!("x")) },
            ]
        );
    }

    #[test]
    fn test_arrays() {
        assert_eq!(diff(&json!([1, 2]), &json!([1, 5]))[0].path, "/1");
        let whole = diff(&json!({"h": [1]}), &json!({"h": [1, 2]}));
        assert_eq!(whole.len(), 1);
        assert_eq!(whole[0].op, ChangeOp::Replace);
        assert_eq!(whole[0].path, "/h");
    }

    #[test]
    fn test_identical_bodies() {
        assert!(diff_bodies(b"{\"a\":1}", b"{\"a\":1}").is_empty());
        assert!(diff_bodies(b"{\"a\":1}", b"{ \"a\": 1 }").is_empty());
        assert_eq!(diff_bodies(b"plain", b"other")[0].path, "");
    }
}
