//! Canonical serialization for signed messages (spec §6).
//!
//! Signed messages add `sig` over the canonical serialization of all other
//! fields in lexicographic key order. We implement "canonical" as: drop
//! `sig`, recursively sort object keys, and render compact JSON. Any two
//! nodes serializing the same logical message this way produce identical
//! bytes, independent of struct field declaration order.

use serde::Serialize;
use serde_json::Value;

/// Render `value` as canonical JSON text, suitable for signing or hashing.
pub fn canonical_json(value: &Value) -> String {
	let mut out = String::new();
	write_canonical(value, &mut out);
	out
}

fn write_canonical(value: &Value, out: &mut String) {
	match value {
		Value::Object(map) => {
			out.push('{');
			let mut keys: Vec<&String> = map.keys().collect();
			keys.sort();
			for (i, key) in keys.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				out.push_str(&serde_json::to_string(key).expect("string keys always serialize"));
				out.push(':');
				write_canonical(&map[*key], out);
			}
			out.push('}');
		},
		Value::Array(items) => {
			out.push('[');
			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_canonical(item, out);
			}
			out.push(']');
		},
		other => out.push_str(&other.to_string()),
	}
}

/// Serialize `msg`, strip the `sig` field (if present), and return the
/// canonical text that a signature is computed over.
pub fn signable_text<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
	let mut value = serde_json::to_value(msg)?;
	if let Value::Object(map) = &mut value {
		map.remove("sig");
	}
	Ok(canonical_json(&value))
}
