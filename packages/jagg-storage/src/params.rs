use std::collections::{BTreeMap, btree_map};

use serde::Serialize;

/// Value bound to a named placeholder.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
	Bool(bool),
	Int(i64),
	Float(f64),
	Text(String),
	IntList(Vec<i64>),
	TextList(Vec<String>),
}
impl From<bool> for ParamValue {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}
impl From<i64> for ParamValue {
	fn from(value: i64) -> Self {
		Self::Int(value)
	}
}
impl From<f64> for ParamValue {
	fn from(value: f64) -> Self {
		Self::Float(value)
	}
}
impl From<String> for ParamValue {
	fn from(value: String) -> Self {
		Self::Text(value)
	}
}
impl From<&str> for ParamValue {
	fn from(value: &str) -> Self {
		Self::Text(value.to_string())
	}
}
impl From<Vec<i64>> for ParamValue {
	fn from(value: Vec<i64>) -> Self {
		Self::IntList(value)
	}
}
impl From<Vec<String>> for ParamValue {
	fn from(value: Vec<String>) -> Self {
		Self::TextList(value)
	}
}
impl From<&[String]> for ParamValue {
	fn from(value: &[String]) -> Self {
		Self::TextList(value.to_vec())
	}
}

/// Named parameter bag collected while compiling a query.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, ParamValue>);
impl Params {
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores `value` under `name` and returns the placeholder text (`:name`).
	pub fn bind(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> String {
		let name = name.into();
		let placeholder = format!(":{name}");

		self.0.insert(name, value.into());

		placeholder
	}

	pub fn get(&self, name: &str) -> Option<&ParamValue> {
		self.0.get(name)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.0.contains_key(name)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> btree_map::Iter<'_, String, ParamValue> {
		self.0.iter()
	}

	pub fn extend(&mut self, other: Params) {
		self.0.extend(other.0);
	}
}
