//! Typed query fragments rendered once into SQL text with `:name` placeholders.
//!
//! [`bind`] turns the rendered text plus a [`Params`] bag into positional form for sqlx.

use std::{fmt::Write, sync::LazyLock};

use regex::Regex;
use serde::Serialize;

use crate::{
	Error, Result,
	params::{ParamValue, Params},
};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"'(?:[^']|'')*'|::|:([A-Za-z_][A-Za-z0-9_]*)")
		.expect("Placeholder pattern must compile.")
});

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Distinct {
	#[default]
	None,
	Rows,
	On(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
	/// A table or CTE name, optionally aliased.
	Table { name: String, alias: Option<String> },
	Subquery { query: Box<Select>, alias: String },
}
impl Source {
	pub fn table(name: impl Into<String>) -> Self {
		Self::Table { name: name.into(), alias: None }
	}

	pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
		Self::Table { name: name.into(), alias: Some(alias.into()) }
	}

	pub fn subquery(query: Select, alias: impl Into<String>) -> Self {
		Self::Subquery { query: Box::new(query), alias: alias.into() }
	}
}
impl Default for Source {
	fn default() -> Self {
		Self::table("issues")
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
	Inner,
	Left,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Join {
	pub kind: JoinKind,
	pub source: Source,
	pub on: Vec<String>,
}
impl Join {
	pub fn inner(source: Source, on: Vec<String>) -> Self {
		Self { kind: JoinKind::Inner, source, on }
	}

	pub fn left(source: Source, on: Vec<String>) -> Self {
		Self { kind: JoinKind::Left, source, on }
	}
}

/// Row window; both sides name parameters in the bag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Limit {
	Rows { limit: String },
	Page { offset: String, limit: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Select {
	pub distinct: Distinct,
	/// Empty means `*`.
	pub columns: Vec<String>,
	pub from: Source,
	pub joins: Vec<Join>,
	/// AND-joined predicates.
	pub filters: Vec<String>,
	pub group_by: Vec<String>,
	pub unions: Vec<Select>,
	pub order_by: Vec<String>,
	pub limit: Option<Limit>,
}
impl Select {
	pub fn from(source: Source) -> Self {
		Self { from: source, ..Default::default() }
	}

	pub fn column(mut self, column: impl Into<String>) -> Self {
		self.columns.push(column.into());

		self
	}

	pub fn columns<I, S>(mut self, columns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.columns.extend(columns.into_iter().map(Into::into));

		self
	}

	pub fn join(mut self, join: Join) -> Self {
		self.joins.push(join);

		self
	}

	pub fn filter(mut self, predicate: impl Into<String>) -> Self {
		self.filters.push(predicate.into());

		self
	}

	pub fn filters<I, S>(mut self, predicates: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.filters.extend(predicates.into_iter().map(Into::into));

		self
	}

	pub fn render(&self) -> String {
		let mut out = String::new();

		self.write_to(&mut out);

		out
	}

	fn write_to(&self, out: &mut String) {
		out.push_str("SELECT ");

		match &self.distinct {
			Distinct::None => {},
			Distinct::Rows => out.push_str("DISTINCT "),
			Distinct::On(keys) => {
				let _ = write!(out, "DISTINCT ON ({}) ", keys.join(", "));
			},
		}

		if self.columns.is_empty() {
			out.push('*');
		} else {
			out.push_str(&self.columns.join(", "));
		}

		out.push_str(" FROM ");
		write_source(&self.from, out);

		for join in &self.joins {
			out.push_str(match join.kind {
				JoinKind::Inner => " INNER JOIN ",
				JoinKind::Left => " LEFT JOIN ",
			});
			write_source(&join.source, out);

			if join.on.is_empty() {
				out.push_str(" ON TRUE");
			} else {
				let _ = write!(out, " ON {}", join.on.join(" AND "));
			}
		}

		if !self.filters.is_empty() {
			let _ = write!(out, " WHERE {}", self.filters.join(" AND "));
		}
		if !self.group_by.is_empty() {
			let _ = write!(out, " GROUP BY {}", self.group_by.join(", "));
		}

		for union in &self.unions {
			out.push_str(" UNION ");
			union.write_to(out);
		}

		if !self.order_by.is_empty() {
			let _ = write!(out, " ORDER BY {}", self.order_by.join(", "));
		}

		match &self.limit {
			None => {},
			Some(Limit::Rows { limit }) => {
				let _ = write!(out, " LIMIT :{limit}");
			},
			Some(Limit::Page { offset, limit }) => {
				let _ = write!(out, " OFFSET :{offset} LIMIT :{limit}");
			},
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cte {
	pub name: String,
	pub query: Select,
}

/// A full statement: common table expressions plus the body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
	pub ctes: Vec<Cte>,
	pub body: Select,
}
impl Query {
	pub fn new(body: Select) -> Self {
		Self { ctes: Vec::new(), body }
	}

	pub fn with(mut self, name: impl Into<String>, query: Select) -> Self {
		self.ctes.push(Cte { name: name.into(), query });

		self
	}

	pub fn render(&self) -> String {
		let mut out = String::new();

		if !self.ctes.is_empty() {
			out.push_str("WITH ");

			for (idx, cte) in self.ctes.iter().enumerate() {
				if idx > 0 {
					out.push_str(", ");
				}

				let _ = write!(out, "{} AS (", cte.name);
				cte.query.write_to(&mut out);
				out.push(')');
			}

			out.push(' ');
		}

		self.body.write_to(&mut out);

		out
	}
}

/// Rendered statement in positional form, ready for execution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoundQuery {
	pub sql: String,
	pub binds: Vec<ParamValue>,
}
impl BoundQuery {
	/// Short stable digest of the SQL text for correlating log lines.
	pub fn fingerprint(&self) -> String {
		let hash = blake3::hash(self.sql.as_bytes());

		hash.to_hex()[..16].to_string()
	}
}

/// Rewrites `:name` placeholders into `$n`, reusing the index of a repeated name.
///
/// Quoted literals and `::` casts are left untouched. Every placeholder must be present in
/// `params`.
pub fn bind(sql: &str, params: &Params) -> Result<BoundQuery> {
	let mut out = String::with_capacity(sql.len());
	let mut names: Vec<&str> = Vec::new();
	let mut binds = Vec::new();
	let mut last = 0;

	for captures in PLACEHOLDER.captures_iter(sql) {
		let Some(name) = captures.get(1) else {
			continue;
		};
		let whole = captures.get(0).unwrap_or(name);

		out.push_str(&sql[last..whole.start()]);

		let index = match names.iter().position(|seen| *seen == name.as_str()) {
			Some(index) => index + 1,
			None => {
				let value = params.get(name.as_str()).ok_or_else(|| {
					Error::Render(format!("Missing value for placeholder :{}.", name.as_str()))
				})?;

				names.push(name.as_str());
				binds.push(value.clone());

				names.len()
			},
		};

		let _ = write!(out, "${index}");

		last = whole.end();
	}

	out.push_str(&sql[last..]);

	Ok(BoundQuery { sql: out, binds })
}

fn write_source(source: &Source, out: &mut String) {
	match source {
		Source::Table { name, alias: None } => out.push_str(name),
		Source::Table { name, alias: Some(alias) } => {
			let _ = write!(out, "{name} AS {alias}");
		},
		Source::Subquery { query, alias } => {
			out.push('(');
			query.write_to(out);
			let _ = write!(out, ") AS {alias}");
		},
	}
}
