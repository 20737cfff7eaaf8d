mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Aggregation, Config, Postgres, Service, Storage};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if !is_plain_identifier(&cfg.storage.postgres.schema) {
		return Err(Error::Validation {
			message: "storage.postgres.schema must be a plain lowercase identifier.".to_string(),
		});
	}
	if cfg.aggregation.stack_parallelism == 0 {
		return Err(Error::Validation {
			message: "aggregation.stack_parallelism must be greater than zero.".to_string(),
		});
	}
	if cfg.aggregation.default_page_size == 0 {
		return Err(Error::Validation {
			message: "aggregation.default_page_size must be greater than zero.".to_string(),
		});
	}
	if cfg.aggregation.default_idle_days <= 0 {
		return Err(Error::Validation {
			message: "aggregation.default_idle_days must be greater than zero.".to_string(),
		});
	}
	if cfg.aggregation.poor_description_size < 0 {
		return Err(Error::Validation {
			message: "aggregation.poor_description_size must be zero or greater.".to_string(),
		});
	}

	if let Some(limit) = cfg.aggregation.default_across_limit
		&& limit == 0
	{
		return Err(Error::Validation {
			message: "aggregation.default_across_limit must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

/// Schema names are spliced into SQL text, so only `[a-z_][a-z0-9_]*` is accepted.
pub fn is_plain_identifier(value: &str) -> bool {
	let mut chars = value.chars();

	match chars.next() {
		Some(first) if first == '_' || first.is_ascii_lowercase() => {},
		_ => return false,
	}

	chars.all(|c| c == '_' || c.is_ascii_lowercase() || c.is_ascii_digit())
}

fn normalize(cfg: &mut Config) {
	cfg.service.log_level = cfg.service.log_level.trim().to_string();
	cfg.storage.postgres.schema = cfg.storage.postgres.schema.trim().to_ascii_lowercase();
}
