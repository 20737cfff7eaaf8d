use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

use jagg_config::Config;

const SAMPLE_CONFIG_TEMPLATE_TOML: &str = include_str!("fixtures/sample_config.template.toml");

fn sample_toml_with(section: &str, key: &str, value: Value) -> String {
	let mut root: Value =
		toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.");
	let mut table = root.as_table_mut().expect("Template config must be a table.");

	for part in section.split('.') {
		table = table
			.get_mut(part)
			.and_then(Value::as_table_mut)
			.unwrap_or_else(|| panic!("Template config must include [{section}]."));
	}

	table.insert(key.to_string(), value);

	toml::to_string(&root).expect("Failed to render template config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("jagg_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn load_error(payload: String) -> String {
	let path = write_temp_config(payload);
	let result = jagg_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	result.expect_err("Expected a validation error.").to_string()
}

#[test]
fn template_config_loads() {
	let path = write_temp_config(SAMPLE_CONFIG_TEMPLATE_TOML.to_string());
	let result = jagg_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let cfg = result.expect("Template config must be valid.");

	assert_eq!(cfg.storage.postgres.schema, "acme");
	assert_eq!(cfg.aggregation.stack_parallelism, 2);
	assert_eq!(cfg.aggregation.default_page_size, 10);
}

#[test]
fn aggregation_section_is_optional() {
	let payload = "\
[service]
log_level = \"debug\"

[storage.postgres]
dsn = \"postgres://localhost/jagg\"
pool_max_conns = 1
schema = \"Tenant_1 \"
";
	let cfg: Config = toml::from_str(payload).expect("Failed to parse test config.");

	assert_eq!(cfg.aggregation.stack_parallelism, 2);
	assert_eq!(cfg.aggregation.default_idle_days, 30);
	assert_eq!(cfg.aggregation.poor_description_size, 10);
	assert!(cfg.aggregation.default_across_limit.is_none());

	let path = write_temp_config(payload.to_string());
	let loaded = jagg_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	assert_eq!(loaded.expect("Config must be valid.").storage.postgres.schema, "tenant_1");
}

#[test]
fn stack_parallelism_must_be_positive() {
	let message = load_error(sample_toml_with("aggregation", "stack_parallelism", Value::Integer(0)));

	assert!(
		message.contains("aggregation.stack_parallelism must be greater than zero."),
		"Unexpected error message: {message}"
	);
}

#[test]
fn page_size_must_be_positive() {
	let message = load_error(sample_toml_with("aggregation", "default_page_size", Value::Integer(0)));

	assert!(
		message.contains("aggregation.default_page_size must be greater than zero."),
		"Unexpected error message: {message}"
	);
}

#[test]
fn pool_size_must_be_positive() {
	let message = load_error(sample_toml_with("storage.postgres", "pool_max_conns", Value::Integer(0)));

	assert!(
		message.contains("storage.postgres.pool_max_conns must be greater than zero."),
		"Unexpected error message: {message}"
	);
}

#[test]
fn schema_must_be_plain_identifier() {
	let message = load_error(sample_toml_with(
		"storage.postgres",
		"schema",
		Value::String("acme; DROP TABLE x".to_string()),
	));

	assert!(
		message.contains("storage.postgres.schema must be a plain lowercase identifier."),
		"Unexpected error message: {message}"
	);
}

#[test]
fn log_level_cannot_be_blank() {
	let message = load_error(sample_toml_with("service", "log_level", Value::String("  ".to_string())));

	assert!(message.contains("service.log_level must be non-empty."), "Unexpected error: {message}");
}

#[test]
fn plain_identifier_rules() {
	assert!(jagg_config::is_plain_identifier("acme"));
	assert!(jagg_config::is_plain_identifier("_tenant_42"));
	assert!(!jagg_config::is_plain_identifier("42tenant"));
	assert!(!jagg_config::is_plain_identifier("Acme"));
	assert!(!jagg_config::is_plain_identifier(""));
	assert!(!jagg_config::is_plain_identifier("acme.issues"));
}
