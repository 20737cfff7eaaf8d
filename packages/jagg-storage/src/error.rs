#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Failed to render query: {0}")]
	Render(String),
	#[error("Column {column} has unsupported type {type_name}.")]
	UnsupportedColumn { column: String, type_name: String },
}
