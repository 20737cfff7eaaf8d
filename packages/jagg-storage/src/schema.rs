pub fn render_schema(schema: &str) -> String {
	let init = include_str!("../../../sql/init.sql");
	let expanded = expand_includes(init);

	expanded.replace("<SCHEMA>", schema)
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_jira_issues.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_jira_issues.sql")),
				"tables/002_jira_issue_statuses.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_jira_issue_statuses.sql")),
				"tables/003_jira_users.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_jira_users.sql")),
				"tables/004_jira_issue_assignees.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_jira_issue_assignees.sql")),
				"tables/005_jira_issue_sprints.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_jira_issue_sprints.sql")),
				"tables/006_jira_issue_versions.sql" =>
					out.push_str(include_str!("../../../sql/tables/006_jira_issue_versions.sql")),
				"tables/007_jira_issue_links.sql" =>
					out.push_str(include_str!("../../../sql/tables/007_jira_issue_links.sql")),
				"tables/008_jira_issue_priorities.sql" =>
					out.push_str(include_str!("../../../sql/tables/008_jira_issue_priorities.sql")),
				"tables/009_jira_status_metadata.sql" =>
					out.push_str(include_str!("../../../sql/tables/009_jira_status_metadata.sql")),
				"tables/010_jira_fields.sql" =>
					out.push_str(include_str!("../../../sql/tables/010_jira_fields.sql")),
				"tables/011_jira_issue_sprint_mappings.sql" => out
					.push_str(include_str!("../../../sql/tables/011_jira_issue_sprint_mappings.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
