pub fn render_schema() -> String {
	expand_includes(include_str!("../../../sql/init.sql"))
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_chat_sessions.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_chat_sessions.sql")),
				"tables/002_chat_messages.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_chat_messages.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
