#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tern_core::{BlockKind, Content, Role, TernError, ToolCall, ToolExecutor};
    use tern_llm::SEARCH_TRIGGER;
    use tern_llm::mock::MockProvider;
    use tern_runtime::{BuiltinTools, UndoJournal};

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::new("call_t", name, args)
    }

    fn path_str(p: &std::path::Path) -> String {
        p.to_string_lossy().into_owned()
    }

    #[test]
    fn test_schemas_cover_every_tool() {
        let tools = BuiltinTools::default();
        let names: Vec<String> = tools.tools().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["bash", "search_files", "search_string", "read_file", "update_file"]
        );
        for name in &names {
            assert!(tools.has_tool(name));
        }
        assert!(!tools.has_tool("google_search"));
    }

    #[test]
    fn test_model_backed_tools_need_a_provider() {
        let tools = BuiltinTools::default().with_llm(Arc::new(MockProvider::new("mock")));
        let names: Vec<String> = tools.tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names.len(), 7);
        assert!(tools.has_tool("google_search"));
        assert!(tools.has_tool("describe_image"));
    }

    // ── bash ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_bash_stdout_and_stderr() {
        let tools = BuiltinTools::default();
        let out = tools
            .execute(&call("bash", json!({"command": "echo out; echo err >&2"})))
            .await
            .unwrap();
        assert_eq!(out, "out\n\nSTDERR:\nerr\n");
    }

    #[tokio::test]
    async fn test_bash_no_output() {
        let tools = BuiltinTools::default();
        let out = tools.execute(&call("bash", json!({"command": "true"}))).await.unwrap();
        assert_eq!(out, "(Command executed successfully with no output)");
    }

    #[tokio::test]
    async fn test_bash_stdin_is_closed() {
        let tools = BuiltinTools::default();
        let out = tools.execute(&call("bash", json!({"command": "cat"}))).await.unwrap();
        assert_eq!(out, "(Command executed successfully with no output)");
    }

    #[tokio::test]
    async fn test_bash_timeout() {
        let tools = BuiltinTools::new(Duration::from_secs(1), 500);
        let out = tools.execute(&call("bash", json!({"command": "sleep 5"}))).await.unwrap();
        assert_eq!(out, "Error: Command timed out after 1 seconds.");
    }

    #[tokio::test]
    async fn test_bash_output_ceiling_stops_the_process() {
        let tools = BuiltinTools::new(Duration::from_secs(30), 500).with_max_output_bytes(64 * 1024);
        let started = std::time::Instant::now();
        let out = tools
            .execute(&call(
                "bash",
                json!({"command": "head -c 20000000 /dev/zero | tr '\\0' x"}),
            ))
            .await
            .unwrap();
        assert!(out.len() < 64 * 1024 + 200, "got {} bytes", out.len());
        assert!(out.starts_with("xxxx"));
        assert!(out.ends_with("(Output exceeded 65536 bytes; the command was stopped.)"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_output_under_the_ceiling_is_untouched() {
        let tools = BuiltinTools::default().with_max_output_bytes(16);
        let out = tools
            .execute(&call("bash", json!({"command": "printf 0123456789abcdef"})))
            .await
            .unwrap();
        assert_eq!(out, "0123456789abcdef");
    }

    #[tokio::test]
    async fn test_missing_argument_is_an_error() {
        let tools = BuiltinTools::default();
        let err = tools.execute(&call("bash", json!({}))).await.unwrap_err();
        assert!(matches!(err, TernError::ToolExecution { ref tool, .. } if tool == "bash"));
        assert!(tools.execute(&call("search_files", json!({}))).await.is_err());
        assert!(tools.execute(&call("search_string", json!({}))).await.is_err());
    }

    // ── read_file ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_read_file_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ten.txt");
        let body: String = (1..=10).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, body).unwrap();
        let tools = BuiltinTools::new(Duration::from_secs(5), 3);

        let out = tools
            .execute(&call("read_file", json!({"path": path_str(&path)})))
            .await
            .unwrap();
        assert_eq!(out, "(Total lines: 10)\nline 1\nline 2\nline 3\n");

        let out = tools
            .execute(&call(
                "read_file",
                json!({"path": path_str(&path), "start_line": 9, "end_line": 20}),
            ))
            .await
            .unwrap();
        assert_eq!(out, "(Total lines: 10)\nline 9\nline 10\n");

        let out = tools
            .execute(&call("read_file", json!({"path": path_str(&path), "start_line": 50})))
            .await
            .unwrap();
        assert_eq!(out, "(Total lines: 10)\n");
    }

    #[tokio::test]
    async fn test_read_missing_file_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let tools = BuiltinTools::default();
        let out = tools
            .execute(&call("read_file", json!({"path": path_str(&dir.path().join("nope"))})))
            .await
            .unwrap();
        assert!(out.starts_with("Error reading file:"));
    }

    // ── update_file ────────────────────────────────────────────

    #[tokio::test]
    async fn test_update_file_overwrite_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");
        let tools = BuiltinTools::default();

        let out = tools
            .execute(&call(
                "update_file",
                json!({"path": path_str(&path), "content": "hello"}),
            ))
            .await
            .unwrap();
        assert_eq!(out, format!("Successfully updated {}.", path_str(&path)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_update_file_replaces_every_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.txt");
        std::fs::write(&path, "port=1\nhost=x\nport=1\n").unwrap();
        let tools = BuiltinTools::default();

        tools
            .execute(&call(
                "update_file",
                json!({"path": path_str(&path), "content": "port=2", "old_content": "port=1"}),
            ))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "port=2\nhost=x\nport=2\n");

        let out = tools
            .execute(&call(
                "update_file",
                json!({"path": path_str(&path), "content": "z", "old_content": "absent"}),
            ))
            .await
            .unwrap();
        assert!(out.starts_with("Error: 'old_content' text block not found"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "port=2\nhost=x\nport=2\n");
    }

    #[tokio::test]
    async fn test_update_file_records_first_version_for_undo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.txt");
        std::fs::write(&path, "v1").unwrap();

        let undo = Arc::new(Mutex::new(UndoJournal::new()));
        undo.lock().begin_turn(&[]);
        let tools = BuiltinTools::default().with_undo(undo.clone());

        for content in ["v2", "v3"] {
            tools
                .execute(&call("update_file", json!({"path": path_str(&path), "content": content})))
                .await
                .unwrap();
        }

        let snapshot = undo.lock().pop().unwrap();
        let recorded: Vec<_> = snapshot.files.values().cloned().collect();
        assert_eq!(recorded, vec![Some("v1".to_string())]);
    }

    // ── google_search / describe_image ─────────────────────────

    #[tokio::test]
    async fn test_google_search_is_a_grounded_nested_request() {
        let mock = Arc::new(MockProvider::new("mock").with_response("Tokio 1.47 is the latest."));
        let tools = BuiltinTools::default().with_llm(mock.clone());

        let out = tools
            .execute(&call("google_search", json!({"query": "latest tokio"})))
            .await
            .unwrap();
        assert_eq!(out, "Tokio 1.47 is the latest.");

        assert_eq!(mock.recorded_tool_names(), vec![vec![SEARCH_TRIGGER.to_string()]]);
        let requests = mock.recorded_requests();
        let requests = requests.lock();
        assert_eq!(requests[0][0].role, Role::System);
        assert_eq!(requests[0][1].text_content(), "latest tokio");
    }

    #[tokio::test]
    async fn test_google_search_failure_is_reported_as_text() {
        let mock = Arc::new(MockProvider::new("mock").with_error(400, "bad request"));
        let tools = BuiltinTools::default().with_llm(mock);
        let out = tools
            .execute(&call("google_search", json!({"query": "x"})))
            .await
            .unwrap();
        assert!(out.starts_with("Error performing google search:"));
        assert!(tools.execute(&call("google_search", json!({}))).await.is_err());
    }

    #[tokio::test]
    async fn test_describe_image_sends_the_images() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("pixel.png");
        std::fs::write(&image, [1u8, 2, 3]).unwrap();
        let mock = Arc::new(MockProvider::new("mock").with_response("A single pixel."));
        let tools = BuiltinTools::default().with_llm(mock.clone());

        let out = tools
            .execute(&call("describe_image", json!({"paths": [path_str(&image)]})))
            .await
            .unwrap();
        assert_eq!(out, "A single pixel.");

        let requests = mock.recorded_requests();
        let requests = requests.lock();
        let Content::Blocks(blocks) = &requests[0][0].content else {
            panic!("expected content blocks");
        };
        assert_eq!(blocks.len(), 2);
        assert!(matches!(
            &blocks[1].kind,
            BlockKind::Image { media_type, data } if media_type == "image/png" && data == "AQID"
        ));
        assert_eq!(mock.recorded_tool_names(), vec![Vec::<String>::new()]);
    }

    #[tokio::test]
    async fn test_describe_image_reports_unreadable_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockProvider::new("mock"));
        let tools = BuiltinTools::default().with_llm(mock.clone());

        let out = tools
            .execute(&call(
                "describe_image",
                json!({"paths": [path_str(&dir.path().join("gone.png"))]}),
            ))
            .await
            .unwrap();
        assert!(out.starts_with("Error reading image"));

        let out = tools
            .execute(&call("describe_image", json!({"paths": ["notes.txt"]})))
            .await
            .unwrap();
        assert!(out.contains("unsupported image type"));
        assert_eq!(mock.request_count(), 0);
        assert!(tools.execute(&call("describe_image", json!({}))).await.is_err());
    }
}
