//! Integration tests for the virtual shell.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use swarm_shell::{
    Environment, Ioe, OPT_ERREXIT, Result, ShellError, ShellHooks, VirtualShell, Workspace,
};
use swarm_types::ErrorKind;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingHooks {
    calls: Mutex<Vec<(Vec<String>, String)>>,
    deny: Vec<String>,
}

#[async_trait]
impl ShellHooks for RecordingHooks {
    async fn run_action(&self, argv: &[String], stdin: &str) -> Result<String> {
        self.calls.lock().push((argv.to_vec(), stdin.to_string()));
        match argv[0].as_str() {
            "@ask" => Ok("because".into()),
            "@upper" => Ok(stdin.to_uppercase()),
            _ => Err(ShellError::action(format!("no such agent: {}", argv[0]))),
        }
    }

    async fn allow_command(&self, command: &str, _args: &[String]) -> Result<bool> {
        Ok(!self.deny.iter().any(|d| d == command))
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    vfs: Arc<Workspace>,
    env: Environment,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let vfs = Arc::new(Workspace::new(dir.path()).unwrap());
        Self {
            _dir: dir,
            vfs,
            env: Environment::new(),
        }
    }

    fn shell(&self) -> VirtualShell {
        VirtualShell::new(self.vfs.clone(), self.env.clone())
    }
}

#[tokio::test]
async fn test_action_is_rerouted_to_hooks() {
    let f = Fixture::new();
    let hooks = Arc::new(RecordingHooks::default());
    let mut sh = f.shell().with_hooks(hooks.clone());

    let out = sh.capture(r#"echo hi && @ask "why""#).await.unwrap();

    assert_eq!(out.status, 0);
    assert_eq!(out.stdout, "hi\nbecause\n");
    let calls = hooks.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, vec!["@ask".to_string(), "why".to_string()]);
}

#[tokio::test]
async fn test_action_reads_piped_input() {
    let f = Fixture::new();
    let hooks = Arc::new(RecordingHooks::default());
    let mut sh = f.shell().with_hooks(hooks);

    let out = sh.capture("echo quiet | @upper").await.unwrap();
    assert_eq!(out.stdout, "QUIET\n");
}

#[tokio::test]
async fn test_failed_action_sets_status() {
    let f = Fixture::new();
    let hooks = Arc::new(RecordingHooks::default());
    let mut sh = f.shell().with_hooks(hooks);

    let out = sh.capture("@missing; echo $?").await.unwrap();
    assert_eq!(out.stdout, "1\n");
    assert!(out.stderr.contains("no such agent"));
}

#[tokio::test]
async fn test_action_without_hooks_is_not_found() {
    let f = Fixture::new();
    let out = f.shell().capture("@ask hello").await.unwrap();
    assert_eq!(out.status, 127);
}

#[tokio::test]
async fn test_errexit() {
    let f = Fixture::new();
    let mut sh = f.shell();

    let out = sh.capture("set -e; false; echo after").await.unwrap();
    assert_eq!(out.status, 1);
    assert_eq!(out.stdout, "");
    assert!(f.env.is_true(OPT_ERREXIT));

    let out = sh
        .capture("set -e; false || echo recovered; if false; then :; fi; echo done")
        .await
        .unwrap();
    assert_eq!(out.status, 0);
    assert_eq!(out.stdout, "recovered\ndone\n");
}

#[tokio::test]
async fn test_pipefail() {
    let f = Fixture::new();
    let mut sh = f.shell();
    let out = sh
        .capture("false | true; echo $?; set -o pipefail; false | true; echo $?")
        .await
        .unwrap();
    assert_eq!(out.stdout, "0\n1\n");
}

#[tokio::test]
async fn test_nounset() {
    let f = Fixture::new();
    let err = f.shell().capture("set -u; echo $MISSING").await.unwrap_err();
    assert!(matches!(err, ShellError::UnboundVariable(ref name) if name == "MISSING"));
}

#[tokio::test]
async fn test_xtrace_writes_to_stderr() {
    let f = Fixture::new();
    let out = f.shell().capture("set -x; echo traced").await.unwrap();
    assert_eq!(out.stdout, "traced\n");
    assert!(out.stderr.contains("+ echo traced"));
}

#[tokio::test]
async fn test_redirections() {
    let f = Fixture::new();
    let mut sh = f.shell();
    let out = sh
        .capture(
            "echo a > out.txt; echo b >> out.txt; cat < out.txt; \
             cat missing 2>/dev/null || echo fallback; cat missing 2>&1 | wc -l",
        )
        .await
        .unwrap();
    assert_eq!(out.stdout, "a\nb\nfallback\n1\n");
    assert_eq!(f.vfs.read_to_string("out.txt").await.unwrap(), "a\nb\n");
}

#[tokio::test]
async fn test_heredoc_expands_variables() {
    let f = Fixture::new();
    f.env.set("NAME", "swarm");
    let out = f
        .shell()
        .capture("cat <<EOF\nhello $NAME\nEOF\ncat <<'RAW'\n$NAME\nRAW\n")
        .await
        .unwrap();
    assert_eq!(out.stdout, "hello swarm\n$NAME\n");
}

#[tokio::test]
async fn test_cd_and_exec_are_disallowed() {
    let f = Fixture::new();
    let err = f.shell().capture("cd /tmp").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert!(err.to_string().contains("sh:exec"));

    let err = f.shell().capture("exec ls").await.unwrap_err();
    assert!(matches!(err, ShellError::Disallowed(_)));
}

#[tokio::test]
async fn test_paths_stay_in_workspace() {
    let f = Fixture::new();
    let out = f.shell().capture("cat ../../etc/passwd").await.unwrap();
    assert_eq!(out.status, 1);
    assert!(out.stderr.contains("outside the workspace"));

    let out = f.shell().capture("echo x > ../escape.txt").await.unwrap();
    assert_eq!(out.status, 1);
}

#[tokio::test]
async fn test_globbing() {
    let f = Fixture::new();
    f.vfs.write_file("a.md", b"").await.unwrap();
    f.vfs.write_file("b.md", b"").await.unwrap();
    f.vfs.write_file("c.txt", b"").await.unwrap();
    let out = f.shell().capture("echo *.md; echo '*.md'").await.unwrap();
    assert_eq!(out.stdout, "a.md b.md\n*.md\n");
}

#[tokio::test]
async fn test_xargs_and_time() {
    let f = Fixture::new();
    let out = f
        .shell()
        .capture("echo a b c | xargs -n 1 echo item; time true")
        .await
        .unwrap();
    assert_eq!(out.stdout, "item a\nitem b\nitem c\n");
    assert!(out.stderr.contains("real"));
}

#[tokio::test]
async fn test_exit_stops_script() {
    let f = Fixture::new();
    let out = f.shell().capture("echo one; exit 4; echo two").await.unwrap();
    assert_eq!(out.status, 4);
    assert_eq!(out.stdout, "one\n");
}

#[tokio::test]
async fn test_subshell_does_not_leak() {
    let f = Fixture::new();
    let out = f
        .shell()
        .capture("x=outer; (x=inner; echo $x); echo $x")
        .await
        .unwrap();
    assert_eq!(out.stdout, "inner\nouter\n");
}

#[tokio::test]
async fn test_run_script_streams_to_ioe() {
    let f = Fixture::new();
    let (mut ioe, out, _err) = Ioe::capture("from stdin");
    let status = f.shell().run_script("cat", &mut ioe).await.unwrap();
    assert_eq!(status, 0);
    assert_eq!(out.text(), "from stdin");
}

#[tokio::test]
async fn test_wget_saves_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
        .mount(&server)
        .await;

    let f = Fixture::new();
    f.env.set("URL", format!("{}/page", server.uri()));
    let out = f
        .shell()
        .capture("wget -q -O page.txt $URL && cat page.txt")
        .await
        .unwrap();
    assert_eq!(out.status, 0);
    assert_eq!(out.stdout, "payload");
}

#[tokio::test]
async fn test_cancelled_shell_stops() {
    let f = Fixture::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = f
        .shell()
        .with_cancel(cancel)
        .capture("sleep 5")
        .await
        .unwrap_err();
    assert!(matches!(err, ShellError::Cancelled));
}

#[cfg(unix)]
#[tokio::test]
async fn test_external_commands_respect_hooks() {
    let f = Fixture::new();
    let hooks = Arc::new(RecordingHooks {
        deny: vec!["/bin/echo".into()],
        ..Default::default()
    });
    let out = f
        .shell()
        .with_hooks(hooks)
        .capture("/bin/echo blocked")
        .await
        .unwrap();
    assert_eq!(out.status, 126);

    let out = f.shell().capture("/bin/echo allowed").await.unwrap();
    assert_eq!(out.stdout, "allowed\n");
}

#[tokio::test]
async fn test_slash_words_are_paths_unless_kit_form() {
    let f = Fixture::new();
    let hooks = Arc::new(RecordingHooks {
        deny: vec!["/tmp".into()],
        ..Default::default()
    });
    let mut sh = f.shell().with_hooks(hooks.clone());

    let out = sh.capture("/tmp").await.unwrap();
    assert_eq!(out.status, 126);
    assert!(hooks.calls.lock().is_empty());

    let out = sh.capture("/fs:read_file --path a.txt").await.unwrap();
    assert_eq!(out.status, 1);
    let calls = hooks.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0[0], "/fs:read_file");
}
