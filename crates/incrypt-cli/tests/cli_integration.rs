//! Full-stack test: a real `git` drives the built binaries end to end.
//! Skips quietly when no `git` CLI is available.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn git_available() -> bool {
    Command::new("git")
        .arg("version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn helper_dir() -> PathBuf {
    Path::new(env!("CARGO_BIN_EXE_git-remote-incrypt"))
        .parent()
        .unwrap()
        .to_path_buf()
}

/// PATH with the freshly built helper binaries in front, so git finds
/// `git-remote-incrypt` on its own.
fn helper_path() -> OsString {
    let mut paths = vec![helper_dir()];
    if let Some(existing) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).unwrap()
}

fn write_key_tool(dir: &Path) -> PathBuf {
    let path = dir.join("keytool.sh");
    let script = "#!/bin/sh\n\
        mode=\n\
        for arg in \"$@\"; do\n\
        \tcase \"$arg\" in\n\
        \t\t-e) mode=wrap ;;\n\
        \t\t-d) mode=unwrap ;;\n\
        \tesac\n\
        done\n\
        case \"$mode\" in\n\
        \twrap) printf 'WRAPPED:'; cat ;;\n\
        \tunwrap) tail -c +9 ;;\n\
        \t*) exit 2 ;;\n\
        esac\n";
    std::fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

struct Env {
    path: OsString,
    key_tool: PathBuf,
}

impl Env {
    fn git(&self, cwd: &Path, args: &[&str]) -> Output {
        let output = Command::new("git")
            .current_dir(cwd)
            .env("PATH", &self.path)
            .env("INCRYPT_GPG", &self.key_tool)
            .env("GIT_AUTHOR_DATE", "1700000000 +0000")
            .env("GIT_COMMITTER_DATE", "1700000000 +0000")
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        output
    }

    fn rev_parse(&self, cwd: &Path, spec: &str) -> String {
        let out = self.git(cwd, &["rev-parse", spec]);
        String::from_utf8(out.stdout).unwrap().trim().to_string()
    }
}

#[test]
fn push_and_clone_through_the_helper() {
    if !git_available() {
        eprintln!("skipping: git CLI not available");
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let env = Env {
        path: helper_path(),
        key_tool: write_key_tool(tmp.path()),
    };

    // Initialize the encrypted remote.
    let er = tmp.path().join("remote.git");
    std::fs::create_dir(&er).unwrap();
    let init = Command::new(env!("CARGO_BIN_EXE_git-incrypt"))
        .current_dir(&er)
        .env("INCRYPT_GPG", &env.key_tool)
        .args([
            "init",
            "-n",
            "ci",
            "-e",
            "ci@example.com",
            "-d",
            "1700000000 +0000",
            "-m",
            "mirror",
            "alice",
        ])
        .output()
        .unwrap();
    assert!(
        init.status.success(),
        "init failed: {}",
        String::from_utf8_lossy(&init.stderr)
    );
    let raw_key = String::from_utf8(init.stdout).unwrap();
    assert_eq!(raw_key.trim().len(), 96, "raw key is 48 bytes of hex");

    // A cleartext repository with one commit.
    let work = tmp.path().join("work");
    std::fs::create_dir(&work).unwrap();
    env.git(&work, &["init", "-q", "-b", "master"]);
    std::fs::write(work.join("file.txt"), b"cleartext contents\n").unwrap();
    env.git(&work, &["add", "file.txt"]);
    env.git(
        &work,
        &[
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@example.com",
            "commit",
            "-q",
            "-m",
            "first",
        ],
    );

    let url = format!("incrypt::{}", er.display());
    env.git(&work, &["remote", "add", "origin", &url]);
    env.git(&work, &["push", "-q", "origin", "master"]);

    // The remote holds only the metadata branch and one opaque token.
    let refs = env.git(&er, &["for-each-ref", "--format=%(refname)"]);
    let refs = String::from_utf8(refs.stdout).unwrap();
    let names: Vec<&str> = refs.lines().collect();
    assert_eq!(names.len(), 2, "unexpected refs on the remote: {names:?}");
    assert!(names.contains(&"refs/heads/_"));
    assert!(!names.contains(&"refs/heads/master"));

    // Clone through the helper and compare histories.
    let clone = tmp.path().join("clone");
    env.git(tmp.path(), &["clone", "-q", &url, clone.to_str().unwrap()]);
    assert_eq!(
        env.rev_parse(&work, "HEAD"),
        env.rev_parse(&clone, "origin/master"),
        "cleartext ids survive the mirror"
    );
    assert_eq!(
        std::fs::read(clone.join("file.txt")).unwrap(),
        b"cleartext contents\n"
    );

    // Incremental push, then fetch from the existing clone.
    std::fs::write(work.join("file.txt"), b"updated contents\n").unwrap();
    env.git(&work, &["add", "file.txt"]);
    env.git(
        &work,
        &[
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@example.com",
            "commit",
            "-q",
            "-m",
            "second",
        ],
    );
    env.git(&work, &["push", "-q", "origin", "master"]);
    env.git(&clone, &["fetch", "-q", "origin"]);
    assert_eq!(
        env.rev_parse(&work, "HEAD"),
        env.rev_parse(&clone, "origin/master")
    );
}

#[test]
fn atomic_push_failure_leaves_the_remote_untouched() {
    if !git_available() {
        eprintln!("skipping: git CLI not available");
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let key_tool = write_key_tool(tmp.path());
    // The in-process helper resolves the key tool from the environment.
    std::env::set_var("INCRYPT_GPG", &key_tool);

    let er = tmp.path().join("remote.git");
    std::fs::create_dir(&er).unwrap();
    let init = Command::new(env!("CARGO_BIN_EXE_git-incrypt"))
        .current_dir(&er)
        .env("INCRYPT_GPG", &key_tool)
        .args(["init", "-d", "1700000000 +0000", "alice"])
        .output()
        .unwrap();
    assert!(init.status.success());

    // A cleartext repository with one commit on master, driven over the
    // helper protocol directly: one resolvable ref and one that is not.
    let work = tmp.path().join("work");
    let cr = git2::Repository::init(&work).unwrap();
    let sig = git2::Signature::new(
        "Test",
        "test@example.com",
        &git2::Time::new(1_700_000_000, 0),
    )
    .unwrap();
    let mut builder = cr.treebuilder(None).unwrap();
    builder
        .insert("f", cr.blob(b"data\n").unwrap(), 0o100644)
        .unwrap();
    let tree = cr.find_tree(builder.write().unwrap()).unwrap();
    drop(builder);
    let c1 = cr
        .commit(Some("refs/heads/master"), &sig, &sig, "first", &tree, &[])
        .unwrap();
    drop(tree);

    let url = format!("incrypt::{}", er.display());
    let mut helper = incrypt_core::helper::Helper::new(cr, &url).unwrap();

    let input = b"push refs/heads/master:refs/heads/master\n\
                  push refs/heads/missing:refs/heads/dev\n\n";
    let mut output = Vec::new();
    helper.run(&input[..], &mut output).unwrap();

    let output = String::from_utf8(output).unwrap();
    assert!(
        output.lines().all(|l| l.is_empty() || l.starts_with("error ")),
        "atomic batch must fail as a whole: {output}"
    );
    assert!(output.contains("error refs/heads/master"));
    assert!(output.contains("error refs/heads/dev"));

    // Remote tips unchanged: only the metadata branch exists.
    let er_repo = git2::Repository::open(&er).unwrap();
    let names: Vec<String> = er_repo
        .references()
        .unwrap()
        .filter_map(|r| r.ok().and_then(|r| r.name().map(str::to_string)))
        .collect();
    assert_eq!(names, vec!["refs/heads/_".to_string()]);
    let _ = c1;
}

#[test]
fn foreign_refs_on_the_remote_are_ignored() {
    if !git_available() {
        eprintln!("skipping: git CLI not available");
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let env = Env {
        path: helper_path(),
        key_tool: write_key_tool(tmp.path()),
    };

    let er = tmp.path().join("remote.git");
    std::fs::create_dir(&er).unwrap();
    let init = Command::new(env!("CARGO_BIN_EXE_git-incrypt"))
        .current_dir(&er)
        .env("INCRYPT_GPG", &env.key_tool)
        .args(["init", "-d", "1700000000 +0000", "alice"])
        .output()
        .unwrap();
    assert!(init.status.success());

    let work = tmp.path().join("work");
    std::fs::create_dir(&work).unwrap();
    env.git(&work, &["init", "-q", "-b", "master"]);
    std::fs::write(work.join("a"), b"a\n").unwrap();
    env.git(&work, &["add", "a"]);
    env.git(
        &work,
        &[
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@example.com",
            "commit",
            "-q",
            "-m",
            "a",
        ],
    );
    let url = format!("incrypt::{}", er.display());
    env.git(&work, &["remote", "add", "origin", &url]);
    env.git(&work, &["push", "-q", "origin", "master"]);

    // Drop an unrelated branch straight onto the remote.
    env.git(&er, &["update-ref", "refs/heads/foreign", "refs/heads/_"]);

    let listed = env.git(&work, &["ls-remote", "origin"]);
    let listed = String::from_utf8(listed.stdout).unwrap();
    assert!(listed.contains("refs/heads/master"));
    assert!(
        !listed.contains("foreign"),
        "foreign refs must not surface: {listed}"
    );
}
