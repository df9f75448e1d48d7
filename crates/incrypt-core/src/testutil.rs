use std::collections::BTreeMap;

use git2::{Oid, Repository, RepositoryInitOptions, Signature, Time};
use tempfile::TempDir;

use crate::crypto::keywrap::KeyTool;
use crate::crypto::RepoKey;
use crate::template;

pub fn test_key() -> RepoKey {
    RepoKey::from_bytes(&[0x42u8; 48]).unwrap()
}

pub fn test_template() -> String {
    template::build(
        "Test",
        "test@example.com",
        &Time::new(1_700_000_000, 0),
        &["mirror".to_string()],
    )
}

/// A fresh bare repository in a scratch directory.
pub fn scratch_repo() -> (TempDir, Repository) {
    let dir = TempDir::new().unwrap();
    let repo = Repository::init_opts(dir.path(), RepositoryInitOptions::new().bare(true)).unwrap();
    (dir, repo)
}

fn build_tree(repo: &Repository, files: &[(&str, &[u8])]) -> Oid {
    let mut builder = repo.treebuilder(None).unwrap();
    let mut subdirs: BTreeMap<&str, Vec<(&str, &[u8])>> = BTreeMap::new();
    for (path, data) in files {
        match path.split_once('/') {
            None => {
                let blob = repo.blob(data).unwrap();
                builder.insert(*path, blob, 0o100644).unwrap();
            }
            Some((dir, rest)) => subdirs.entry(dir).or_default().push((rest, data)),
        }
    }
    for (dir, entries) in subdirs {
        let subtree = build_tree(repo, &entries);
        builder.insert(dir, subtree, 0o040000).unwrap();
    }
    builder.write().unwrap()
}

/// Create a commit over the given files (paths may be nested) without
/// moving any reference. Fixed identity and timestamp keep ids stable.
pub fn commit_files(
    repo: &Repository,
    parents: &[Oid],
    files: &[(&str, &[u8])],
    message: &str,
) -> Oid {
    let tree_id = build_tree(repo, files);
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::new("Test", "test@example.com", &Time::new(1_700_000_000, 0)).unwrap();
    let parent_commits: Vec<_> = parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
    let parent_refs: Vec<&git2::Commit> = parent_commits.iter().collect();
    repo.commit(None, &sig, &sig, message, &tree, &parent_refs)
        .unwrap()
}

/// Annotated tag on `target`; creates `refs/tags/<name>` and returns the
/// tag object id.
pub fn tag_commit(repo: &Repository, name: &str, target: Oid, message: &str) -> Oid {
    let object = repo.find_object(target, None).unwrap();
    let sig = Signature::new("Test", "test@example.com", &Time::new(1_700_000_000, 0)).unwrap();
    repo.tag(name, &object, &sig, message, false).unwrap()
}

/// Stub key-management tool: `-e` prepends a marker, `-d` strips it.
/// Good enough to prove the pipes and the `-q -e -r`/`-q -d` contract.
pub fn fake_key_tool() -> (TempDir, KeyTool) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keytool.sh");
    write_key_tool_script(&path);
    let tool = KeyTool::with_program(path.to_str().unwrap());
    (dir, tool)
}

pub fn write_key_tool_script(path: &std::path::Path) {
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
    std::fs::write(path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// Every object id in a repository, sorted, for whole-store comparisons.
pub fn all_object_ids(repo: &Repository) -> Vec<Oid> {
    let odb = repo.odb().unwrap();
    let mut ids = Vec::new();
    odb.foreach(|oid| {
        ids.push(*oid);
        true
    })
    .unwrap();
    ids.sort();
    ids
}
