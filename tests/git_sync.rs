use anyhow::Result;
use buildrelay::config::{EnvConfig, VcsConfig, VcsKind};
use buildrelay::error::VcsError;
use buildrelay::vcs::{GitBackend, VcsBackend};
use git2::{Oid, Repository, Signature};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Non-bare "remote" repository with one initial commit
fn create_origin() -> Result<(TempDir, Repository)> {
    let temp_dir = TempDir::new()?;
    let repo = Repository::init(temp_dir.path())?;

    let mut config = repo.config()?;
    config.set_str("user.name", "Test User")?;
    config.set_str("user.email", "test@example.com")?;

    commit_file(&repo, "carol", "Initial commit", "Game.sln", "solution\n")?;
    Ok((temp_dir, repo))
}

fn commit_file(repo: &Repository, author: &str, message: &str, file: &str, content: &str) -> Result<Oid> {
    let workdir = repo.workdir().unwrap().to_path_buf();
    fs::write(workdir.join(file), content)?;

    let mut index = repo.index()?;
    index.add_path(Path::new(file))?;
    index.write()?;

    let tree = repo.find_tree(index.write_tree()?)?;
    let signature = Signature::now(author, &format!("{}@example.com", author))?;
    let parent_commit = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent_commit.iter().collect();

    Ok(repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?)
}

fn branch_name(repo: &Repository) -> Result<String> {
    Ok(repo.head()?.shorthand().unwrap_or("master").to_string())
}

fn vcs_config(url: &Path, reference: &str, local_path: PathBuf) -> VcsConfig {
    VcsConfig {
        kind: VcsKind::Git,
        url: url.to_string_lossy().into_owned(),
        reference: reference.to_string(),
        local_path,
        submodules: false,
        lfs: false,
        ssh_key: None,
        timeout_secs: 60,
        retries: 0,
        retry_backoff_ms: 1,
    }
}

fn backend(work: &Path) -> GitBackend {
    GitBackend::new(&EnvConfig {
        working_dir: work.to_path_buf(),
        vars: BTreeMap::new(),
        ci: true,
    })
}

/// Run the git CLI in `dir`, allowing local paths as submodule URLs
fn git_cli(dir: &Path, args: &[&str]) -> Result<()> {
    let status = Command::new("git")
        .args(["-c", "protocol.file.allow=always"])
        .args(args)
        .current_dir(dir)
        .output()?;
    anyhow::ensure!(
        status.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&status.stderr)
    );
    Ok(())
}

/// Origin whose `libs/core` is a submodule pointing at `library`
fn add_submodule(origin_dir: &Path, library: &Path) -> Result<()> {
    git_cli(origin_dir, &["submodule", "add", &library.to_string_lossy(), "libs/core"])?;
    git_cli(origin_dir, &["commit", "-m", "Add core library"])
}

fn submodule_backend(work: &Path) -> GitBackend {
    let vars: BTreeMap<String, String> = [
        ("GIT_CONFIG_COUNT", "1"),
        ("GIT_CONFIG_KEY_0", "protocol.file.allow"),
        ("GIT_CONFIG_VALUE_0", "always"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    GitBackend::new(&EnvConfig {
        working_dir: work.to_path_buf(),
        vars,
        ci: true,
    })
}

#[tokio::test]
async fn test_fresh_clone_then_incremental_sync() -> Result<()> {
    let (origin_dir, origin) = create_origin()?;
    let branch = branch_name(&origin)?;
    let work = TempDir::new()?;
    let checkout = work.path().join("src");
    let config = vcs_config(origin_dir.path(), &branch, checkout.clone());
    let git = backend(work.path());

    let first = git.sync(&config).await?;
    assert!(first.fresh_clone);
    assert!(first.previous.is_none());
    assert!(first.commits.is_empty());
    assert!(checkout.join("Game.sln").is_file());

    commit_file(&origin, "alice", "Add player controller", "Player.cs", "class Player {}\n")?;
    let head = commit_file(&origin, "bob", "Fix spawn crash", "Player.cs", "class Player { }\n")?;

    let second = git.sync(&config).await?;
    assert!(!second.fresh_clone);
    assert_eq!(second.previous.as_deref(), Some(first.commit.as_str()));
    assert_eq!(second.commit, head.to_string());
    assert_eq!(second.commits.len(), 2);
    assert_eq!(second.commits[0].message, "Add player controller");
    assert_eq!(second.commits[1].author, "bob");

    let expected: BTreeSet<String> = ["alice", "bob"].iter().map(|s| s.to_string()).collect();
    assert_eq!(second.authors, expected);
    assert_eq!(second.files_changed, 1);
    assert!(second.changed());
    Ok(())
}

#[tokio::test]
async fn test_sync_without_new_commits_is_unchanged() -> Result<()> {
    let (origin_dir, origin) = create_origin()?;
    let work = TempDir::new()?;
    let config = vcs_config(origin_dir.path(), &branch_name(&origin)?, work.path().join("src"));
    let git = backend(work.path());

    git.sync(&config).await?;
    let again = git.sync(&config).await?;
    assert!(!again.changed());
    assert!(again.commits.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_dirty_tree_is_left_untouched() -> Result<()> {
    let (origin_dir, origin) = create_origin()?;
    let work = TempDir::new()?;
    let checkout = work.path().join("src");
    let config = vcs_config(origin_dir.path(), &branch_name(&origin)?, checkout.clone());
    let git = backend(work.path());

    git.sync(&config).await?;
    fs::write(checkout.join("Game.sln"), "local edit\n")?;
    commit_file(&origin, "alice", "Remote change", "Game.sln", "remote\n")?;

    let err = git.sync(&config).await.unwrap_err();
    match err {
        VcsError::DirtyWorkingTree { paths, .. } => assert_eq!(paths, vec!["Game.sln".to_string()]),
        other => panic!("expected DirtyWorkingTree, got {:?}", other),
    }
    assert_eq!(fs::read_to_string(checkout.join("Game.sln"))?, "local edit\n");
    Ok(())
}

#[tokio::test]
async fn test_untracked_files_do_not_block_sync() -> Result<()> {
    let (origin_dir, origin) = create_origin()?;
    let work = TempDir::new()?;
    let checkout = work.path().join("src");
    let config = vcs_config(origin_dir.path(), &branch_name(&origin)?, checkout.clone());
    let git = backend(work.path());

    git.sync(&config).await?;
    fs::write(checkout.join("notes.txt"), "scratch\n")?;
    commit_file(&origin, "alice", "Remote change", "Game.sln", "remote\n")?;

    let result = git.sync(&config).await?;
    assert_eq!(result.commits.len(), 1);
    assert!(checkout.join("notes.txt").is_file());
    assert_eq!(fs::read_to_string(checkout.join("Game.sln"))?, "remote\n");
    Ok(())
}

#[tokio::test]
async fn test_tag_checked_out_detached() -> Result<()> {
    let (origin_dir, origin) = create_origin()?;
    let first = origin.head()?.peel_to_commit()?;
    origin.tag_lightweight("v1.0", first.as_object(), false)?;
    commit_file(&origin, "alice", "After tag", "Game.sln", "later\n")?;

    let work = TempDir::new()?;
    let checkout = work.path().join("src");
    let config = vcs_config(origin_dir.path(), "v1.0", checkout.clone());

    let result = backend(work.path()).sync(&config).await?;
    assert_eq!(result.commit, first.id().to_string());
    assert!(Repository::open(&checkout)?.head_detached()?);
    Ok(())
}

#[tokio::test]
async fn test_unknown_ref_is_not_found() -> Result<()> {
    let (origin_dir, _origin) = create_origin()?;
    let work = TempDir::new()?;
    let config = vcs_config(origin_dir.path(), "no-such-branch", work.path().join("src"));

    let err = backend(work.path()).sync(&config).await.unwrap_err();
    assert!(matches!(err, VcsError::NotFound(_)), "got {:?}", err);
    Ok(())
}

#[tokio::test]
async fn test_missing_remote_is_not_found() -> Result<()> {
    let work = TempDir::new()?;
    let config = vcs_config(&work.path().join("no-remote"), "main", work.path().join("src"));

    let err = backend(work.path()).sync(&config).await.unwrap_err();
    assert!(matches!(err, VcsError::NotFound(_)), "got {:?}", err);
    assert!(!work.path().join("src").exists());
    Ok(())
}

#[tokio::test]
async fn test_diff_is_read_only() -> Result<()> {
    let (origin_dir, origin) = create_origin()?;
    let work = TempDir::new()?;
    let checkout = work.path().join("src");
    let config = vcs_config(origin_dir.path(), &branch_name(&origin)?, checkout.clone());
    let git = backend(work.path());

    let synced = git.sync(&config).await?;
    let local = Repository::open(&checkout)?;
    let first = local.head()?.peel_to_commit()?.id().to_string();

    let diff = git.diff(&config, &first, &synced.commit).await?;
    assert!(diff.commits.is_empty());
    assert_eq!(local.head()?.peel_to_commit()?.id().to_string(), first);
    Ok(())
}

#[tokio::test]
async fn test_diff_accepts_branch_tag_and_relative_revisions() -> Result<()> {
    let (origin_dir, origin) = create_origin()?;
    let branch = branch_name(&origin)?;
    let first = origin.head()?.peel_to_commit()?;
    origin.tag_lightweight("v1.0", first.as_object(), false)?;

    let work = TempDir::new()?;
    let config = vcs_config(origin_dir.path(), &branch, work.path().join("src"));
    let git = backend(work.path());
    git.sync(&config).await?;

    commit_file(&origin, "alice", "Add enemy", "Enemy.cs", "class Enemy {}\n")?;
    let head = commit_file(&origin, "bob", "Tune enemy", "Enemy.cs", "class Enemy { }\n")?;
    git.sync(&config).await?;

    let remote_branch = format!("origin/{}", branch);
    let relative = git.diff(&config, "HEAD~2", "HEAD").await?;
    assert_eq!(relative.commits.len(), 2);
    assert_eq!(relative.from, Some(first.id().to_string()));
    assert_eq!(relative.to, head.to_string());

    let by_hash = git.diff(&config, &first.id().to_string(), &remote_branch).await?;
    assert_eq!(by_hash.commits.len(), 2);

    let up_to_date = git.diff(&config, "HEAD", &remote_branch).await?;
    assert!(up_to_date.commits.is_empty());

    let since_tag = git.diff(&config, "v1.0", "HEAD").await?;
    assert_eq!(since_tag.commits.len(), 2);
    assert_eq!(since_tag.commits[1].author, "bob");

    let err = git.diff(&config, "HEAD", "no-such-branch").await.unwrap_err();
    assert!(matches!(err, VcsError::NotFound(_)), "got {:?}", err);
    let err = git.diff(&config, "no-such-tag", "HEAD").await.unwrap_err();
    assert!(matches!(err, VcsError::NotFound(_)), "got {:?}", err);
    Ok(())
}

#[tokio::test]
async fn test_submodule_pointer_moves_are_reported() -> Result<()> {
    let (library_dir, library) = create_origin()?;
    let first_lib = commit_file(&library, "dana", "Core math", "Core.cs", "class Core {}\n")?;
    let (origin_dir, origin) = create_origin()?;
    add_submodule(origin_dir.path(), library_dir.path())?;

    let work = TempDir::new()?;
    let checkout = work.path().join("src");
    let mut config = vcs_config(origin_dir.path(), &branch_name(&origin)?, checkout.clone());
    config.submodules = true;
    let git = submodule_backend(work.path());

    let first = git.sync(&config).await?;
    assert!(checkout.join("libs/core/Core.cs").is_file());
    assert_eq!(first.submodules.len(), 1);
    assert_eq!(first.submodules[0].path, "libs/core");
    assert_eq!(first.submodules[0].to, Some(first_lib.to_string()));

    let next_lib = commit_file(&library, "dana", "Core physics", "Core.cs", "class Core { }\n")?;
    let pinned = origin_dir.path().join("libs/core");
    git_cli(&pinned, &["fetch", "origin"])?;
    git_cli(&pinned, &["checkout", "--detach", &next_lib.to_string()])?;
    git_cli(origin_dir.path(), &["add", "libs/core"])?;
    git_cli(origin_dir.path(), &["commit", "-m", "Bump core library"])?;

    let second = git.sync(&config).await?;
    assert_eq!(second.commits.len(), 1);
    assert_eq!(second.submodules.len(), 1);
    assert_eq!(second.submodules[0].from, Some(first_lib.to_string()));
    assert_eq!(second.submodules[0].to, Some(next_lib.to_string()));
    assert_eq!(
        fs::read_to_string(checkout.join("libs/core/Core.cs"))?,
        "class Core { }\n"
    );

    let third = git.sync(&config).await?;
    assert!(third.submodules.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unreachable_submodule_fails_sync() -> Result<()> {
    let (library_dir, _library) = create_origin()?;
    let (origin_dir, origin) = create_origin()?;
    add_submodule(origin_dir.path(), library_dir.path())?;
    drop(library_dir);

    let work = TempDir::new()?;
    let mut config = vcs_config(origin_dir.path(), &branch_name(&origin)?, work.path().join("src"));
    config.submodules = true;

    let err = submodule_backend(work.path()).sync(&config).await.unwrap_err();
    assert!(
        matches!(err, VcsError::NotFound(_) | VcsError::CommandFailed { .. }),
        "got {:?}",
        err
    );
    Ok(())
}
