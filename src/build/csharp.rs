//! C# build via MSBuild or the dotnet CLI

use super::excerpt::bounded_tail;
use super::{BuildBackend, BuildResult};
use crate::config::{BuildConfig, EnvConfig, Toolchain};
use crate::error::{BuildError, ProcessError};
use crate::process::{self, CommandSpec};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// C# solution/project builder
#[derive(Debug, Clone)]
pub struct CsBuild {
    env_vars: BTreeMap<String, String>,
    working_dir: PathBuf,
}

impl CsBuild {
    pub fn new(env: &EnvConfig) -> Self {
        Self {
            env_vars: env.vars.clone(),
            working_dir: env.working_dir.clone(),
        }
    }

    fn command(&self, config: &BuildConfig) -> CommandSpec {
        let cwd = config
            .project
            .parent()
            .filter(|p| p.is_dir())
            .unwrap_or(self.working_dir.as_path());

        CommandSpec::new(config.program(), Duration::from_secs(config.timeout_secs))
            .args(toolchain_args(config))
            .cwd(cwd)
            .envs(&self.env_vars)
    }

    fn failure(&self, config: &BuildConfig, log: &str, exit_code: Option<i32>) -> BuildError {
        let fallback = format!(
            "error: {} exited with code {} and no output",
            config.program(),
            exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string())
        );
        BuildError::CompileFailed {
            exit_code,
            excerpt: excerpt(config, log, &fallback),
        }
    }

    fn launch_failure(&self, config: &BuildConfig, error: ProcessError) -> BuildError {
        match error {
            ProcessError::NotFound { program } => BuildError::ToolchainNotFound(format!(
                "'{}' (set build.toolchain_path or MSBUILD_PATH)",
                program
            )),
            ProcessError::Spawn { program, source } => {
                BuildError::ToolchainNotFound(format!("'{}' could not be started: {}", program, source))
            }
            ProcessError::Timeout { secs, output, .. } => BuildError::Timeout {
                secs,
                excerpt: excerpt(
                    config,
                    &output,
                    &format!("error: build timed out after {}s with no output", secs),
                ),
            },
        }
    }
}

/// Bounded tail of `log`, or of `fallback` when the log has nothing to show
fn excerpt(config: &BuildConfig, log: &str, fallback: &str) -> String {
    let tail = bounded_tail(log, config.error_tail_lines, config.error_tail_max_chars);
    if tail.is_empty() {
        bounded_tail(fallback, config.error_tail_lines, config.error_tail_max_chars)
    } else {
        tail
    }
}

#[async_trait::async_trait]
impl BuildBackend for CsBuild {
    async fn build(&self, config: &BuildConfig) -> Result<BuildResult, BuildError> {
        if !config.project.is_file() {
            warn!("Project file not found: {}", config.project.display());
            return Err(self.failure(
                config,
                &format!("error: project file not found: {}", config.project.display()),
                None,
            ));
        }

        fs::create_dir_all(&config.output_dir).map_err(|e| {
            self.failure(
                config,
                &format!(
                    "error: cannot create output directory {}: {}",
                    config.output_dir.display(),
                    e
                ),
                None,
            )
        })?;

        let spec = self.command(config);
        info!("Building {} ({})", config.project.display(), config.configuration);
        info!("[{}] {}", config.toolchain.as_str(), spec.display());

        let start = Instant::now();
        let output = process::run(&spec)
            .await
            .map_err(|e| self.launch_failure(config, e))?;
        let duration_ms = start.elapsed().as_millis() as u64;

        if !output.success() {
            warn!(
                "Build failed with exit code {:?} after {}ms",
                output.exit_code, duration_ms
            );
            return Err(self.failure(config, &output.combined(), output.exit_code));
        }

        let artifact = find_artifact(&config.project, &config.output_dir)
            .unwrap_or_else(|| config.output_dir.clone());
        info!("Build succeeded in {}ms: {}", duration_ms, artifact.display());

        Ok(BuildResult::succeeded(duration_ms, artifact, spec.display()))
    }

    fn name(&self) -> &str {
        "cs"
    }
}

/// Toolchain arguments for the configured project
pub fn toolchain_args(config: &BuildConfig) -> Vec<String> {
    let project = config.project.to_string_lossy().into_owned();
    let out = config.output_dir.to_string_lossy().into_owned();

    match config.toolchain {
        Toolchain::Msbuild => {
            let mut targets = Vec::new();
            if config.restore {
                targets.push("Restore");
            }
            targets.push(if config.rebuild { "Rebuild" } else { "Build" });

            let out_dir = if out.ends_with(MAIN_SEPARATOR) {
                out
            } else {
                format!("{}{}", out, MAIN_SEPARATOR)
            };
            vec![
                project,
                format!("/t:{}", targets.join(";")),
                format!("/p:Configuration={}", config.configuration),
                format!("/p:OutDir={}", out_dir),
                "/nologo".to_string(),
            ]
        }
        Toolchain::Dotnet => {
            let mut args = vec![
                "build".to_string(),
                project,
                "-c".to_string(),
                config.configuration.to_string(),
                "-o".to_string(),
                out,
            ];
            if config.rebuild {
                args.push("--no-incremental".to_string());
            }
            if !config.restore {
                args.push("--no-restore".to_string());
            }
            args
        }
    }
}

/// `<stem>.exe` wins over `<stem>.dll`; either may sit in a subdirectory
fn find_artifact(project: &Path, output_dir: &Path) -> Option<PathBuf> {
    let stem = project.file_stem()?.to_string_lossy().to_lowercase();
    let mut dll = None;

    for entry in WalkDir::new(output_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let matches_stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase() == stem)
            .unwrap_or(false);
        if !matches_stem {
            continue;
        }
        match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("exe") => return Some(path.to_path_buf()),
            Some("dll") if dll.is_none() => dll = Some(path.to_path_buf()),
            _ => {}
        }
    }

    if dll.is_none() {
        debug!("No {}.exe or {}.dll under {}", stem, stem, output_dir.display());
    }
    dll
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuildKind, Configuration};
    use tempfile::TempDir;

    fn config(toolchain: Toolchain) -> BuildConfig {
        BuildConfig {
            kind: BuildKind::Cs,
            project: PathBuf::from("/w/src/Game.sln"),
            configuration: Configuration::Release,
            output_dir: PathBuf::from("/w/output"),
            toolchain,
            toolchain_path: None,
            restore: true,
            rebuild: true,
            timeout_secs: 60,
            error_tail_lines: 30,
            error_tail_max_chars: 4000,
            skip_unchanged: false,
        }
    }

    fn env(dir: &Path) -> EnvConfig {
        EnvConfig {
            working_dir: dir.to_path_buf(),
            vars: BTreeMap::new(),
            ci: true,
        }
    }

    #[test]
    fn test_msbuild_args() {
        let args = toolchain_args(&config(Toolchain::Msbuild));
        assert_eq!(
            args,
            vec![
                "/w/src/Game.sln",
                "/t:Restore;Rebuild",
                "/p:Configuration=Release",
                "/p:OutDir=/w/output/",
                "/nologo",
            ]
        );
    }

    #[test]
    fn test_msbuild_incremental_without_restore() {
        let mut cfg = config(Toolchain::Msbuild);
        cfg.restore = false;
        cfg.rebuild = false;
        cfg.configuration = Configuration::Debug;
        let args = toolchain_args(&cfg);
        assert_eq!(args[1], "/t:Build");
        assert_eq!(args[2], "/p:Configuration=Debug");
    }

    #[test]
    fn test_dotnet_args() {
        let mut cfg = config(Toolchain::Dotnet);
        cfg.restore = false;
        let args = toolchain_args(&cfg);
        assert_eq!(
            args,
            vec![
                "build",
                "/w/src/Game.sln",
                "-c",
                "Release",
                "-o",
                "/w/output",
                "--no-incremental",
                "--no-restore",
            ]
        );
    }

    #[test]
    fn test_find_artifact_prefers_exe() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("output");
        fs::create_dir_all(out.join("net8.0")).unwrap();
        fs::write(out.join("net8.0/Game.dll"), "").unwrap();
        fs::write(out.join("Game.exe"), "").unwrap();
        fs::write(out.join("Other.exe"), "").unwrap();

        let found = find_artifact(Path::new("/w/src/Game.csproj"), &out).unwrap();
        assert_eq!(found, out.join("Game.exe"));
    }

    #[test]
    fn test_find_artifact_none() {
        let temp = TempDir::new().unwrap();
        assert!(find_artifact(Path::new("Game.sln"), temp.path()).is_none());
    }

    #[tokio::test]
    async fn test_missing_project_is_compile_failure() {
        let temp = TempDir::new().unwrap();
        let mut cfg = config(Toolchain::Msbuild);
        cfg.project = temp.path().join("Missing.sln");
        cfg.output_dir = temp.path().join("output");
        cfg.error_tail_max_chars = 40;

        let err = CsBuild::new(&env(temp.path())).build(&cfg).await.unwrap_err();
        match err {
            BuildError::CompileFailed { exit_code, excerpt } => {
                assert_eq!(exit_code, None);
                assert!(!excerpt.is_empty());
                assert!(excerpt.chars().count() <= 40);
                assert!(excerpt.ends_with("Missing.sln"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_toolchain() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("Game.sln");
        fs::write(&project, "").unwrap();
        let mut cfg = config(Toolchain::Msbuild);
        cfg.project = project;
        cfg.output_dir = temp.path().join("output");
        cfg.toolchain_path = Some(PathBuf::from("/nonexistent/msbuild-xyz"));

        let err = CsBuild::new(&env(temp.path())).build(&cfg).await.unwrap_err();
        assert!(matches!(err, BuildError::ToolchainNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_keeps_bounded_tail() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let project = temp.path().join("Game.sln");
        fs::write(&project, "").unwrap();
        let script = temp.path().join("slow-msbuild.sh");
        fs::write(
            &script,
            "#!/bin/sh\necho 'Game.cs(7,9): error CS0103: name does not exist'\nsleep 5\n",
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut cfg = config(Toolchain::Msbuild);
        cfg.project = project;
        cfg.output_dir = temp.path().join("output");
        cfg.toolchain_path = Some(script);
        cfg.timeout_secs = 1;
        cfg.error_tail_max_chars = 30;

        let err = CsBuild::new(&env(temp.path())).build(&cfg).await.unwrap_err();
        match err {
            BuildError::Timeout { secs, excerpt } => {
                assert_eq!(secs, 1);
                assert!(excerpt.chars().count() <= 30);
                assert!(excerpt.ends_with("name does not exist"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
