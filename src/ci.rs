//! CI provider detection and run metadata resolution.
//!
//! Providers are checked in a fixed order and the first match wins, so a
//! GitHub Actions job that happens to export `GITLAB_CI` is still reported
//! as GitHub Actions.
//!
//! | Order | Provider | Detected by |
//! |-------|----------|-------------|
//! | 1 | GitHub Actions | `GITHUB_ACTIONS=true` |
//! | 2 | GitLab CI | `GITLAB_CI` |
//! | 3 | CircleCI | `CIRCLECI` |
//! | 4 | Buildkite | `BUILDKITE` |
//! | 5 | Jenkins | `JENKINS_URL` |
//! | 6 | Azure Pipelines | `TF_BUILD=True` |
//! | 7 | generic | `CI=true` or `CI=1` |
//!
//! Branch and commit fall back to `git rev-parse` when the provider doesn't
//! report them. Shard indices are normalised to 1-based.

use std::process::Command;

use tracing::debug;

use crate::model::RunMetadata;

/// What a CI provider told us about the current build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiEnvironment {
    pub provider: &'static str,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub build_url: Option<String>,
    pub shard_index: Option<u32>,
    pub total_shards: Option<u32>,
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Provider matchers in precedence order.
const MATCHERS: &[fn(Lookup<'_>) -> Option<CiEnvironment>] = &[
    github_actions,
    gitlab_ci,
    circleci,
    buildkite,
    jenkins,
    azure_pipelines,
    generic_ci,
];

/// Detects the CI provider using `lookup` to read environment variables.
///
/// Returns `None` outside CI.
///
/// ```
/// use std::collections::HashMap;
/// use testwire::ci::detect_environment;
///
/// let env: HashMap<&str, &str> = [("CIRCLECI", "true"), ("CIRCLE_BRANCH", "main")].into();
/// let ci = detect_environment(&|k| env.get(k).map(|v| v.to_string())).unwrap();
///
/// assert_eq!(ci.provider, "circleci");
/// assert_eq!(ci.branch.as_deref(), Some("main"));
/// ```
pub fn detect_environment(lookup: Lookup<'_>) -> Option<CiEnvironment> {
    MATCHERS.iter().find_map(|detect| detect(lookup))
}

fn var(lookup: Lookup<'_>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_true(lookup: Lookup<'_>, name: &str) -> bool {
    var(lookup, name)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

fn branch_name(raw: Option<String>) -> Option<String> {
    raw.map(|b| b.strip_prefix("refs/heads/").map(str::to_string).unwrap_or(b))
}

fn parse_u32(lookup: Lookup<'_>, name: &str) -> Option<u32> {
    var(lookup, name).and_then(|v| v.parse().ok())
}

fn github_actions(lookup: Lookup<'_>) -> Option<CiEnvironment> {
    if !is_true(lookup, "GITHUB_ACTIONS") {
        return None;
    }

    let build_url = match (
        var(lookup, "GITHUB_SERVER_URL"),
        var(lookup, "GITHUB_REPOSITORY"),
        var(lookup, "GITHUB_RUN_ID"),
    ) {
        (Some(server), Some(repo), Some(run)) => {
            Some(format!("{}/{}/actions/runs/{}", server, repo, run))
        }
        _ => None,
    };

    Some(CiEnvironment {
        provider: "github-actions",
        branch: branch_name(
            var(lookup, "GITHUB_HEAD_REF").or_else(|| var(lookup, "GITHUB_REF_NAME")),
        ),
        commit: var(lookup, "GITHUB_SHA"),
        build_url,
        ..CiEnvironment::default()
    })
}

fn gitlab_ci(lookup: Lookup<'_>) -> Option<CiEnvironment> {
    var(lookup, "GITLAB_CI")?;

    Some(CiEnvironment {
        provider: "gitlab-ci",
        branch: var(lookup, "CI_MERGE_REQUEST_SOURCE_BRANCH_NAME")
            .or_else(|| var(lookup, "CI_COMMIT_REF_NAME")),
        commit: var(lookup, "CI_COMMIT_SHA"),
        build_url: var(lookup, "CI_JOB_URL"),
        shard_index: parse_u32(lookup, "CI_NODE_INDEX"),
        total_shards: parse_u32(lookup, "CI_NODE_TOTAL"),
    })
}

fn circleci(lookup: Lookup<'_>) -> Option<CiEnvironment> {
    var(lookup, "CIRCLECI")?;

    Some(CiEnvironment {
        provider: "circleci",
        branch: var(lookup, "CIRCLE_BRANCH"),
        commit: var(lookup, "CIRCLE_SHA1"),
        build_url: var(lookup, "CIRCLE_BUILD_URL"),
        shard_index: parse_u32(lookup, "CIRCLE_NODE_INDEX").map(|i| i + 1),
        total_shards: parse_u32(lookup, "CIRCLE_NODE_TOTAL"),
    })
}

fn buildkite(lookup: Lookup<'_>) -> Option<CiEnvironment> {
    var(lookup, "BUILDKITE")?;

    Some(CiEnvironment {
        provider: "buildkite",
        branch: var(lookup, "BUILDKITE_BRANCH"),
        commit: var(lookup, "BUILDKITE_COMMIT"),
        build_url: var(lookup, "BUILDKITE_BUILD_URL"),
        shard_index: parse_u32(lookup, "BUILDKITE_PARALLEL_JOB").map(|i| i + 1),
        total_shards: parse_u32(lookup, "BUILDKITE_PARALLEL_JOB_COUNT"),
    })
}

fn jenkins(lookup: Lookup<'_>) -> Option<CiEnvironment> {
    var(lookup, "JENKINS_URL")?;

    Some(CiEnvironment {
        provider: "jenkins",
        branch: branch_name(var(lookup, "BRANCH_NAME").or_else(|| var(lookup, "GIT_BRANCH"))),
        commit: var(lookup, "GIT_COMMIT"),
        build_url: var(lookup, "BUILD_URL"),
        ..CiEnvironment::default()
    })
}

fn azure_pipelines(lookup: Lookup<'_>) -> Option<CiEnvironment> {
    if !is_true(lookup, "TF_BUILD") {
        return None;
    }

    let build_url = match (
        var(lookup, "SYSTEM_COLLECTIONURI"),
        var(lookup, "SYSTEM_TEAMPROJECT"),
        var(lookup, "BUILD_BUILDID"),
    ) {
        (Some(collection), Some(project), Some(build)) => Some(format!(
            "{}/{}/_build/results?buildId={}",
            collection.trim_end_matches('/'),
            project,
            build
        )),
        _ => None,
    };

    Some(CiEnvironment {
        provider: "azure-pipelines",
        branch: var(lookup, "BUILD_SOURCEBRANCHNAME"),
        commit: var(lookup, "BUILD_SOURCEVERSION"),
        build_url,
        ..CiEnvironment::default()
    })
}

fn generic_ci(lookup: Lookup<'_>) -> Option<CiEnvironment> {
    if !is_true(lookup, "CI") {
        return None;
    }

    Some(CiEnvironment {
        provider: "ci",
        ..CiEnvironment::default()
    })
}

/// Runs `git` with `args` and returns trimmed stdout on success.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Builds run metadata for a run starting now.
///
/// CI-reported values win; `git rev-parse` fills whatever is missing. A
/// missing git binary or a directory outside a repository is not an error.
pub fn resolve_run_metadata(source: &str) -> RunMetadata {
    resolve_run_metadata_with(source, &|name| std::env::var(name).ok(), &git)
}

/// [`resolve_run_metadata`] with injectable environment and git lookups.
pub fn resolve_run_metadata_with(
    source: &str,
    lookup: Lookup<'_>,
    git: &dyn Fn(&[&str]) -> Option<String>,
) -> RunMetadata {
    let ci = detect_environment(lookup).unwrap_or_default();
    if !ci.provider.is_empty() {
        debug!(provider = ci.provider, "detected CI environment");
    }

    let mut metadata = RunMetadata::new(source);
    metadata.branch = ci.branch.or_else(|| {
        git(&["rev-parse", "--abbrev-ref", "HEAD"]).filter(|b| b != "HEAD")
    });
    metadata.commit_sha = ci.commit.or_else(|| git(&["rev-parse", "HEAD"]));
    metadata.ci_url = ci.build_url;
    metadata.shard_index = ci.shard_index;
    metadata.total_shards = ci.total_shards;

    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn detect(pairs: &[(&str, &str)]) -> Option<CiEnvironment> {
        let env = env(pairs);
        detect_environment(&|k| env.get(k).cloned())
    }

    #[test]
    fn test_no_ci() {
        assert!(detect(&[("HOME", "/root")]).is_none());
        assert!(detect(&[("CI", "false")]).is_none());
    }

    #[test]
    fn test_github_actions() {
        let ci = detect(&[
            ("GITHUB_ACTIONS", "true"),
            ("GITHUB_REF_NAME", "main"),
            ("GITHUB_SHA", "abc123"),
            ("GITHUB_SERVER_URL", "https://github.com"),
            ("GITHUB_REPOSITORY", "acme/web"),
            ("GITHUB_RUN_ID", "42"),
        ])
        .unwrap();

        assert_eq!(ci.provider, "github-actions");
        assert_eq!(ci.branch.as_deref(), Some("main"));
        assert_eq!(ci.commit.as_deref(), Some("abc123"));
        assert_eq!(
            ci.build_url.as_deref(),
            Some("https://github.com/acme/web/actions/runs/42")
        );
    }

    #[test]
    fn test_github_pull_request_uses_head_ref() {
        let ci = detect(&[
            ("GITHUB_ACTIONS", "true"),
            ("GITHUB_HEAD_REF", "feature/login"),
            ("GITHUB_REF_NAME", "17/merge"),
        ])
        .unwrap();

        assert_eq!(ci.branch.as_deref(), Some("feature/login"));
    }

    #[test]
    fn test_github_wins_over_gitlab() {
        let ci = detect(&[
            ("GITLAB_CI", "true"),
            ("GITHUB_ACTIONS", "true"),
            ("CI", "true"),
        ])
        .unwrap();

        assert_eq!(ci.provider, "github-actions");
    }

    #[test]
    fn test_shards_are_one_based() {
        let ci = detect(&[
            ("CIRCLECI", "true"),
            ("CIRCLE_NODE_INDEX", "0"),
            ("CIRCLE_NODE_TOTAL", "4"),
        ])
        .unwrap();
        assert_eq!((ci.shard_index, ci.total_shards), (Some(1), Some(4)));

        let ci = detect(&[
            ("GITLAB_CI", "true"),
            ("CI_NODE_INDEX", "2"),
            ("CI_NODE_TOTAL", "3"),
        ])
        .unwrap();
        assert_eq!((ci.shard_index, ci.total_shards), (Some(2), Some(3)));
    }

    #[test]
    fn test_jenkins_strips_ref_prefix() {
        let ci = detect(&[
            ("JENKINS_URL", "https://ci.local/"),
            ("GIT_BRANCH", "refs/heads/release"),
        ])
        .unwrap();

        assert_eq!(ci.provider, "jenkins");
        assert_eq!(ci.branch.as_deref(), Some("release"));
    }

    #[test]
    fn test_azure_build_url() {
        let ci = detect(&[
            ("TF_BUILD", "True"),
            ("SYSTEM_COLLECTIONURI", "https://dev.azure.com/acme/"),
            ("SYSTEM_TEAMPROJECT", "web"),
            ("BUILD_BUILDID", "7"),
        ])
        .unwrap();

        assert_eq!(
            ci.build_url.as_deref(),
            Some("https://dev.azure.com/acme/web/_build/results?buildId=7")
        );
    }

    #[test]
    fn test_generic_ci() {
        let ci = detect(&[("CI", "1")]).unwrap();
        assert_eq!(ci.provider, "ci");
        assert!(ci.branch.is_none());
    }

    #[test]
    fn test_resolve_prefers_ci_values() {
        let env = env(&[("BUILDKITE", "true"), ("BUILDKITE_BRANCH", "main")]);
        let metadata = resolve_run_metadata_with(
            "cli",
            &|k| env.get(k).cloned(),
            &|args| {
                if args == ["rev-parse", "HEAD"] {
                    Some("deadbeef".to_string())
                } else {
                    Some("from-git".to_string())
                }
            },
        );

        assert_eq!(metadata.source, "cli");
        assert_eq!(metadata.branch.as_deref(), Some("main"));
        assert_eq!(metadata.commit_sha.as_deref(), Some("deadbeef"));
        assert!(metadata.finished_at.is_none());
    }

    #[test]
    fn test_resolve_without_ci_or_git() {
        let metadata = resolve_run_metadata_with("cli", &|_| None, &|_| None);

        assert!(metadata.branch.is_none());
        assert!(metadata.commit_sha.is_none());
        assert!(metadata.ci_url.is_none());
    }

    #[test]
    fn test_detached_head_is_not_a_branch() {
        let metadata = resolve_run_metadata_with("cli", &|_| None, &|_| Some("HEAD".to_string()));

        assert!(metadata.branch.is_none());
        assert_eq!(metadata.commit_sha.as_deref(), Some("HEAD"));
    }
}
