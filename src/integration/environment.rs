//! Terminal and CI environment detection
//!
//! Environment access goes through [`EnvironmentProbe`] so detection stays a
//! pure function of its inputs. Production code uses [`RealEnvironment`],
//! tests use `testing::MockEnvironment`.

use serde::{Deserialize, Serialize};
use std::io::IsTerminal;

/// CI providers recognised by their marker variable
const CI_MARKERS: &[(&str, &str)] = &[
    ("GITHUB_ACTIONS", "github_actions"),
    ("GITLAB_CI", "gitlab"),
    ("CIRCLECI", "circleci"),
    ("TRAVIS", "travis"),
    ("JENKINS_URL", "jenkins"),
    ("BUILDKITE", "buildkite"),
    ("TF_BUILD", "azure_pipelines"),
    ("TEAMCITY_VERSION", "teamcity"),
];

/// Read-only view of the process environment
pub trait EnvironmentProbe: Send + Sync {
    /// Value of an environment variable, `None` when unset or not unicode
    fn var(&self, key: &str) -> Option<String>;

    /// Whether stdout is an interactive terminal
    fn is_terminal(&self) -> bool;
}

#[derive(Clone, Default, Debug)]
pub struct RealEnvironment;

impl EnvironmentProbe for RealEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn is_terminal(&self) -> bool {
        std::io::stdout().is_terminal()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub is_tty: bool,
    pub is_ci: bool,
    pub ci_provider: Option<String>,
    pub supports_color: bool,
    pub terminal_width: Option<u16>,
}

impl EnvironmentInfo {
    pub fn detect(probe: &dyn EnvironmentProbe) -> Self {
        let is_tty = probe.is_terminal();
        let ci_provider = CI_MARKERS
            .iter()
            .find(|(var, _)| is_set(probe, var))
            .map(|(_, name)| name.to_string());
        let is_ci = ci_provider.is_some() || is_truthy(probe.var("CI"));

        Self {
            is_tty,
            is_ci,
            ci_provider,
            supports_color: supports_color(probe, is_tty),
            terminal_width: probe
                .var("COLUMNS")
                .and_then(|columns| columns.trim().parse().ok()),
        }
    }

    /// Degrade when there is no terminal, in CI, or when the terminal has
    /// neither color nor the minimum width.
    pub fn should_degrade(&self, min_width: u16) -> bool {
        let wide_enough = self.terminal_width.is_some_and(|width| width >= min_width);
        !self.is_tty || self.is_ci || (!self.supports_color && !wide_enough)
    }
}

fn is_set(probe: &dyn EnvironmentProbe, key: &str) -> bool {
    probe.var(key).is_some_and(|value| !value.is_empty())
}

fn is_truthy(value: Option<String>) -> bool {
    value.is_some_and(|v| !matches!(v.trim().to_lowercase().as_str(), "" | "0" | "false"))
}

fn supports_color(probe: &dyn EnvironmentProbe, is_tty: bool) -> bool {
    if is_set(probe, "NO_COLOR") {
        return false;
    }
    if let Some(force) = probe.var("FORCE_COLOR") {
        return force != "0" && force != "false";
    }
    match probe.var("TERM") {
        Some(term) => is_tty && term != "dumb",
        None => false,
    }
}
